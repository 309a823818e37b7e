use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use ci_core::{protocol::validate_commit_id, CoordinatorError, CoordinatorResult};

/// 测试结果存储接口
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// 保存提交的结果，同一提交重复保存时覆盖
    async fn save(&self, commit_id: &str, payload: &[u8]) -> CoordinatorResult<()>;

    /// 读取提交的结果
    async fn load(&self, commit_id: &str) -> CoordinatorResult<Option<Vec<u8>>>;
}

/// 以文件形式保存结果：`<dir>/<commit_id>`
#[derive(Debug, Clone)]
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, commit_id: &str) -> CoordinatorResult<PathBuf> {
        validate_commit_id(commit_id)?;
        Ok(self.dir.join(commit_id))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save(&self, commit_id: &str, payload: &[u8]) -> CoordinatorResult<()> {
        let path = self.path_for(commit_id)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CoordinatorError::Storage(format!("创建结果目录 {} 失败: {e}", self.dir.display()))
        })?;

        // 先写临时文件再改名，读者不会看到写了一半的结果
        let tmp_path = self.dir.join(format!(".{commit_id}.tmp"));
        tokio::fs::write(&tmp_path, payload).await.map_err(|e| {
            CoordinatorError::Storage(format!("写入结果文件 {} 失败: {e}", tmp_path.display()))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            CoordinatorError::Storage(format!("保存结果文件 {} 失败: {e}", path.display()))
        })?;

        debug!("提交 {} 的结果已保存到 {}", commit_id, path.display());
        Ok(())
    }

    async fn load(&self, commit_id: &str) -> CoordinatorResult<Option<Vec<u8>>> {
        let path = self.path_for(commit_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoordinatorError::Storage(format!(
                "读取结果文件 {} 失败: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path().join("test_results"));

        store.save("abc123", b"hello world").await.unwrap();
        assert_eq!(
            store.load("abc123").await.unwrap(),
            Some(b"hello world".to_vec())
        );
        assert_eq!(
            std::fs::read(dir.path().join("test_results").join("abc123")).unwrap(),
            b"hello world"
        );
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());

        store.save("abc123", b"first").await.unwrap();
        store.save("abc123", b"second").await.unwrap();
        assert_eq!(store.load("abc123").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        assert_eq!(store.load("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        assert!(store.save("../escape", b"x").await.is_err());
        assert!(store.save("..", b"x").await.is_err());
    }
}
