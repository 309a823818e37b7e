use std::sync::Arc;

use anyhow::{Context, Result};
use ci_core::AppConfig;
use ci_dispatcher::{Coordinator, CoordinatorHandle, FileResultStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 主应用程序
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("应用配置无效")?;
        info!(
            "初始化调度器，监听地址: {}，结果目录: {}",
            config.dispatcher.bind_address(),
            config.dispatcher.results_dir.display()
        );
        Ok(Self { config })
    }

    /// 启动调度器
    pub async fn start(&self) -> Result<CoordinatorHandle> {
        let store = Arc::new(FileResultStore::new(&self.config.dispatcher.results_dir));
        let coordinator = Coordinator::new(self.config.dispatcher.clone(), store);
        coordinator
            .start()
            .await
            .with_context(|| format!("启动调度器失败: {}", self.config.dispatcher.bind_address()))
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let handle = self.start().await?;
        info!("调度器已启动: {}", handle.local_addr());

        shutdown.cancelled().await;
        info!("正在关闭调度器...");
        handle.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.dispatcher.host = "127.0.0.1".to_string();
        config.dispatcher.port = 0;
        config.dispatcher.results_dir = dir.path().to_path_buf();

        let app = Application::new(config).unwrap();
        let token = CancellationToken::new();
        let run = {
            let token = token.clone();
            tokio::spawn(async move { app.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.dispatcher.monitor_interval_ms = 0;
        assert!(Application::new(config).is_err());
    }
}
