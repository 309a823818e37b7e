use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 仓库观察者配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// 调度器地址，格式 host:port
    pub dispatcher_server: String,
    /// 更新仓库并检测新提交的脚本
    pub update_script: PathBuf,
    /// 脚本发现新提交时写入的文件
    pub commit_file: PathBuf,
    pub poll_interval_seconds: u64,
    pub request_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            dispatcher_server: "localhost:8888".to_string(),
            update_script: PathBuf::from("./update_repo.sh"),
            commit_file: PathBuf::from(".commit_id"),
            poll_interval_seconds: 5,
            request_timeout_ms: 5000,
        }
    }
}

impl ObserverConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.dispatcher_address()?;

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("请求超时必须大于0"));
        }

        Ok(())
    }

    /// 解析调度器地址
    pub fn dispatcher_address(&self) -> anyhow::Result<(String, u16)> {
        let (host, port) = self
            .dispatcher_server
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("调度器地址格式无效: {}", self.dispatcher_server))?;
        if host.is_empty() {
            return Err(anyhow::anyhow!("调度器主机名不能为空"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("调度器端口无效: {port}"))?;
        Ok((host.to_string(), port))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
