use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub host: String,
    pub port: u16,
    /// 结果文件目录，每个提交一个文件
    pub results_dir: PathBuf,
    /// 执行器存活检测间隔（毫秒）
    pub monitor_interval_ms: u64,
    /// 每处理一个待分发提交后的等待时间（毫秒）
    pub redistribute_interval_ms: u64,
    /// 没有执行器接受提交时的重试间隔（毫秒）
    pub dispatch_retry_interval_ms: u64,
    /// 与执行器通信（runtest/ping）的超时时间（毫秒）
    pub runner_timeout_ms: u64,
    /// 读取入站请求的超时时间（毫秒）
    pub request_timeout_ms: u64,
    /// 没有执行器时是否仍将提交记为待分发
    pub queue_when_no_runners: bool,
    /// 优雅关闭的等待时间（秒）
    pub shutdown_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8888,
            results_dir: PathBuf::from("test_results"),
            monitor_interval_ms: 1000,
            redistribute_interval_ms: 5000,
            dispatch_retry_interval_ms: 2000,
            runner_timeout_ms: 1000,
            request_timeout_ms: 30_000,
            queue_when_no_runners: false,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("监听地址不能为空"));
        }

        if self.results_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("结果目录不能为空"));
        }

        if self.monitor_interval_ms == 0 {
            return Err(anyhow::anyhow!("存活检测间隔必须大于0"));
        }

        if self.redistribute_interval_ms == 0 {
            return Err(anyhow::anyhow!("重新分发间隔必须大于0"));
        }

        if self.dispatch_retry_interval_ms == 0 {
            return Err(anyhow::anyhow!("分发重试间隔必须大于0"));
        }

        if self.runner_timeout_ms == 0 {
            return Err(anyhow::anyhow!("执行器通信超时必须大于0"));
        }

        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("请求读取超时必须大于0"));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn redistribute_interval(&self) -> Duration {
        Duration::from_millis(self.redistribute_interval_ms)
    }

    pub fn dispatch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_retry_interval_ms)
    }

    pub fn runner_timeout(&self) -> Duration {
        Duration::from_millis(self.runner_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}
