use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    /// 创建新的关闭管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        info!("触发系统关闭");
        self.token.cancel();
    }

    /// 在超时内等待任务完成，超时返回 false
    pub async fn wait_with_timeout<F>(&self, task: F, timeout: Duration) -> bool
    where
        F: Future,
    {
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => true,
            Err(_) => {
                warn!("等待关闭超时 ({:?})", timeout);
                false
            }
        }
    }
}
