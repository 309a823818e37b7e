use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatch_engine::DispatchQueue;
use crate::state::SharedState;

/// 重新分发循环
///
/// 定期扫描尚未被认领的待分发提交（执行器失效后回收的、或提交时没有执行器的），
/// 交给分发引擎。已被认领的提交由其他路径负责，这里不会重复分发。
pub struct Redistributor {
    state: SharedState,
    queue: DispatchQueue,
    interval: Duration,
}

impl Redistributor {
    pub fn new(state: SharedState, queue: DispatchQueue, interval: Duration) -> Self {
        Self {
            state,
            queue,
            interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("启动重新分发循环");

        loop {
            let pending = self.state.lock().await.ledger.unclaimed_pending();

            if pending.is_empty() {
                if !self.pause(&shutdown).await {
                    break;
                }
                continue;
            }

            debug!("重新分发 {} 个待分发提交: {:?}", pending.len(), pending);
            for commit_id in pending {
                if let Err(e) = self.queue.submit(&commit_id) {
                    error!("提交 {} 放入分发队列失败: {}", commit_id, e);
                }
                if !self.pause(&shutdown).await {
                    info!("收到停止信号，退出重新分发循环");
                    return;
                }
            }
        }

        info!("收到停止信号，退出重新分发循环");
    }

    /// 扫描一次并把所有未认领的待分发提交放入队列，返回放入的数量
    pub async fn redistribute_once(&self) -> usize {
        let pending = self.state.lock().await.ledger.unclaimed_pending();
        let mut submitted = 0;
        for commit_id in pending {
            match self.queue.submit(&commit_id) {
                Ok(()) => submitted += 1,
                Err(e) => error!("提交 {} 放入分发队列失败: {}", commit_id, e),
            }
        }
        submitted
    }

    /// 等待一个间隔，收到停止信号时返回 false
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }
}
