use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ci_core::{
    models::RunnerId,
    protocol::{Command, RESPONSE_OK},
    CoordinatorError, CoordinatorResult, Transport,
};

use crate::state::SharedState;

/// 一次分发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已分发到执行器
    Dispatched(RunnerId),
    /// 提交不在待分发状态，或已被其他路径认领
    Skipped,
    /// 调度器正在关闭，认领已释放
    Cancelled,
}

/// 分发工作队列的发送端
///
/// 连接处理器与重新分发循环把提交放入队列后立即返回，
/// 由 [`DispatchEngine::run_queue`] 异步完成分发。
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl DispatchQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn submit(&self, commit_id: &str) -> CoordinatorResult<()> {
        self.tx
            .send(commit_id.to_string())
            .map_err(|_| CoordinatorError::Internal("分发队列已关闭".to_string()))
    }
}

/// 分发引擎：为待分发提交寻找一个接受它的执行器
pub struct DispatchEngine {
    state: SharedState,
    transport: Transport,
    retry_interval: Duration,
    shutdown: CancellationToken,
}

impl DispatchEngine {
    pub fn new(
        state: SharedState,
        transport: Transport,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            transport,
            retry_interval,
            shutdown,
        }
    }

    /// 认领提交并分发。提交已被认领或不在待分发状态时直接跳过
    pub async fn claim_and_dispatch(&self, commit_id: &str) -> DispatchOutcome {
        if !self.state.lock().await.ledger.claim(commit_id) {
            debug!("提交 {} 不可认领，跳过分发", commit_id);
            return DispatchOutcome::Skipped;
        }
        self.dispatch(commit_id).await
    }

    /// 分发已认领的提交
    ///
    /// 没有执行器接受时按固定间隔无限重试，只在分发成功或调度器关闭时返回。
    pub async fn dispatch(&self, commit_id: &str) -> DispatchOutcome {
        let mut attempts: u64 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return self.cancel(commit_id).await;
            }

            attempts += 1;
            debug!("尝试分发提交 {} (第 {} 次)", short_id(commit_id), attempts);

            if let Some(runner) = self.try_dispatch(commit_id).await {
                return DispatchOutcome::Dispatched(runner);
            }

            if attempts == 1 {
                info!(
                    "暂无执行器接受提交 {}，每 {:?} 重试一次",
                    short_id(commit_id),
                    self.retry_interval
                );
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return self.cancel(commit_id).await;
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// 依次询问当前空闲的执行器，第一个应答 OK 的执行器获得提交
    pub async fn try_dispatch(&self, commit_id: &str) -> Option<RunnerId> {
        let candidates = self.state.lock().await.registry.idle();
        let command = Command::RunTest {
            commit_id: commit_id.to_string(),
        };

        for runner in candidates {
            if !self.state.lock().await.reserve_runner(runner.id, commit_id) {
                continue;
            }

            let accepted = match self.transport.send(&runner.endpoint, &command).await {
                Ok(response) if response == RESPONSE_OK => true,
                Ok(response) => {
                    debug!(
                        "执行器 {} ({}) 拒绝提交 {}: {}",
                        runner.id, runner.endpoint, commit_id, response
                    );
                    false
                }
                Err(e) if e.is_peer_unreachable() => {
                    debug!(
                        "无法联系执行器 {} ({}): {}",
                        runner.id, runner.endpoint, e
                    );
                    false
                }
                Err(e) => {
                    warn!("向执行器 {} 发送 runtest 失败: {}", runner.id, e);
                    false
                }
            };

            let mut state = self.state.lock().await;
            if !accepted {
                state.release_runner(runner.id, commit_id);
                continue;
            }

            match state.confirm_dispatch(commit_id, runner.id) {
                Ok(()) => {
                    info!(
                        "提交 {} 已分发到执行器 {} ({})",
                        commit_id, runner.id, runner.endpoint
                    );
                    metrics::counter!("ci_dispatch_total").increment(1);
                    return Some(runner.id);
                }
                Err(e) => {
                    warn!(
                        "执行器 {} 接受了提交 {}，但无法记录分发: {}",
                        runner.id, commit_id, e
                    );
                }
            }
        }

        None
    }

    async fn cancel(&self, commit_id: &str) -> DispatchOutcome {
        self.state.lock().await.ledger.unclaim(commit_id);
        debug!("调度器关闭，放弃分发提交 {}", commit_id);
        DispatchOutcome::Cancelled
    }

    /// 消费分发队列，每个提交在独立任务中分发
    pub async fn run_queue(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<String>) {
        info!("启动分发队列");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("收到停止信号，退出分发队列");
                    break;
                }
                received = rx.recv() => {
                    let Some(commit_id) = received else {
                        break;
                    };
                    let engine = Arc::clone(&self);
                    in_flight.spawn(async move { engine.claim_and_dispatch(&commit_id).await });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("分发任务异常退出: {}", e);
                    }
                }
            }
        }

        // 分发任务会观察到取消信号并释放认领
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("分发任务异常退出: {}", e);
            }
        }
        info!("分发队列已停止");
    }
}

fn short_id(commit_id: &str) -> &str {
    commit_id.get(..8).unwrap_or(commit_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CoordinatorState;
    use ci_core::models::{CommitState, RunnerEndpoint};

    fn engine(state: SharedState, token: CancellationToken) -> DispatchEngine {
        DispatchEngine::new(
            state,
            Transport::new(Duration::from_millis(200)),
            Duration::from_millis(50),
            token,
        )
    }

    #[tokio::test]
    async fn test_claim_and_dispatch_skips_unknown_commit() {
        let state = CoordinatorState::shared();
        let engine = engine(state, CancellationToken::new());
        assert_eq!(
            engine.claim_and_dispatch("ghost").await,
            DispatchOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_claim_and_dispatch_skips_claimed_commit() {
        let state = CoordinatorState::shared();
        {
            let mut s = state.lock().await;
            s.submit("abc");
            s.ledger.claim("abc");
        }
        let engine = engine(state, CancellationToken::new());
        assert_eq!(engine.claim_and_dispatch("abc").await, DispatchOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_unreachable_runner_is_released() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let state = CoordinatorState::shared();
        let runner = {
            let mut s = state.lock().await;
            let runner = s.register_runner(RunnerEndpoint::new("127.0.0.1", port));
            s.submit("abc");
            s.ledger.claim("abc");
            runner
        };

        let engine = engine(Arc::clone(&state), CancellationToken::new());
        assert_eq!(engine.try_dispatch("abc").await, None);

        let s = state.lock().await;
        assert!(s.registry.get(runner).unwrap().is_idle());
        assert_eq!(s.commit_state("abc"), Some(CommitState::Pending));
        assert!(s.ledger.is_claimed("abc"));
    }

    #[tokio::test]
    async fn test_cancel_releases_claim() {
        let state = CoordinatorState::shared();
        {
            let mut s = state.lock().await;
            s.submit("abc");
        }
        let token = CancellationToken::new();
        let engine = Arc::new(engine(Arc::clone(&state), token.clone()));

        let handle = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.claim_and_dispatch("abc").await })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(state.lock().await.ledger.is_claimed("abc"));

        token.cancel();
        assert_eq!(handle.await.unwrap(), DispatchOutcome::Cancelled);

        let s = state.lock().await;
        assert!(!s.ledger.is_claimed("abc"));
        assert_eq!(s.commit_state("abc"), Some(CommitState::Pending));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
