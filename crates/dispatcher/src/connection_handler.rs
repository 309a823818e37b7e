use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use ci_core::{
    models::RunnerEndpoint,
    protocol::{
        read_command, Command, RESPONSE_INVALID_COMMAND, RESPONSE_NO_RUNNERS, RESPONSE_OK,
        RESPONSE_PONG,
    },
    CoordinatorError, CoordinatorResult,
};

use crate::dispatch_engine::DispatchQueue;
use crate::result_store::ResultStore;
use crate::state::SharedState;

/// 单个连接的请求处理器
///
/// 每个连接只处理一条命令：读取、解析、执行、应答，然后关闭。
#[derive(Clone)]
pub struct ConnectionHandler {
    state: SharedState,
    queue: DispatchQueue,
    store: Arc<dyn ResultStore>,
    queue_when_no_runners: bool,
    request_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        state: SharedState,
        queue: DispatchQueue,
        store: Arc<dyn ResultStore>,
        queue_when_no_runners: bool,
        request_timeout: Duration,
    ) -> Self {
        Self {
            state,
            queue,
            store,
            queue_when_no_runners,
            request_timeout,
        }
    }

    /// 处理一个入站连接
    pub async fn handle(&self, mut stream: TcpStream) -> CoordinatorResult<()> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let received = tokio::time::timeout(self.request_timeout, read_command(&mut stream)).await;
        let response = match received {
            Ok(Ok(command)) => {
                debug!("来自 {} 的命令: {}", peer, command.keyword());
                self.handle_command(command).await
            }
            Ok(Err(CoordinatorError::Protocol(reason))) => {
                warn!("来自 {} 的命令无效: {}", peer, reason);
                RESPONSE_INVALID_COMMAND.to_string()
            }
            Ok(Err(e)) => {
                debug!("读取来自 {} 的请求失败: {}", peer, e);
                return Err(e);
            }
            Err(_) => {
                warn!("读取来自 {} 的请求超时", peer);
                return Err(CoordinatorError::timeout(peer));
            }
        };

        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// 执行一条已解析的命令，返回应答文本
    pub async fn handle_command(&self, command: Command) -> String {
        match command {
            Command::Status => RESPONSE_OK.to_string(),
            Command::Ping => RESPONSE_PONG.to_string(),
            Command::Register { host, port } => self.handle_register(host, port).await,
            Command::Dispatch { commit_id } => self.handle_dispatch(&commit_id).await,
            Command::Results { commit_id, payload } => {
                self.handle_results(&commit_id, &payload).await
            }
            Command::RunTest { commit_id } => {
                warn!("调度器不接受 runtest 命令 (提交 {})", commit_id);
                RESPONSE_INVALID_COMMAND.to_string()
            }
        }
    }

    async fn handle_register(&self, host: String, port: u16) -> String {
        let endpoint = RunnerEndpoint::new(host, port);
        let id = self.state.lock().await.register_runner(endpoint.clone());
        info!("注册执行器 {} ({})", id, endpoint);
        RESPONSE_OK.to_string()
    }

    async fn handle_dispatch(&self, commit_id: &str) -> String {
        match self.accept_commit(commit_id).await {
            Ok(()) => {
                info!("接收提交 {}", commit_id);
                RESPONSE_OK.to_string()
            }
            Err(CoordinatorError::NoRunnersAvailable) => {
                if self.queue_when_no_runners {
                    info!("暂无执行器，提交 {} 保留为待分发", commit_id);
                } else {
                    info!("暂无执行器，拒绝提交 {}", commit_id);
                }
                RESPONSE_NO_RUNNERS.to_string()
            }
            Err(e) => {
                // 队列只在调度器关闭时断开，提交留在内存中的待分发状态
                error!("提交 {} 放入分发队列失败: {}", commit_id, e);
                RESPONSE_OK.to_string()
            }
        }
    }

    /// 记录提交并放入分发队列；注册表为空时返回 `NoRunnersAvailable`
    async fn accept_commit(&self, commit_id: &str) -> CoordinatorResult<()> {
        {
            let mut state = self.state.lock().await;
            if !state.has_runners() {
                if self.queue_when_no_runners {
                    state.submit(commit_id);
                }
                return Err(CoordinatorError::NoRunnersAvailable);
            }
            if !state.submit(commit_id) {
                debug!("提交 {} 已在跟踪中", commit_id);
            }
        }
        self.queue.submit(commit_id)
    }

    /// 结果未能落盘：提交重新进入待分发，重新测试
    async fn requeue_lost_result(&self, commit_id: &str) {
        self.state.lock().await.submit(commit_id);
        if let Err(e) = self.queue.submit(commit_id) {
            warn!("提交 {} 无法重新放入分发队列: {}", commit_id, e);
        }
    }

    async fn handle_results(&self, commit_id: &str, payload: &[u8]) -> String {
        let completed = self.state.lock().await.complete(commit_id);
        match completed {
            Ok(runner) => {
                info!(
                    "收到执行器 {} 关于提交 {} 的结果 ({} 字节)",
                    runner,
                    commit_id,
                    payload.len()
                );
                metrics::counter!("ci_results_total").increment(1);
                if let Err(e) = self.store.save(commit_id, payload).await {
                    error!(
                        "保存执行器 {} 关于提交 {} 的结果失败，重新分发: {}",
                        runner, commit_id, e
                    );
                    self.requeue_lost_result(commit_id).await;
                }
            }
            Err(CoordinatorError::UnknownCommit { .. }) => {
                warn!("收到未分发提交 {} 的结果，忽略", commit_id);
            }
            Err(e) => {
                error!("处理提交 {} 的结果时出错: {}", commit_id, e);
            }
        }
        RESPONSE_OK.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::state::CoordinatorState;
    use ci_core::models::CommitState;

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ResultStore for RecordingStore {
        async fn save(&self, commit_id: &str, payload: &[u8]) -> CoordinatorResult<()> {
            self.saved
                .lock()
                .await
                .insert(commit_id.to_string(), payload.to_vec());
            Ok(())
        }

        async fn load(&self, commit_id: &str) -> CoordinatorResult<Option<Vec<u8>>> {
            Ok(self.saved.lock().await.get(commit_id).cloned())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ResultStore for FailingStore {
        async fn save(&self, commit_id: &str, _payload: &[u8]) -> CoordinatorResult<()> {
            Err(CoordinatorError::Storage(format!("磁盘已满: {commit_id}")))
        }

        async fn load(&self, _commit_id: &str) -> CoordinatorResult<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn handler(
        queue_when_no_runners: bool,
    ) -> (
        ConnectionHandler,
        SharedState,
        Arc<RecordingStore>,
        tokio::sync::mpsc::UnboundedReceiver<String>,
    ) {
        let state = CoordinatorState::shared();
        let store = Arc::new(RecordingStore::default());
        let (queue, rx) = DispatchQueue::channel();
        let handler = ConnectionHandler::new(
            Arc::clone(&state),
            queue,
            store.clone(),
            queue_when_no_runners,
            Duration::from_secs(1),
        );
        (handler, state, store, rx)
    }

    #[tokio::test]
    async fn test_status_and_ping() {
        let (handler, _, _, _) = handler(false);
        assert_eq!(handler.handle_command(Command::Status).await, "OK");
        assert_eq!(handler.handle_command(Command::Ping).await, "pong");
    }

    #[tokio::test]
    async fn test_runtest_is_rejected() {
        let (handler, _, _, _) = handler(false);
        let response = handler
            .handle_command(Command::RunTest {
                commit_id: "abc".to_string(),
            })
            .await;
        assert_eq!(response, RESPONSE_INVALID_COMMAND);
    }

    #[tokio::test]
    async fn test_register_allows_duplicates() {
        let (handler, state, _, _) = handler(false);
        for _ in 0..2 {
            let response = handler
                .handle_command(Command::Register {
                    host: "localhost".to_string(),
                    port: 9001,
                })
                .await;
            assert_eq!(response, "OK");
        }
        assert_eq!(state.lock().await.runners().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_without_runners_is_not_tracked() {
        let (handler, state, _, mut rx) = handler(false);
        let response = handler
            .handle_command(Command::Dispatch {
                commit_id: "abc".to_string(),
            })
            .await;
        assert_eq!(response, RESPONSE_NO_RUNNERS);
        assert_eq!(state.lock().await.commit_state("abc"), None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_without_runners_kept_pending_when_queueing() {
        let (handler, state, _, mut rx) = handler(true);
        let response = handler
            .handle_command(Command::Dispatch {
                commit_id: "abc".to_string(),
            })
            .await;
        assert_eq!(response, RESPONSE_NO_RUNNERS);
        assert_eq!(
            state.lock().await.commit_state("abc"),
            Some(CommitState::Pending)
        );
        // 交给重新分发循环，不直接入队
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_with_runner_is_queued() {
        let (handler, state, _, mut rx) = handler(false);
        state
            .lock()
            .await
            .register_runner(RunnerEndpoint::new("localhost", 9001));

        let response = handler
            .handle_command(Command::Dispatch {
                commit_id: "abc".to_string(),
            })
            .await;
        assert_eq!(response, "OK");
        assert_eq!(
            state.lock().await.commit_state("abc"),
            Some(CommitState::Pending)
        );
        assert_eq!(rx.try_recv().unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_results_for_dispatched_commit_are_saved() {
        let (handler, state, store, _) = handler(false);
        {
            let mut s = state.lock().await;
            let runner = s.register_runner(RunnerEndpoint::new("localhost", 9001));
            s.submit("abc123");
            s.ledger.claim("abc123");
            s.reserve_runner(runner, "abc123");
            s.confirm_dispatch("abc123", runner).unwrap();
        }

        let response = handler
            .handle_command(Command::Results {
                commit_id: "abc123".to_string(),
                payload: b"hello world".to_vec(),
            })
            .await;
        assert_eq!(response, "OK");
        assert_eq!(
            state.lock().await.commit_state("abc123"),
            Some(CommitState::Completed)
        );
        assert_eq!(
            store.load("abc123").await.unwrap(),
            Some(b"hello world".to_vec())
        );
    }

    #[tokio::test]
    async fn test_results_for_unknown_commit_acknowledged() {
        let (handler, state, store, _) = handler(false);
        let response = handler
            .handle_command(Command::Results {
                commit_id: "ghost".to_string(),
                payload: b"data".to_vec(),
            })
            .await;
        assert_eq!(response, "OK");
        assert_eq!(state.lock().await.commit_state("ghost"), None);
        assert_eq!(store.load("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_results_not_saved_are_requeued() {
        let state = CoordinatorState::shared();
        let (queue, mut rx) = DispatchQueue::channel();
        let handler = ConnectionHandler::new(
            Arc::clone(&state),
            queue,
            Arc::new(FailingStore),
            false,
            Duration::from_secs(1),
        );
        let runner = {
            let mut s = state.lock().await;
            let runner = s.register_runner(RunnerEndpoint::new("localhost", 9001));
            s.submit("abc123");
            s.ledger.claim("abc123");
            s.reserve_runner(runner, "abc123");
            s.confirm_dispatch("abc123", runner).unwrap();
            runner
        };

        let response = handler
            .handle_command(Command::Results {
                commit_id: "abc123".to_string(),
                payload: b"hello".to_vec(),
            })
            .await;
        assert_eq!(response, "OK");

        let s = state.lock().await;
        assert_eq!(s.commit_state("abc123"), Some(CommitState::Pending));
        assert!(s.registry.get(runner).unwrap().is_idle());
        assert_eq!(rx.try_recv().unwrap(), "abc123");
    }
}
