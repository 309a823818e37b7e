use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ci_core::{
    config::DispatcherConfig, models::CommitSummary, CoordinatorError, CoordinatorResult,
    Transport,
};

use crate::connection_handler::ConnectionHandler;
use crate::dispatch_engine::{DispatchEngine, DispatchQueue};
use crate::liveness_monitor::{LivenessMonitor, LivenessMonitorConfig};
use crate::redistributor::Redistributor;
use crate::result_store::ResultStore;
use crate::state::{CoordinatorState, SharedState};

/// 调度器
///
/// 持有注册表与账本，启动监听循环和三个后台任务：
/// 执行器存活检测、重新分发循环、分发队列。
pub struct Coordinator {
    config: DispatcherConfig,
    store: Arc<dyn ResultStore>,
    state: SharedState,
}

impl Coordinator {
    pub fn new(config: DispatcherConfig, store: Arc<dyn ResultStore>) -> Self {
        Self {
            config,
            store,
            state: CoordinatorState::shared(),
        }
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// 绑定监听地址并启动所有任务
    pub async fn start(self) -> CoordinatorResult<CoordinatorHandle> {
        let bind_address = self.config.bind_address();
        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(|e| CoordinatorError::connection(bind_address.as_str(), e))?;
        let local_addr = listener.local_addr()?;
        info!("调度器监听于 {}", local_addr);

        let shutdown = CancellationToken::new();
        let (queue, rx) = DispatchQueue::channel();

        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&self.state),
            Transport::new(self.config.runner_timeout()),
            self.config.dispatch_retry_interval(),
            shutdown.clone(),
        ));
        let monitor = LivenessMonitor::new(
            Arc::clone(&self.state),
            LivenessMonitorConfig {
                interval: self.config.monitor_interval(),
                ping_timeout: self.config.runner_timeout(),
            },
        );
        let redistributor = Redistributor::new(
            Arc::clone(&self.state),
            queue.clone(),
            self.config.redistribute_interval(),
        );
        let handler = ConnectionHandler::new(
            Arc::clone(&self.state),
            queue,
            Arc::clone(&self.store),
            self.config.queue_when_no_runners,
            self.config.request_timeout(),
        );

        let tasks = vec![
            tokio::spawn(accept_loop(listener, handler, shutdown.clone())),
            tokio::spawn(engine.run_queue(rx)),
            {
                let token = shutdown.clone();
                tokio::spawn(async move { monitor.run(token).await })
            },
            {
                let token = shutdown.clone();
                tokio::spawn(async move { redistributor.run(token).await })
            },
        ];

        Ok(CoordinatorHandle {
            local_addr,
            state: self.state,
            shutdown,
            tasks,
        })
    }
}

/// 运行中的调度器
pub struct CoordinatorHandle {
    local_addr: SocketAddr,
    state: SharedState,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub async fn summary(&self) -> CommitSummary {
        self.state.lock().await.summary()
    }

    /// 通知所有任务停止并等待它们退出
    pub async fn shutdown(self) {
        info!("开始关闭调度器");
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!("调度器任务异常退出: {}", e);
            }
        }
        info!("调度器已停止");
    }
}

/// 接受入站连接，每个连接一个任务
async fn accept_loop(listener: TcpListener, handler: ConnectionHandler, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("收到停止信号，不再接受新连接");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("接受来自 {} 的连接", peer);
                        let handler = handler.clone();
                        connections.spawn(async move {
                            if let Err(e) = handler.handle(stream).await {
                                debug!("处理来自 {} 的连接失败: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("接受连接失败: {}", e);
                    }
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!("连接处理任务异常退出: {}", e);
                }
            }
        }
    }

    // 正在处理的请求允许完成
    if !connections.is_empty() {
        info!("等待 {} 个连接处理完成", connections.len());
    }
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!("连接处理任务异常退出: {}", e);
        }
    }
}
