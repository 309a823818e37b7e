use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use ci_core::{
    models::{CommitState, CommitSummary, RunnerEndpoint, RunnerId, RunnerInfo},
    CoordinatorError, CoordinatorResult,
};

use crate::ledger::CommitLedger;
use crate::registry::RunnerRegistry;

/// 注册表与账本共用一把锁，跨两者的操作在同一个临界区内完成
pub type SharedState = Arc<Mutex<CoordinatorState>>;

/// 调度器的全部共享状态
///
/// 持锁期间不做任何网络调用。
#[derive(Debug, Default)]
pub struct CoordinatorState {
    pub registry: RunnerRegistry,
    pub ledger: CommitLedger,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn register_runner(&mut self, endpoint: RunnerEndpoint) -> RunnerId {
        let id = self.registry.register(endpoint);
        metrics::gauge!("ci_runners_registered").set(self.registry.len() as f64);
        id
    }

    pub fn has_runners(&self) -> bool {
        !self.registry.is_empty()
    }

    /// 接收新的提交
    pub fn submit(&mut self, commit_id: &str) -> bool {
        let inserted = self.ledger.mark_pending(commit_id);
        if inserted {
            metrics::gauge!("ci_pending_commits").set(self.ledger.summary().pending as f64);
        }
        inserted
    }

    /// 为提交预留一个空闲执行器
    pub fn reserve_runner(&mut self, runner: RunnerId, commit_id: &str) -> bool {
        if !self.ledger.is_claimed(commit_id) {
            warn!("提交 {} 未被认领，拒绝预留执行器 {}", commit_id, runner);
            return false;
        }
        self.registry.reserve(runner, commit_id)
    }

    pub fn release_runner(&mut self, runner: RunnerId, commit_id: &str) {
        self.registry.release(runner, commit_id);
    }

    /// 执行器接受了 runtest：同时更新账本与注册表
    ///
    /// 如果执行器在通信期间已被驱逐，返回错误，提交保持认领状态。
    pub fn confirm_dispatch(&mut self, commit_id: &str, runner: RunnerId) -> CoordinatorResult<()> {
        if !self.registry.is_reserved_for(runner, commit_id)? {
            return Err(CoordinatorError::InvalidTransition(format!(
                "执行器 {runner} 未为提交 {commit_id} 预留"
            )));
        }
        self.ledger.mark_dispatched(commit_id, runner)?;
        self.registry.assign(runner, commit_id)?;
        metrics::gauge!("ci_pending_commits").set(self.ledger.summary().pending as f64);
        Ok(())
    }

    /// 收到结果：提交转为已完成，执行器恢复空闲
    pub fn complete(&mut self, commit_id: &str) -> CoordinatorResult<RunnerId> {
        let runner = self.ledger.mark_completed(commit_id)?;
        if !self.registry.finish(runner, commit_id) {
            debug!("执行器 {} 已不在注册表中，跳过状态复位", runner);
        }
        Ok(runner)
    }

    /// 驱逐执行器，并把它持有的提交放回待分发
    pub fn evict_runner(&mut self, runner: RunnerId) -> CoordinatorResult<Option<String>> {
        let held = self.registry.evict(runner)?;
        let recovered = self.ledger.recover(runner);
        if held != recovered {
            warn!(
                "执行器 {} 的注册表记录 {:?} 与账本记录 {:?} 不一致",
                runner, held, recovered
            );
        }
        metrics::gauge!("ci_runners_registered").set(self.registry.len() as f64);
        metrics::gauge!("ci_pending_commits").set(self.ledger.summary().pending as f64);
        Ok(recovered)
    }

    pub fn runners(&self) -> Vec<RunnerInfo> {
        self.registry.list()
    }

    pub fn commit_state(&self, commit_id: &str) -> Option<CommitState> {
        self.ledger.state_of(commit_id)
    }

    pub fn summary(&self) -> CommitSummary {
        self.ledger.summary()
    }
}
