use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use ci_core::{
    models::{CommitState, CommitSummary, RunnerId},
    CoordinatorError, CoordinatorResult,
};

/// 账本保留的已完成提交数量上限，超出后最早完成的记录被遗忘
///
/// 结果本身已经落盘，这里只用于 `state_of` 查询最近完成的提交。
pub const COMPLETED_HISTORY: usize = 1024;

/// 提交账本：每个提交处于 待分发 / 已分发 / 已完成 中的唯一一种状态
///
/// 待分发的提交可以被某条分发路径"认领"，认领后其他路径不会再对它发起分发。
/// 被认领的提交在外部看来仍处于待分发状态。
#[derive(Debug, Default)]
pub struct CommitLedger {
    pending: VecDeque<String>,
    claimed: HashSet<String>,
    dispatched: HashMap<String, RunnerId>,
    completed: HashSet<String>,
    completed_order: VecDeque<String>,
}

impl CommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记为待分发。已在待分发或已分发状态时不做任何事并返回 false；
    /// 已完成的提交再次提交视为新的测试请求
    pub fn mark_pending(&mut self, commit_id: &str) -> bool {
        if self.is_pending(commit_id) || self.dispatched.contains_key(commit_id) {
            return false;
        }
        if self.completed.remove(commit_id) {
            self.completed_order.retain(|c| c != commit_id);
        }
        self.pending.push_back(commit_id.to_string());
        true
    }

    /// 认领待分发的提交，已被认领或不在待分发状态时返回 false
    pub fn claim(&mut self, commit_id: &str) -> bool {
        if !self.is_pending(commit_id) || self.claimed.contains(commit_id) {
            return false;
        }
        self.claimed.insert(commit_id.to_string());
        true
    }

    /// 放弃认领，提交仍保持待分发
    pub fn unclaim(&mut self, commit_id: &str) -> bool {
        self.claimed.remove(commit_id)
    }

    pub fn is_claimed(&self, commit_id: &str) -> bool {
        self.claimed.contains(commit_id)
    }

    /// 记录分发结果。提交必须处于待分发状态，执行器不能同时持有其他提交
    pub fn mark_dispatched(&mut self, commit_id: &str, runner: RunnerId) -> CoordinatorResult<()> {
        if let Some(existing) = self.dispatched.get(commit_id) {
            return Err(CoordinatorError::InvalidTransition(format!(
                "提交 {commit_id} 已分发到执行器 {existing}"
            )));
        }
        if let Some((held, _)) = self.dispatched.iter().find(|(_, r)| **r == runner) {
            return Err(CoordinatorError::InvalidTransition(format!(
                "执行器 {runner} 正在执行提交 {held}"
            )));
        }
        let Some(index) = self.pending.iter().position(|c| c == commit_id) else {
            return Err(CoordinatorError::InvalidTransition(format!(
                "提交 {commit_id} 不在待分发状态"
            )));
        };

        self.pending.remove(index);
        self.claimed.remove(commit_id);
        self.dispatched.insert(commit_id.to_string(), runner);
        debug!("提交 {} 已分发到执行器 {}", commit_id, runner);
        Ok(())
    }

    /// 收到结果：已分发 → 已完成，返回原先执行它的执行器
    pub fn mark_completed(&mut self, commit_id: &str) -> CoordinatorResult<RunnerId> {
        let runner = self
            .dispatched
            .remove(commit_id)
            .ok_or_else(|| CoordinatorError::unknown_commit(commit_id))?;
        self.remember_completed(commit_id);
        Ok(runner)
    }

    /// 执行器失效：把它持有的提交放回待分发队列末尾
    pub fn recover(&mut self, runner: RunnerId) -> Option<String> {
        let commit_id = self
            .dispatched
            .iter()
            .find(|(_, r)| **r == runner)
            .map(|(c, _)| c.clone())?;

        self.dispatched.remove(&commit_id);
        self.pending.push_back(commit_id.clone());
        debug!("提交 {} 从执行器 {} 回收为待分发", commit_id, runner);
        Some(commit_id)
    }

    fn remember_completed(&mut self, commit_id: &str) {
        if !self.completed.insert(commit_id.to_string()) {
            return;
        }
        self.completed_order.push_back(commit_id.to_string());
        while self.completed_order.len() > COMPLETED_HISTORY {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }

    fn is_pending(&self, commit_id: &str) -> bool {
        self.pending.iter().any(|c| c == commit_id)
    }

    /// 所有待分发提交（含已认领），按加入顺序
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    /// 尚未被认领的待分发提交，按加入顺序
    pub fn unclaimed_pending(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|c| !self.claimed.contains(*c))
            .cloned()
            .collect()
    }

    pub fn assignment_of(&self, commit_id: &str) -> Option<RunnerId> {
        self.dispatched.get(commit_id).copied()
    }

    pub fn state_of(&self, commit_id: &str) -> Option<CommitState> {
        if let Some(runner) = self.dispatched.get(commit_id) {
            Some(CommitState::Dispatched(*runner))
        } else if self.is_pending(commit_id) {
            Some(CommitState::Pending)
        } else if self.completed.contains(commit_id) {
            Some(CommitState::Completed)
        } else {
            None
        }
    }

    /// `completed` 只统计仍保留在历史中的提交
    pub fn summary(&self) -> CommitSummary {
        CommitSummary {
            pending: self.pending.len(),
            claimed: self.claimed.len(),
            dispatched: self.dispatched.len(),
            completed: self.completed.len(),
        }
    }
}
