use serde::{Deserialize, Serialize};

use super::RunnerId;

/// 提交的可观察状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitState {
    /// 等待分发（包括正在尝试分发的提交）
    #[serde(rename = "PENDING")]
    Pending,
    /// 已分发到某个执行器
    #[serde(rename = "DISPATCHED")]
    Dispatched(RunnerId),
    /// 已收到结果
    #[serde(rename = "COMPLETED")]
    Completed,
}

/// 提交状态统计
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub pending: usize,
    pub claimed: usize,
    pub dispatched: usize,
    pub completed: usize,
}

impl CommitSummary {
    pub fn active(&self) -> usize {
        self.pending + self.dispatched
    }
}
