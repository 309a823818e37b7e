use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行器槽位ID，每次注册分配一个新的ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunnerId(pub u64);

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runner-{}", self.0)
    }
}

/// 执行器网络地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunnerEndpoint {
    pub host: String,
    pub port: u16,
}

impl RunnerEndpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RunnerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 执行器槽位状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerSlot {
    /// 空闲，可以接受新提交
    #[serde(rename = "IDLE")]
    Idle,
    /// 正在向该执行器发送 runtest，等待应答
    #[serde(rename = "RESERVED")]
    Reserved(String),
    /// 已接受提交，正在执行测试
    #[serde(rename = "BUSY")]
    Busy(String),
}

/// 执行器信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub id: RunnerId,
    pub endpoint: RunnerEndpoint,
    pub slot: RunnerSlot,
    pub registered_at: DateTime<Utc>,
}

impl RunnerInfo {
    /// 创建新的执行器信息
    pub fn new(id: RunnerId, endpoint: RunnerEndpoint) -> Self {
        Self {
            id,
            endpoint,
            slot: RunnerSlot::Idle,
            registered_at: Utc::now(),
        }
    }

    /// 检查执行器是否可以接受新提交
    pub fn is_idle(&self) -> bool {
        matches!(self.slot, RunnerSlot::Idle)
    }

    /// 执行器当前正在执行的提交
    pub fn current_commit(&self) -> Option<&str> {
        match &self.slot {
            RunnerSlot::Busy(commit_id) => Some(commit_id),
            _ => None,
        }
    }
}
