//! # CI Core
//!
//! 调度器、观察者与测试执行器共享的基础组件：错误类型、配置模型、
//! 数据模型、协议编解码与传输层。

pub mod config;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod transport;

pub use config::{AppConfig, DispatcherConfig, ObservabilityConfig, ObserverConfig};
pub use errors::*;
pub use models::{CommitState, CommitSummary, RunnerEndpoint, RunnerId, RunnerInfo, RunnerSlot};
pub use protocol::Command;
pub use transport::Transport;
