//! 调度器服务
//!
//! 接收提交、维护执行器注册表与提交账本，并把每个待分发提交交给一个空闲执行器。
//! [`Coordinator`] 把各组件组装起来：
//!
//! - [`ConnectionHandler`]：每个入站连接处理一条命令
//! - [`DispatchEngine`]：为提交寻找接受它的执行器
//! - [`LivenessMonitor`]：驱逐失效执行器并回收提交
//! - [`Redistributor`]：重新分发未被认领的待分发提交

pub mod connection_handler;
pub mod coordinator;
pub mod dispatch_engine;
pub mod ledger;
pub mod liveness_monitor;
pub mod redistributor;
pub mod registry;
pub mod result_store;
pub mod state;

pub use connection_handler::ConnectionHandler;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use dispatch_engine::{DispatchEngine, DispatchOutcome, DispatchQueue};
pub use ledger::CommitLedger;
pub use liveness_monitor::{Eviction, LivenessMonitor, LivenessMonitorConfig};
pub use redistributor::Redistributor;
pub use registry::RunnerRegistry;
pub use result_store::{FileResultStore, ResultStore};
pub use state::{CoordinatorState, SharedState};
