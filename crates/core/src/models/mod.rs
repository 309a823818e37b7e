//! # 数据模型
//!
//! 调度器的核心数据结构：测试执行器（Runner）与提交（Commit）。
//!
//! ## 提交状态流转
//! ```text
//! Pending → Dispatched(runner) → Completed
//!    ↑            │
//!    └────────────┘  (执行器存活检测失败)
//! ```
//!
//! ## 执行器槽位状态
//! ```text
//! Idle → Reserved(commit) → Busy(commit) → Idle
//!            │
//!            └→ Idle  (runtest 被拒绝或超时)
//! ```

pub mod commit;
pub mod runner;

pub use commit::*;
pub use runner::*;
