//! # CI Testing Utils
//!
//! Shared testing utilities for the CI coordinator workspace.
//!
//! ## Features
//!
//! - **Fake Runner**: a TCP test runner speaking the runner side of the wire protocol
//! - **Memory Result Store**: an in-memory `ResultStore`
//! - **State Builders**: seed a `CoordinatorState` with runners and commits
//! - **Integration Test Helpers**: polling, logging and short-interval configs
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! ci-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust,ignore
//! use ci_testing_utils::{FakeRunner, MemoryResultStore, TestEnv};
//! ```

pub mod builders;
pub mod fake_runner;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use fake_runner::*;
pub use helpers::*;
pub use mocks::*;
