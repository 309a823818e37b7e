pub mod app;
pub mod common;
pub mod observer;
pub mod shutdown;
