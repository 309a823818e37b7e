//! 配置管理
//!
//! 配置加载顺序：
//! 1. 内置默认值
//! 2. TOML 配置文件（可选）
//! 3. 环境变量覆盖（前缀 `CI_`，层级分隔符 `__`，例如 `CI_DISPATCHER__PORT=9999`）
//!
//! 命令行参数由二进制入口在加载完成后覆盖。

pub mod models;

pub use models::{AppConfig, DispatcherConfig, ObservabilityConfig, ObserverConfig};
