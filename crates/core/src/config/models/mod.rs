pub mod app_config;
pub mod dispatcher;
pub mod observability;
pub mod observer;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use dispatcher::DispatcherConfig;
pub use observability::ObservabilityConfig;
pub use observer::ObserverConfig;
