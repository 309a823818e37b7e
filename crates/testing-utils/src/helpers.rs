//! Test helper utilities and common testing patterns

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::time::sleep;

use ci_core::{config::DispatcherConfig, CoordinatorResult, Transport};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(20)).await
    }

    /// Wait for a condition with a custom poll interval
    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }

        condition().await
    }
}

/// Integration test setup helpers
pub struct IntegrationTestSetup;

impl IntegrationTestSetup {
    /// Set up logging for tests (call once per test binary)
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }

    /// Dispatcher config on an ephemeral port with short intervals
    pub fn dispatcher_config(results_dir: &Path) -> DispatcherConfig {
        DispatcherConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            results_dir: results_dir.to_path_buf(),
            monitor_interval_ms: 100,
            redistribute_interval_ms: 50,
            dispatch_retry_interval_ms: 50,
            runner_timeout_ms: 300,
            request_timeout_ms: 2_000,
            queue_when_no_runners: false,
            shutdown_timeout_seconds: 5,
        }
    }
}

/// Send one raw request to a coordinator and return its reply
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> CoordinatorResult<String> {
    Transport::new(Duration::from_secs(2))
        .communicate(&addr.ip().to_string(), addr.port(), request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_for_eventually_true() {
        let calls = AtomicUsize::new(0);
        let ok = TestEnv::wait_for(
            || async { calls.fetch_add(1, Ordering::SeqCst) >= 3 },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let ok = TestEnv::wait_for(|| async { false }, Duration::from_millis(50)).await;
        assert!(!ok);
    }

    #[test]
    fn test_dispatcher_config_is_valid() {
        let dir = std::env::temp_dir();
        let config = IntegrationTestSetup::dispatcher_config(&dir);
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 0);
    }
}
