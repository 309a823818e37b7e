//! A fake test runner for integration tests
//!
//! Listens on an ephemeral port and speaks the runner side of the protocol:
//! accepts `runtest` only while idle, answers `ping` with `pong`, and can
//! register itself and report results to a coordinator.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use ci_core::{
    protocol::{read_command, RESPONSE_OK, RESPONSE_PONG},
    Command, CoordinatorError, CoordinatorResult, RunnerEndpoint, Transport,
};

use crate::helpers::TestEnv;

/// Response sent when the runner refuses a `runtest`
pub const RESPONSE_BUSY: &str = "BUSY";

#[derive(Debug, Default)]
struct RunnerState {
    current: Option<String>,
    received: Vec<String>,
    pings: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RunnerState>,
    accepting: AtomicBool,
    answering_pings: AtomicBool,
    hold_after_accept_ms: AtomicU64,
}

pub struct FakeRunner {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
    transport: Transport,
}

impl FakeRunner {
    /// Start a runner on `127.0.0.1:<ephemeral>`
    pub async fn start() -> CoordinatorResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(RunnerState::default()),
            accepting: AtomicBool::new(true),
            answering_pings: AtomicBool::new(true),
            hold_after_accept_ms: AtomicU64::new(0),
        });

        let task = tokio::spawn(serve(listener, Arc::clone(&shared)));
        debug!("fake runner listening on {}", addr);

        Ok(Self {
            addr,
            shared,
            task: Some(task),
            transport: Transport::new(Duration::from_secs(2)),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> RunnerEndpoint {
        RunnerEndpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Send `register:<host>:<port>` to the coordinator
    pub async fn register(&self, coordinator: SocketAddr) -> CoordinatorResult<String> {
        let command = Command::Register {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        };
        self.send(coordinator, &command).await
    }

    /// Report results for the commit currently held and become idle again
    pub async fn report_results(
        &self,
        coordinator: SocketAddr,
        payload: &[u8],
    ) -> CoordinatorResult<String> {
        let commit_id = self
            .current()
            .ok_or_else(|| CoordinatorError::Internal("fake runner holds no commit".to_string()))?;
        let command = Command::Results {
            commit_id,
            payload: payload.to_vec(),
        };
        let response = self.send(coordinator, &command).await?;
        self.lock().current = None;
        Ok(response)
    }

    async fn send(&self, coordinator: SocketAddr, command: &Command) -> CoordinatorResult<String> {
        let endpoint = RunnerEndpoint::new(coordinator.ip().to_string(), coordinator.port());
        self.transport.send(&endpoint, command).await
    }

    /// Refuse every `runtest` with `BUSY`
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Close `ping` connections without answering
    pub fn set_answering_pings(&self, answering: bool) {
        self.shared.answering_pings.store(answering, Ordering::SeqCst);
    }

    /// After answering `OK` to a `runtest`, keep the connection open for
    /// `hold` before closing it, like a runner that starts the tests inline
    pub fn set_hold_after_accept(&self, hold: Duration) {
        self.shared
            .hold_after_accept_ms
            .store(hold.as_millis() as u64, Ordering::SeqCst);
    }

    /// Stop listening; later connections are refused
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn current(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Every commit this runner has accepted, in order
    pub fn received(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    pub fn pings(&self) -> usize {
        self.lock().pings
    }

    /// Wait until the runner holds `commit_id`
    pub async fn wait_for_commit(&self, commit_id: &str, timeout: Duration) -> bool {
        TestEnv::wait_for(
            || async { self.current().as_deref() == Some(commit_id) },
            timeout,
        )
        .await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for FakeRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) {
    while let Ok((stream, _)) = listener.accept().await {
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            if let Err(e) = handle(stream, &shared).await {
                debug!("fake runner connection failed: {}", e);
            }
        });
    }
}

async fn handle(mut stream: TcpStream, shared: &Shared) -> CoordinatorResult<()> {
    let command = read_command(&mut stream).await?;
    let mut hold = Duration::ZERO;
    let response = match command {
        Command::Ping => {
            if !shared.answering_pings.load(Ordering::SeqCst) {
                return Ok(());
            }
            lock_state(shared).pings += 1;
            RESPONSE_PONG.to_string()
        }
        Command::RunTest { commit_id } => {
            let mut state = lock_state(shared);
            if shared.accepting.load(Ordering::SeqCst) && state.current.is_none() {
                state.current = Some(commit_id.clone());
                state.received.push(commit_id);
                hold = Duration::from_millis(shared.hold_after_accept_ms.load(Ordering::SeqCst));
                RESPONSE_OK.to_string()
            } else {
                RESPONSE_BUSY.to_string()
            }
        }
        other => format!("unexpected {}", other.keyword()),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    if !hold.is_zero() {
        tokio::time::sleep(hold).await;
    }
    stream.shutdown().await?;
    Ok(())
}

fn lock_state(shared: &Shared) -> std::sync::MutexGuard<'_, RunnerState> {
    shared
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runner_accepts_one_commit_at_a_time() {
        let runner = FakeRunner::start().await.unwrap();
        let transport = Transport::new(Duration::from_secs(1));
        let endpoint = runner.endpoint();

        let first = Command::RunTest {
            commit_id: "a".to_string(),
        };
        let second = Command::RunTest {
            commit_id: "b".to_string(),
        };
        assert_eq!(transport.send(&endpoint, &first).await.unwrap(), "OK");
        assert_eq!(transport.send(&endpoint, &second).await.unwrap(), RESPONSE_BUSY);
        assert_eq!(transport.send(&endpoint, &Command::Ping).await.unwrap(), "pong");
        assert_eq!(runner.received(), vec!["a".to_string()]);
        assert_eq!(runner.pings(), 1);
    }

    #[tokio::test]
    async fn test_runner_holding_connection_still_answers_ok() {
        let runner = FakeRunner::start().await.unwrap();
        runner.set_hold_after_accept(Duration::from_secs(2));
        let transport = Transport::new(Duration::from_millis(500));

        let command = Command::RunTest {
            commit_id: "a".to_string(),
        };
        assert_eq!(transport.send(&runner.endpoint(), &command).await.unwrap(), "OK");
        assert_eq!(runner.current().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_stopped_runner_refuses_connections() {
        let mut runner = FakeRunner::start().await.unwrap();
        let endpoint = runner.endpoint();
        runner.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let transport = Transport::new(Duration::from_millis(500));
        assert!(transport.send(&endpoint, &Command::Ping).await.is_err());
    }
}
