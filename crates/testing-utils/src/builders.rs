//! Builders for seeding coordinator state in tests

use ci_core::{CoordinatorResult, RunnerEndpoint, RunnerId};
use ci_dispatcher::{CoordinatorState, SharedState};

/// Builder for a `CoordinatorState` with runners and commits already in place
#[derive(Default)]
pub struct StateBuilder {
    runners: Vec<RunnerEndpoint>,
    pending: Vec<String>,
    dispatched: Vec<(String, usize)>,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runner(mut self, host: &str, port: u16) -> Self {
        self.runners.push(RunnerEndpoint::new(host, port));
        self
    }

    pub fn with_pending(mut self, commit_id: &str) -> Self {
        self.pending.push(commit_id.to_string());
        self
    }

    /// Dispatch `commit_id` to the runner added at `runner_index`
    pub fn with_dispatched(mut self, commit_id: &str, runner_index: usize) -> Self {
        self.dispatched.push((commit_id.to_string(), runner_index));
        self
    }

    /// Build the state and return it with the runner ids in insertion order
    pub fn build(self) -> CoordinatorResult<(CoordinatorState, Vec<RunnerId>)> {
        let mut state = CoordinatorState::new();
        let ids: Vec<RunnerId> = self
            .runners
            .into_iter()
            .map(|endpoint| state.register_runner(endpoint))
            .collect();

        for commit_id in &self.pending {
            state.submit(commit_id);
        }

        for (commit_id, index) in &self.dispatched {
            let runner = ids[*index];
            state.submit(commit_id);
            state.ledger.claim(commit_id);
            state.reserve_runner(runner, commit_id);
            state.confirm_dispatch(commit_id, runner)?;
        }

        Ok((state, ids))
    }

    pub fn build_shared(self) -> CoordinatorResult<(SharedState, Vec<RunnerId>)> {
        let (state, ids) = self.build()?;
        Ok((
            std::sync::Arc::new(tokio::sync::Mutex::new(state)),
            ids,
        ))
    }
}
