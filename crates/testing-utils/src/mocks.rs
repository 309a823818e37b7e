//! In-memory implementations of the dispatcher's storage traits

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use ci_core::CoordinatorResult;
use ci_dispatcher::ResultStore;

/// In-memory `ResultStore`, last write wins
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    results: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.results.lock().await.len()
    }

    /// Number of `save` calls, including overwrites
    pub async fn writes(&self) -> usize {
        *self.writes.lock().await
    }

    pub async fn contains(&self, commit_id: &str) -> bool {
        self.results.lock().await.contains_key(commit_id)
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, commit_id: &str, payload: &[u8]) -> CoordinatorResult<()> {
        self.results
            .lock()
            .await
            .insert(commit_id.to_string(), payload.to_vec());
        *self.writes.lock().await += 1;
        Ok(())
    }

    async fn load(&self, commit_id: &str) -> CoordinatorResult<Option<Vec<u8>>> {
        Ok(self.results.lock().await.get(commit_id).cloned())
    }
}
