//! In-process storage collaborator: a flat key/value map that publishes every
//! committed write as a mutation event and answers hydration requests.

use anyhow::Context;
use qwatch::engine::types::CacheStore;
use qwatch::{wildcard_match, MutationEvent, Snapshot, SnapshotRequest, StoredValue};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct Storage {
    data: Arc<RwLock<CacheStore>>,
    mutations: mpsc::Sender<MutationEvent>,
}

impl Storage {
    pub fn new(mutations: mpsc::Sender<MutationEvent>) -> Self {
        Self {
            data: Arc::new(RwLock::new(CacheStore::default())),
            mutations,
        }
    }

    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: StoredValue) -> anyhow::Result<()> {
        // The write lock is held until the event is queued, so events leave in commit order
        let mut data = self.data.write().await;
        data.insert(SmolStr::new(key), value.clone());
        self.mutations
            .send(MutationEvent::set(key, value))
            .await
            .context("Mutation stream closed")?;
        Ok(())
    }

    /// Returns the number of removed keys.
    #[instrument(skip(self))]
    pub async fn del(&self, key: &str) -> anyhow::Result<usize> {
        let mut data = self.data.write().await;
        if data.shift_remove(key).is_none() {
            return Ok(0);
        }
        self.mutations
            .send(MutationEvent::del(key))
            .await
            .context("Mutation stream closed")?;
        Ok(1)
    }

    pub async fn get(&self, key: &str) -> Option<StoredValue> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn snapshot(&self, pattern: &str) -> Snapshot {
        self.data
            .read()
            .await
            .iter()
            .filter(|(key, _)| wildcard_match(pattern, key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Answer hydration requests until shutdown.
    pub async fn serve_snapshots(
        self,
        mut requests: mpsc::Receiver<SnapshotRequest>,
        shutdown: CancellationToken,
    ) {
        info!("Snapshot server started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => {
                        let snapshot = self.snapshot(&request.pattern).await;
                        debug!(pattern = %request.pattern, rows = snapshot.len(), "Serving snapshot");
                        if request.reply.send(snapshot).is_err() {
                            warn!(pattern = %request.pattern, "Snapshot requester went away");
                        }
                    }
                    None => break,
                },
            }
        }
        info!("Snapshot server stopped");
    }
}
