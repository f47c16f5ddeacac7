//! Common utilities for qwatch integration tests
//!
//! Provides an in-memory storage double that answers hydration requests and a
//! running manager wired to it.

#![allow(dead_code)]

use qwatch::{
    wildcard_match, Manager, ManagerConfig, ManagerHandle, MutationEvent, QueryUpdate, RowKey,
    SnapshotRequest, StoredValue, SubscriberId,
};
use smol_str::SmolStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

pub const WAIT: Duration = Duration::from_millis(500);

/// Generate a unique subscriber id using ULID
pub fn generate_id() -> SubscriberId {
    SmolStr::new(Ulid::new().to_string())
}

/// Storage double: serves snapshots from a shared map and counts them.
#[derive(Clone, Default)]
pub struct FakeStorage {
    data: Arc<Mutex<Vec<(RowKey, StoredValue)>>>,
    hydrations: Arc<AtomicUsize>,
}

impl FakeStorage {
    pub fn with_rows(rows: &[(&str, StoredValue)]) -> Self {
        let storage = Self::default();
        {
            let mut data = storage.data.lock().unwrap();
            for (k, v) in rows {
                data.push((SmolStr::new(k), v.clone()));
            }
        }
        storage
    }

    pub fn hydrations(&self) -> usize {
        self.hydrations.load(Ordering::SeqCst)
    }

    /// Apply a write and return the event storage would emit for it.
    pub fn set(&self, key: &str, value: StoredValue) -> MutationEvent {
        let mut data = self.data.lock().unwrap();
        match data.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.clone(),
            None => data.push((SmolStr::new(key), value.clone())),
        }
        MutationEvent::set(key, value)
    }

    pub fn del(&self, key: &str) -> MutationEvent {
        self.data.lock().unwrap().retain(|(k, _)| k != key);
        MutationEvent::del(key)
    }

    fn snapshot(&self, pattern: &str) -> Vec<(RowKey, StoredValue)> {
        self.data
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| wildcard_match(pattern, k))
            .cloned()
            .collect()
    }

    async fn serve(self, mut requests: mpsc::Receiver<SnapshotRequest>) {
        while let Some(request) = requests.recv().await {
            self.hydrations.fetch_add(1, Ordering::SeqCst);
            let _ = request.reply.send(self.snapshot(&request.pattern));
        }
    }
}

pub struct Harness {
    pub handle: ManagerHandle,
    pub storage: FakeStorage,
    pub mutations: mpsc::Sender<MutationEvent>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn mutate(&self, event: MutationEvent) {
        self.mutations.send(event).await.unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn a manager and a storage double holding `rows`.
pub fn setup(rows: &[(&str, StoredValue)]) -> Harness {
    let storage = FakeStorage::with_rows(rows);
    let (snapshot_tx, snapshot_rx) = mpsc::channel(8);
    let (mutation_tx, mutation_rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();

    let (manager, handle) = Manager::new(ManagerConfig::default(), snapshot_tx);
    tokio::spawn(storage.clone().serve(snapshot_rx));
    tokio::spawn(manager.run(mutation_rx, shutdown.clone()));

    Harness {
        handle,
        storage,
        mutations: mutation_tx,
        shutdown,
    }
}

/// The `k`/`v` dataset used throughout the tests.
pub fn key_dataset() -> Vec<(&'static str, StoredValue)> {
    vec![
        ("k2", "v4".into()),
        ("k4", "v2".into()),
        ("k3", "v3".into()),
        ("k5", "v1".into()),
        ("k1", "v5".into()),
        ("k", "k".into()),
    ]
}

pub async fn next_update(rx: &mut mpsc::Receiver<QueryUpdate>) -> QueryUpdate {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for push")
        .expect("push channel closed")
}

/// Assert nothing arrives within a short window. A closed channel counts as
/// silence.
pub async fn assert_no_update(rx: &mut mpsc::Receiver<QueryUpdate>) {
    match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(update)) => panic!("unexpected push: {:?}", update),
    }
}
