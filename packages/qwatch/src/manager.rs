//! Subscription manager: keeps one row cache per fingerprint, applies mutation
//! events to it and pushes fresh results to every subscriber.
//!
//! Three tasks cooperate over shared state:
//! - the subscription loop owns every structural change (watch-list entries,
//!   cache creation and teardown) and is the only place hydration happens,
//! - the mutation loop updates cache contents in place and fans results out,
//! - the adhoc loop answers one-shot queries against existing caches.
//!
//! Lock order is always watch-list before caches. No lock is held across the
//! hydration round trip.

use crate::engine::compiler::compile;
use crate::engine::eval::execute;
use crate::engine::query::Query;
use crate::engine::types::{CacheStore, FastMap, MutationEvent, Operation, SnapshotRequest};
use crate::engine::update::{QueryUpdate, ResultRow};
use crate::engine::wildcard::wildcard_match;
use crate::error::{QueryError, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub type SubscriberId = SmolStr;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of the subscribe/unsubscribe request queue.
    pub subscription_buffer: usize,
    /// Capacity of the adhoc request queue.
    pub adhoc_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: 64,
            adhoc_buffer: 1000,
        }
    }
}

enum SubscriptionRequest {
    Subscribe {
        query: Arc<Query>,
        subscriber: SubscriberId,
        reply: mpsc::Sender<QueryUpdate>,
        ack: oneshot::Sender<Result<QueryUpdate>>,
    },
    Unsubscribe {
        query: Arc<Query>,
        subscriber: SubscriberId,
        ack: oneshot::Sender<()>,
    },
}

struct AdhocRequest {
    query: Arc<Query>,
    reply: oneshot::Sender<Result<Vec<ResultRow>>>,
}

/// Subscriber whose push failed; removed by the subscription loop.
struct Eviction {
    query_text: String,
    subscriber: SubscriberId,
    channel: mpsc::Sender<QueryUpdate>,
}

struct WatchEntry {
    query: Arc<Query>,
    subscribers: FastMap<SubscriberId, mpsc::Sender<QueryUpdate>>,
}

/// Snapshot of one watch-list entry taken by the mutation loop.
struct PushTarget {
    query_text: String,
    query: Arc<Query>,
    subscribers: Vec<(SubscriberId, mpsc::Sender<QueryUpdate>)>,
}

#[derive(Default)]
struct Shared {
    /// Canonical query text -> subscribers.
    watch_list: RwLock<FastMap<String, WatchEntry>>,
    /// Fingerprint -> cached rows.
    caches: RwLock<FastMap<SmolStr, CacheStore>>,
}

pub struct Manager {
    shared: Arc<Shared>,
    snapshots: mpsc::Sender<SnapshotRequest>,
    subscription_rx: mpsc::Receiver<SubscriptionRequest>,
    adhoc_rx: mpsc::Receiver<AdhocRequest>,
    eviction_tx: mpsc::UnboundedSender<Eviction>,
    eviction_rx: mpsc::UnboundedReceiver<Eviction>,
}

/// Cloneable entry point for the protocol layer.
#[derive(Clone)]
pub struct ManagerHandle {
    subscriptions: mpsc::Sender<SubscriptionRequest>,
    adhoc: mpsc::Sender<AdhocRequest>,
}

impl Manager {
    /// `snapshots` is the storage side of the hydration protocol.
    pub fn new(config: ManagerConfig, snapshots: mpsc::Sender<SnapshotRequest>) -> (Self, ManagerHandle) {
        let (subscription_tx, subscription_rx) = mpsc::channel(config.subscription_buffer.max(1));
        let (adhoc_tx, adhoc_rx) = mpsc::channel(config.adhoc_buffer.max(1));
        let (eviction_tx, eviction_rx) = mpsc::unbounded_channel();

        let manager = Self {
            shared: Arc::new(Shared::default()),
            snapshots,
            subscription_rx,
            adhoc_rx,
            eviction_tx,
            eviction_rx,
        };
        let handle = ManagerHandle {
            subscriptions: subscription_tx,
            adhoc: adhoc_tx,
        };
        (manager, handle)
    }

    /// Run the three loops until `shutdown` fires.
    pub async fn run(self, mutations: mpsc::Receiver<MutationEvent>, shutdown: CancellationToken) {
        info!("Query manager started");

        let Manager {
            shared,
            snapshots,
            subscription_rx,
            adhoc_rx,
            eviction_tx,
            eviction_rx,
        } = self;

        let subscriptions = tokio::spawn(subscription_loop(
            shared.clone(),
            snapshots,
            subscription_rx,
            eviction_rx,
            shutdown.clone(),
        ));
        let watcher = tokio::spawn(mutation_loop(
            shared.clone(),
            mutations,
            eviction_tx,
            shutdown.clone(),
        ));
        let adhoc = tokio::spawn(adhoc_loop(shared, adhoc_rx, shutdown));

        let (a, b, c) = tokio::join!(subscriptions, watcher, adhoc);
        for result in [a, b, c] {
            if let Err(e) = result {
                error!(error = %e, "Query manager loop terminated abnormally");
            }
        }

        info!("Query manager stopped");
    }
}

impl ManagerHandle {
    /// Compile `text`, register `subscriber` and return the initial result.
    ///
    /// Later results are pushed to `reply` with `try_send`; a full or closed
    /// channel drops the subscriber. An evaluation error is returned but the
    /// subscription stays registered.
    #[instrument(skip(self, reply), fields(subscriber = %subscriber))]
    pub async fn subscribe(
        &self,
        text: &str,
        subscriber: SubscriberId,
        reply: mpsc::Sender<QueryUpdate>,
    ) -> Result<QueryUpdate> {
        let query = Arc::new(compile(text)?);
        let (ack, ack_rx) = oneshot::channel();
        self.subscriptions
            .send(SubscriptionRequest::Subscribe {
                query,
                subscriber,
                reply,
                ack,
            })
            .await
            .map_err(|_| QueryError::ManagerClosed)?;
        ack_rx.await.map_err(|_| QueryError::ManagerClosed)?
    }

    /// Unknown queries or subscribers are ignored.
    #[instrument(skip(self), fields(subscriber = %subscriber))]
    pub async fn unsubscribe(&self, text: &str, subscriber: SubscriberId) -> Result<()> {
        let query = Arc::new(compile(text)?);
        let (ack, ack_rx) = oneshot::channel();
        self.subscriptions
            .send(SubscriptionRequest::Unsubscribe {
                query,
                subscriber,
                ack,
            })
            .await
            .map_err(|_| QueryError::ManagerClosed)?;
        ack_rx.await.map_err(|_| QueryError::ManagerClosed)
    }

    /// Run a compiled query against the cache of its fingerprint without
    /// subscribing. Fails with `FingerprintNotFound` when nobody watches it.
    #[instrument(skip(self, query), fields(fingerprint = %query.fingerprint))]
    pub async fn run_adhoc(&self, query: Arc<Query>) -> Result<Vec<ResultRow>> {
        let (reply, reply_rx) = oneshot::channel();
        self.adhoc
            .send(AdhocRequest { query, reply })
            .await
            .map_err(|_| QueryError::ManagerClosed)?;
        reply_rx.await.map_err(|_| QueryError::ManagerClosed)?
    }

    /// Compile and run an adhoc query.
    pub async fn query(&self, text: &str) -> Result<Vec<ResultRow>> {
        let query = Arc::new(compile(text)?);
        self.run_adhoc(query).await
    }
}

async fn subscription_loop(
    shared: Arc<Shared>,
    snapshots: mpsc::Sender<SnapshotRequest>,
    mut requests: mpsc::Receiver<SubscriptionRequest>,
    mut evictions: mpsc::UnboundedReceiver<Eviction>,
    shutdown: CancellationToken,
) {
    debug!("Subscription loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(eviction) = evictions.recv() => {
                shared
                    .remove_watcher(&eviction.query_text, &eviction.subscriber, Some(&eviction.channel))
                    .await;
            }
            request = requests.recv() => match request {
                Some(SubscriptionRequest::Subscribe { query, subscriber, reply, ack }) => {
                    let result = shared.add_watcher(&snapshots, &shutdown, query, subscriber, reply).await;
                    let _ = ack.send(result);
                }
                Some(SubscriptionRequest::Unsubscribe { query, subscriber, ack }) => {
                    shared.remove_watcher(&query.to_string(), &subscriber, None).await;
                    let _ = ack.send(());
                }
                None => break,
            },
        }
    }
    debug!("Subscription loop stopped");
}

async fn mutation_loop(
    shared: Arc<Shared>,
    mut mutations: mpsc::Receiver<MutationEvent>,
    evictions: mpsc::UnboundedSender<Eviction>,
    shutdown: CancellationToken,
) {
    debug!("Mutation loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = mutations.recv() => match event {
                Some(event) => shared.process_mutation(event, &evictions).await,
                None => {
                    info!("Mutation stream closed");
                    break;
                }
            },
        }
    }
    debug!("Mutation loop stopped");
}

async fn adhoc_loop(
    shared: Arc<Shared>,
    mut requests: mpsc::Receiver<AdhocRequest>,
    shutdown: CancellationToken,
) {
    debug!("Adhoc loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(AdhocRequest { query, reply }) => {
                    let result = shared.run_query(&query).await;
                    if let Err(e) = &result {
                        warn!(fingerprint = %query.fingerprint, error = %e, "Adhoc query failed");
                    }
                    let _ = reply.send(result);
                }
                None => break,
            },
        }
    }
    debug!("Adhoc loop stopped");
}

impl Shared {
    /// Register `subscriber` and evaluate the query once.
    ///
    /// The subscription stays registered when that evaluation fails; the
    /// error goes back to the caller and the next mutation event retries.
    #[instrument(skip_all, fields(fingerprint = %query.fingerprint, subscriber = %subscriber))]
    async fn add_watcher(
        &self,
        snapshots: &mpsc::Sender<SnapshotRequest>,
        shutdown: &CancellationToken,
        query: Arc<Query>,
        subscriber: SubscriberId,
        reply: mpsc::Sender<QueryUpdate>,
    ) -> Result<QueryUpdate> {
        let query_text = query.to_string();
        let fingerprint = query.fingerprint.clone();

        let cached = self.caches.read().await.contains_key(&fingerprint);
        let hydrated = if cached {
            None
        } else {
            Some(hydrate(snapshots, shutdown, &query.key_pattern).await?)
        };

        // Cache and watch entry become visible together, and the initial result
        // is computed before the mutation loop can target the new entry.
        let mut watch_list = self.watch_list.write().await;
        if let Some(cache) = hydrated {
            info!(pattern = %query.key_pattern, rows = cache.len(), "Created query cache");
            self.caches.write().await.insert(fingerprint.clone(), cache);
        }
        let entry = watch_list
            .entry(query_text.clone())
            .or_insert_with(|| WatchEntry {
                query: query.clone(),
                subscribers: FastMap::default(),
            });
        entry.subscribers.insert(subscriber, reply);
        debug!(query = %query_text, subscribers = entry.subscribers.len(), "Client watching query");

        let rows = self.run_query(&query).await;
        drop(watch_list);

        match rows {
            Ok(rows) => Ok(QueryUpdate::new(query_text, rows)),
            Err(e) => {
                warn!(query = %query_text, error = %e, "Initial evaluation failed, subscription kept");
                Err(e)
            }
        }
    }

    /// Remove `subscriber` from the entry for `query_text`. With `channel` set,
    /// only a registration on that same channel is removed.
    async fn remove_watcher(
        &self,
        query_text: &str,
        subscriber: &SubscriberId,
        channel: Option<&mpsc::Sender<QueryUpdate>>,
    ) {
        let mut watch_list = self.watch_list.write().await;

        let Some(entry) = watch_list.get_mut(query_text) else {
            debug!(query = %query_text, subscriber = %subscriber, "Unsubscribe for unwatched query");
            return;
        };
        match entry.subscribers.get(subscriber) {
            None => {
                debug!(query = %query_text, subscriber = %subscriber, "Unsubscribe for unknown subscriber");
            }
            Some(current) if channel.is_some_and(|c| !c.same_channel(current)) => {
                debug!(query = %query_text, subscriber = %subscriber, "Subscriber re-registered, eviction skipped");
                return;
            }
            Some(_) => {
                entry.subscribers.remove(subscriber);
                debug!(query = %query_text, subscriber = %subscriber, "Client no longer watching query");
            }
        }
        if !entry.subscribers.is_empty() {
            return;
        }

        let fingerprint = entry.query.fingerprint.clone();
        watch_list.remove(query_text);
        debug!(query = %query_text, "No longer watching query");

        let still_shared = watch_list.values().any(|e| e.query.fingerprint == fingerprint);
        if !still_shared {
            self.caches.write().await.remove(&fingerprint);
            info!(fingerprint = %fingerprint, "Dropped query cache");
        }
    }

    async fn process_mutation(&self, event: MutationEvent, evictions: &mpsc::UnboundedSender<Eviction>) {
        let targets: Vec<PushTarget> = {
            let watch_list = self.watch_list.read().await;
            watch_list
                .iter()
                .filter(|(_, entry)| wildcard_match(&entry.query.key_pattern, &event.key))
                .map(|(text, entry)| PushTarget {
                    query_text: text.clone(),
                    query: entry.query.clone(),
                    subscribers: entry
                        .subscribers
                        .iter()
                        .map(|(id, tx)| (id.clone(), tx.clone()))
                        .collect(),
                })
                .collect()
        };

        if targets.is_empty() {
            debug!(key = %event.key, "No query watches key");
            return;
        }

        {
            let mut caches = self.caches.write().await;
            let mut updated: FxHashSet<&SmolStr> = FxHashSet::default();
            for target in &targets {
                let fingerprint = &target.query.fingerprint;
                if !updated.insert(fingerprint) {
                    continue;
                }
                match caches.get_mut(fingerprint) {
                    Some(cache) => apply_event(cache, &event),
                    None => warn!(fingerprint = %fingerprint, "Fingerprint not found in cache store"),
                }
            }
        }

        debug!(
            key = %event.key,
            operation = event.operation.as_str(),
            queries = targets.len(),
            "Applied mutation"
        );

        for target in targets {
            let rows = match self.run_query(&target.query).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!(query = %target.query_text, error = %e, "Failed to re-run watched query");
                    continue;
                }
            };
            let update = QueryUpdate::new(target.query_text.clone(), rows);
            notify_subscribers(&target, &update, evictions);
        }
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<ResultRow>> {
        let caches = self.caches.read().await;
        let cache = caches
            .get(&query.fingerprint)
            .ok_or_else(|| QueryError::FingerprintNotFound(query.fingerprint.to_string()))?;
        Ok(execute(query, cache.iter().map(|(k, v)| (k.as_str(), v)))?)
    }
}

fn apply_event(cache: &mut CacheStore, event: &MutationEvent) {
    match (event.operation, &event.value) {
        (Operation::Set, Some(value)) => {
            cache.insert(event.key.clone(), value.clone());
        }
        (Operation::Set, None) | (Operation::Del, _) => {
            cache.shift_remove(&event.key);
        }
    }
}

/// Best-effort delivery: one `try_send` per subscriber. Failures only affect
/// the failing subscriber.
fn notify_subscribers(target: &PushTarget, update: &QueryUpdate, evictions: &mpsc::UnboundedSender<Eviction>) {
    for (subscriber, tx) in &target.subscribers {
        let reason = match tx.try_send(update.clone()) {
            Ok(()) => continue,
            Err(TrySendError::Full(_)) => "subscriber queue full",
            Err(TrySendError::Closed(_)) => "subscriber disconnected",
        };
        warn!(query = %target.query_text, subscriber = %subscriber, reason, "Dropping subscriber");
        let _ = evictions.send(Eviction {
            query_text: target.query_text.clone(),
            subscriber: subscriber.clone(),
            channel: tx.clone(),
        });
    }
}

async fn hydrate(
    snapshots: &mpsc::Sender<SnapshotRequest>,
    shutdown: &CancellationToken,
    pattern: &SmolStr,
) -> Result<CacheStore> {
    let (reply, reply_rx) = oneshot::channel();
    let exchange = async {
        snapshots
            .send(SnapshotRequest {
                pattern: pattern.clone(),
                reply,
            })
            .await
            .map_err(|_| QueryError::HydrationFailed("storage is not accepting snapshot requests".into()))?;
        reply_rx
            .await
            .map_err(|_| QueryError::HydrationFailed("storage dropped the snapshot request".into()))
    };

    let snapshot = tokio::select! {
        result = exchange => result?,
        _ = shutdown.cancelled() => return Err(QueryError::ManagerClosed),
    };

    // Cache contents are restricted to the key pattern
    let cache: CacheStore = snapshot
        .into_iter()
        .filter(|(key, _)| wildcard_match(pattern, key))
        .collect();
    Ok(cache)
}
