use anyhow::Context;
use qwatch::{Manager, ManagerConfig, ManagerHandle, QueryUpdate, StoredValue, SubscriberId};
use serde_json::{json, Value};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub mod protocol;
pub mod storage;
pub mod telemetry;

use protocol::Command;
use storage::Storage;

// --- Configuration ---

#[derive(Debug, Clone)]
pub struct Config {
    pub manager: ManagerConfig,
    /// Capacity of the storage -> manager mutation stream.
    pub mutation_buffer: usize,
    /// Capacity of each subscriber's push channel.
    pub push_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            mutation_buffer: 1024,
            push_buffer: 256,
        }
    }
}

fn env_or(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

pub fn load_config() -> Config {
    let defaults = Config::default();
    Config {
        manager: ManagerConfig {
            subscription_buffer: env_or(
                "QWATCH_SUBSCRIPTION_BUFFER",
                defaults.manager.subscription_buffer,
            ),
            adhoc_buffer: env_or("QWATCH_ADHOC_BUFFER", defaults.manager.adhoc_buffer),
        },
        mutation_buffer: env_or("QWATCH_MUTATION_BUFFER", defaults.mutation_buffer),
        push_buffer: env_or("QWATCH_PUSH_BUFFER", defaults.push_buffer),
    }
}

// --- Session ---

/// Executes protocol commands against storage and the query manager. Every
/// response and every push is sent to `output` as one JSON value.
pub struct Session {
    storage: Storage,
    manager: ManagerHandle,
    push_buffer: usize,
    output: mpsc::UnboundedSender<Value>,
}

impl Session {
    pub fn new(
        storage: Storage,
        manager: ManagerHandle,
        push_buffer: usize,
        output: mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self {
            storage,
            manager,
            push_buffer: push_buffer.max(1),
            output,
        }
    }

    /// Run one line. Blank lines produce no response.
    pub async fn execute(&self, line: &str) -> Option<Value> {
        if line.trim().is_empty() {
            return None;
        }
        let response = match self.dispatch(line).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Command failed");
                json!({ "error": e.to_string() })
            }
        };
        Some(response)
    }

    async fn dispatch(&self, line: &str) -> anyhow::Result<Value> {
        match Command::parse(line)? {
            Command::Set { key, value } => {
                self.storage.set(&key, StoredValue::infer(&value)).await?;
                Ok(json!("OK"))
            }
            Command::Del { key } => Ok(json!(self.storage.del(&key).await?)),
            Command::Get { key } => match self.storage.get(&key).await {
                Some(value) => Ok(serde_json::to_value(value)?),
                None => Ok(Value::Null),
            },
            Command::Watch { client, query } => self.watch(client, &query).await,
            Command::Unwatch { client, query } => {
                self.manager.unsubscribe(&query, client).await?;
                Ok(json!("OK"))
            }
            Command::Query { query } => {
                let rows = self.manager.query(&query).await?;
                Ok(serde_json::to_value(rows)?)
            }
        }
    }

    #[instrument(skip(self, query), fields(client = %client))]
    async fn watch(&self, client: SubscriberId, query: &str) -> anyhow::Result<Value> {
        let (tx, rx) = mpsc::channel(self.push_buffer);
        // A failed initial evaluation still leaves the subscription active
        tokio::spawn(forward_pushes(client.clone(), rx, self.output.clone()));
        let initial = self.manager.subscribe(query, client, tx).await?;
        Ok(initial.to_envelope())
    }
}

/// Relay pushes for one subscription until the manager drops it.
async fn forward_pushes(
    client: SubscriberId,
    mut pushes: mpsc::Receiver<QueryUpdate>,
    output: mpsc::UnboundedSender<Value>,
) {
    while let Some(update) = pushes.recv().await {
        if output.send(update.to_envelope()).is_err() {
            break;
        }
    }
    debug!(client = %client, "Push stream closed");
}

// --- Server ---

/// Wire storage and the query manager together and serve `input` until EOF or
/// until `stop` resolves.
pub async fn run<R, W, S>(config: Config, input: R, mut output: W, stop: S) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let shutdown = CancellationToken::new();
    let (mutation_tx, mutation_rx) = mpsc::channel(config.mutation_buffer.max(1));
    let (snapshot_tx, snapshot_rx) = mpsc::channel(16);

    let (manager, handle) = Manager::new(config.manager.clone(), snapshot_tx);
    let storage = Storage::new(mutation_tx);

    let snapshot_task = tokio::spawn(storage.clone().serve_snapshots(snapshot_rx, shutdown.clone()));
    let manager_task = tokio::spawn(manager.run(mutation_rx, shutdown.clone()));

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        while let Some(value) = out_rx.recv().await {
            let mut line = value.to_string();
            line.push('\n');
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let session = Session::new(storage, handle, config.push_buffer, out_tx.clone());
    info!("Ready");

    let mut lines = input.lines();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("Stop requested");
                break;
            }
            line = lines.next_line() => match line.context("Failed to read command")? {
                Some(line) => {
                    if let Some(response) = session.execute(&line).await {
                        if out_tx.send(response).is_err() {
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }

    drop(session);
    drop(out_tx);
    shutdown.cancel();
    if let Err(e) = manager_task.await {
        error!(error = %e, "Query manager task failed");
    }
    if let Err(e) = snapshot_task.await {
        error!(error = %e, "Snapshot task failed");
    }
    writer
        .await
        .context("Writer task failed")?
        .context("Failed to write response")?;

    info!("Shut down");
    Ok(())
}
