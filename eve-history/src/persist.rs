//! Saving and restoring the ring log, so that history survives restarts.

use crate::entry::HistoryEntry;
use crate::error::PersistError;
use crate::options::RetryPolicy;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use log::{debug, error, trace, warn};
use serde_derive::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;

/// The persisted form of a ring log, plus whatever extra data the accessory asked to keep.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub first_entry: u32,
    pub last_entry: u32,
    pub used_memory: u32,
    pub ref_time: u32,
    pub initial_time: u32,
    pub history: Vec<Option<HistoryEntry>>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Somewhere snapshots can be kept, addressed by key.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Read the snapshot with the given key, or `None` if there is none.
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the snapshot with the given key.
    async fn write(&self, key: &str, data: &[u8]) -> io::Result<()>;
}

/// Stores each snapshot as a JSON file in a directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        // Write to a temporary file first so a crash never leaves a truncated snapshot.
        let path = self.path(key);
        let temporary = self.path(&format!("{}.tmp", key));
        fs::write(&temporary, data).await?;
        fs::rename(&temporary, &path).await
    }
}

/// The key under which the snapshot for an accessory is stored: the host name up to its first
/// dot, then the accessory name.
pub fn snapshot_key(host: &str, accessory_name: &str) -> String {
    let host = host.split('.').next().unwrap_or(host);
    format!("{}_{}_persist.json", host, accessory_name)
}

/// The name of this machine, used to keep snapshots of different hosts apart.
pub fn local_host() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Failed to get host name, using localhost: {}", e);
            "localhost".to_owned()
        }
    }
}

/// Serialises snapshot writes for one history.
///
/// At most one write is in flight at a time. A snapshot submitted while a write is in progress
/// waits in a single pending slot, replacing any snapshot already waiting there, so only the
/// latest state is written once the current write completes.
pub struct PersistenceGateway {
    key: String,
    store: Arc<dyn SnapshotStore>,
    retry: RetryPolicy,
    writer: Arc<Writer>,
}

struct Writer {
    state: Mutex<WriterState>,
    /// Whether the writer task is running.
    busy: watch::Sender<bool>,
}

#[derive(Default)]
struct WriterState {
    pending: Option<Vec<u8>>,
    running: bool,
}

impl PersistenceGateway {
    pub fn new(key: String, store: Arc<dyn SnapshotStore>, retry: RetryPolicy) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            key,
            store,
            retry,
            writer: Arc::new(Writer {
                state: Mutex::new(WriterState::default()),
                busy,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read and decode the stored snapshot, if there is one.
    pub async fn read(&self) -> Result<Option<Snapshot>, PersistError> {
        let data = self
            .store
            .read(&self.key)
            .await
            .map_err(|source| PersistError::Io {
                key: self.key.clone(),
                source,
            })?;
        match data {
            None => Ok(None),
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|source| PersistError::Decode {
                    key: self.key.clone(),
                    source,
                }),
        }
    }

    /// Queue a snapshot to be written in the background. This must be called from within a
    /// Tokio runtime.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let data = serde_json::to_vec(snapshot).map_err(|source| PersistError::Encode {
            key: self.key.clone(),
            source,
        })?;

        let start = {
            let mut state = self
                .writer
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if state.pending.replace(data).is_some() {
                trace!("Replacing pending write of {}", self.key);
            }
            if state.running {
                false
            } else {
                state.running = true;
                self.writer.busy.send_replace(true);
                true
            }
        };
        if start {
            tokio::spawn(run_writer(
                self.key.clone(),
                self.store.clone(),
                self.retry,
                self.writer.clone(),
            ));
        }
        Ok(())
    }

    /// Wait until every queued snapshot has been written or given up on.
    pub async fn flush(&self) {
        let mut busy = self.writer.busy.subscribe();
        // The sender lives as long as self, so this can't fail.
        let _ = busy.wait_for(|busy| !*busy).await;
    }
}

async fn run_writer(
    key: String,
    store: Arc<dyn SnapshotStore>,
    retry: RetryPolicy,
    writer: Arc<Writer>,
) {
    loop {
        let data = {
            let mut state = writer.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.pending.take() {
                Some(data) => data,
                None => {
                    state.running = false;
                    writer.busy.send_replace(false);
                    return;
                }
            }
        };
        match write_with_retry(store.as_ref(), &key, &data, retry).await {
            Ok(()) => debug!("Wrote {} bytes to {}", data.len(), key),
            Err(e) => error!("{}", e),
        }
    }
}

async fn write_with_retry(
    store: &dyn SnapshotStore,
    key: &str,
    data: &[u8],
    retry: RetryPolicy,
) -> Result<(), PersistError> {
    let delay = Duration::from_millis(retry.initial_delay_ms);
    let mut backoff = ExponentialBackoff::default();
    backoff.initial_interval = delay;
    backoff.current_interval = delay;
    backoff.max_interval = delay * 64;
    backoff.max_elapsed_time = None;

    let mut attempts = 0;
    backoff::future::retry(backoff, || {
        attempts += 1;
        let attempt = attempts;
        async move {
            store.write(key, data).await.map_err(|e| {
                if attempt > retry.max_retries {
                    backoff::Error::permanent(e)
                } else {
                    warn!("Writing {} failed (attempt {}), retrying: {}", key, attempt, e);
                    backoff::Error::transient(e)
                }
            })
        }
    })
    .await
    .map_err(|source| PersistError::RetriesExhausted {
        key: key.to_owned(),
        attempts,
        source,
    })
}
