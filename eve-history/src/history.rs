//! The history of a single accessory, tying together its ring log, sampling, transfer protocol
//! and persistence.

use crate::accessory::{AccessoryType, Routing};
use crate::codec::{self, hex};
use crate::entry::HistoryEntry;
use crate::error::{HistoryError, PersistError, SchemaError};
use crate::frame::FrameEncoder;
use crate::options::HistoryOptions;
use crate::persist::{local_host, snapshot_key, FileStore, PersistenceGateway, SnapshotStore};
use crate::ring::RingLog;
use crate::sampler::Sampler;
use crate::scheduler::{Scheduler, SubscriptionId, TickHandler};
use crate::schema::{Schema, Signature};
use crate::transfer::TransferSession;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::time;

/// Builder for a `History`.
pub struct HistoryBuilder {
    accessory_type: AccessoryType,
    name: String,
    options: HistoryOptions,
    custom_fields: Vec<Signature>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl Debug for HistoryBuilder {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("HistoryBuilder")
            .field("accessory_type", &self.accessory_type)
            .field("name", &self.name)
            .field("options", &self.options)
            .field("custom_fields", &self.custom_fields)
            .field("store", &self.store.as_ref().map(|_| "..."))
            .finish()
    }
}

impl HistoryBuilder {
    pub fn set_options(&mut self, options: HistoryOptions) {
        self.options = options;
    }

    /// Declare a field of a custom history by name, looking up its encoding in the table of known
    /// fields. Unknown names are logged and skipped.
    pub fn add_custom_field(&mut self, name: &str) -> Result<(), SchemaError> {
        match Signature::known(name) {
            Ok(signature) => {
                self.custom_fields.push(signature);
                Ok(())
            }
            Err(e) => {
                warn!("{}: {}", self.name, e);
                Err(e)
            }
        }
    }

    /// Declare a field of a custom history with an explicit encoding.
    pub fn register_custom_field(&mut self, signature: Signature) {
        self.custom_fields.push(signature);
    }

    /// Persist snapshots in the given store. Without a store the history is kept in memory only.
    pub fn set_store(&mut self, store: Arc<dyn SnapshotStore>) {
        self.store = Some(store);
    }

    /// Persist snapshots as files in the given directory.
    pub fn set_storage_path(&mut self, directory: impl Into<PathBuf>) {
        self.set_store(Arc::new(FileStore::new(directory)));
    }

    /// The key the snapshot is stored under.
    pub fn snapshot_key(&self) -> String {
        match &self.options.filename {
            Some(filename) => filename.clone(),
            None => {
                let host = self.options.host.clone().unwrap_or_else(local_host);
                snapshot_key(&host, &self.name)
            }
        }
    }

    /// Create the history, subscribe it to the scheduler if it needs ticks, and start loading its
    /// persisted snapshot in the background. This must be called from within a Tokio runtime.
    pub fn spawn(self, scheduler: &Scheduler) -> History {
        let schema = match self.accessory_type {
            AccessoryType::Custom => Schema::custom(self.custom_fields.clone()),
            accessory_type => Schema::fixed(accessory_type),
        };
        let routing = if self.options.disable_timer {
            Routing::Direct
        } else {
            self.accessory_type.routing()
        };
        let gateway = self.store.clone().map(|store| {
            PersistenceGateway::new(self.snapshot_key(), store, self.options.write_retry)
        });
        let (loaded, _) = watch::channel(gateway.is_none());

        let inner = Arc::new(Inner {
            name: self.name,
            accessory_type: self.accessory_type,
            routing,
            encoder: FrameEncoder::new(schema),
            gateway,
            loaded,
            state: Mutex::new(State {
                ring: RingLog::new(self.options.size),
                sampler: Sampler::new(!self.options.disable_repeat_last_data),
                transfer: TransferSession::new(),
                extra: serde_json::Value::Null,
            }),
            options: self.options,
        });

        let subscription = if routing == Routing::Direct {
            None
        } else {
            if !inner.ticks_match(scheduler) {
                warn!(
                    "{} wants to average every {:?} but the scheduler ticks every {:?}",
                    inner.name,
                    inner.options.tick_interval(),
                    scheduler.period()
                );
            }
            let weak = Arc::downgrade(&inner);
            let handler: Weak<dyn TickHandler> = weak;
            scheduler
                .subscribe(handler)
                .map(|id| (scheduler.clone(), id))
        };

        if inner.gateway.is_some() {
            tokio::spawn(load(inner.clone()));
        }

        History {
            inner,
            subscription,
        }
    }
}

/// The history of one accessory.
///
/// Entries are appended by the accessory's driver with `append_entry`. The history viewer reads
/// the status frame, sets a start address, and then pages through the data with `read_data`.
pub struct History {
    inner: Arc<Inner>,
    subscription: Option<(Scheduler, SubscriptionId)>,
}

struct Inner {
    name: String,
    accessory_type: AccessoryType,
    routing: Routing,
    options: HistoryOptions,
    encoder: FrameEncoder,
    gateway: Option<PersistenceGateway>,
    /// Whether the persisted snapshot has been loaded, or there is none to load.
    loaded: watch::Sender<bool>,
    state: Mutex<State>,
}

struct State {
    ring: RingLog,
    sampler: Sampler,
    transfer: TransferSession,
    extra: serde_json::Value,
}

impl Debug for History {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("History")
            .field("name", &self.inner.name)
            .field("accessory_type", &self.inner.accessory_type)
            .field("routing", &self.inner.routing)
            .finish()
    }
}

impl History {
    pub fn builder(accessory_type: AccessoryType, name: &str) -> HistoryBuilder {
        HistoryBuilder {
            accessory_type,
            name: name.to_owned(),
            options: HistoryOptions::default(),
            custom_fields: vec![],
            store: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn accessory_type(&self) -> AccessoryType {
        self.inner.accessory_type
    }

    /// Record a new reading or state change.
    ///
    /// Waits for the persisted snapshot to be loaded first, and drops the entry with
    /// `HistoryError::NotLoaded` if that takes longer than the configured load timeout. Fields
    /// not recorded by this accessory type are discarded.
    pub async fn append_entry(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let inner = &self.inner;
        if let Err(e) = inner.wait_loaded().await {
            warn!("{}", e);
            return Err(e);
        }
        let entry = inner.accept(entry)?;

        let mut state = inner.state.lock().await;
        match inner.routing {
            Routing::Continuous => {
                state.sampler.push(entry);
                Ok(())
            }
            Routing::Discrete => {
                state.sampler.record_event(&entry);
                inner.store(&mut state, entry)
            }
            Routing::Direct => inner.store(&mut state, entry),
        }
    }

    /// Wait until the persisted snapshot has been loaded, up to the configured load timeout.
    pub async fn wait_loaded(&self) -> Result<(), HistoryError> {
        self.inner.wait_loaded().await
    }

    /// Wait until all pending snapshot writes have completed.
    pub async fn flush(&self) {
        if let Some(gateway) = &self.inner.gateway {
            gateway.flush().await;
        }
    }

    /// The status frame, base64 encoded.
    pub async fn status(&self) -> String {
        let state = self.inner.state.lock().await;
        let status = self.inner.encoder.status(&state.ring);
        debug!("{} status: {}", self.inner.name, hex(&status));
        codec::to_base64(&status)
    }

    /// Handle an address-set request from the history viewer, starting a new transfer. A
    /// malformed request starts the transfer from the oldest entry.
    pub async fn set_address(&self, payload: &str) {
        let address = match codec::decode_address(payload) {
            Ok(address) => address,
            Err(e) => {
                warn!(
                    "{}: bad address request {:?} ({}), starting from the beginning",
                    self.inner.name, payload, e
                );
                0
            }
        };
        debug!("{} transfer requested from {}", self.inner.name, address);
        self.begin_transfer(address).await;
    }

    /// Start a new transfer from the given address, where 0 means the oldest entry.
    pub async fn begin_transfer(&self, address: u32) {
        let mut state = self.inner.state.lock().await;
        let state = &mut *state;
        state.transfer.begin(address, &state.ring);
    }

    /// Handle a clock-set request from the history viewer. The payload is only logged.
    pub async fn set_clock(&self, payload: &str) {
        match codec::from_base64(payload) {
            Ok(bytes) => debug!("{} clock set: {}", self.inner.name, hex(&bytes)),
            Err(e) => warn!("{}: bad clock set request: {}", self.inner.name, e),
        }
    }

    /// The next chunk of the current transfer, base64 encoded.
    pub async fn read_data(&self) -> String {
        let chunk = self.read_chunk().await;
        debug!("{} data: {}", self.inner.name, hex(&chunk));
        codec::to_base64(&chunk)
    }

    /// The next chunk of the current transfer.
    pub async fn read_chunk(&self) -> Vec<u8> {
        let mut state = self.inner.state.lock().await;
        let state = &mut *state;
        state.transfer.read_chunk(&state.ring, &self.inner.encoder)
    }

    /// The time of the first entry ever stored, in seconds since the Unix epoch.
    pub async fn initial_time(&self) -> Option<u32> {
        self.inner.state.lock().await.ring.initial_time()
    }

    /// Keep some extra data alongside the history in its snapshot.
    ///
    /// Like `append_entry`, this waits for the persisted snapshot to be loaded first.
    pub async fn set_extra_persisted_data(
        &self,
        extra: serde_json::Value,
    ) -> Result<(), HistoryError> {
        self.inner.wait_loaded().await?;
        let mut state = self.inner.state.lock().await;
        state.extra = extra;
        self.inner.persist(&state)
    }

    pub async fn extra_persisted_data(&self) -> serde_json::Value {
        self.inner.state.lock().await.extra.clone()
    }

    /// Run a function with read access to the ring log.
    pub async fn with_log<R>(&self, f: impl FnOnce(&RingLog) -> R) -> R {
        f(&self.inner.state.lock().await.ring)
    }
}

impl Drop for History {
    fn drop(&mut self) {
        if let Some((scheduler, id)) = self.subscription.take() {
            scheduler.unsubscribe(id);
        }
    }
}

impl Inner {
    /// Whether the scheduler ticks at the interval this history was configured with.
    fn ticks_match(&self, scheduler: &Scheduler) -> bool {
        self.options.tick_interval() == scheduler.period()
    }

    async fn wait_loaded(&self) -> Result<(), HistoryError> {
        let mut loaded = self.loaded.subscribe();
        let result =
            match time::timeout(self.options.load_timeout, loaded.wait_for(|loaded| *loaded)).await
            {
                Ok(Ok(_)) => Ok(()),
                _ => Err(HistoryError::NotLoaded(self.name.clone())),
            };
        result
    }

    /// Drop the fields this accessory type doesn't record.
    fn accept(&self, mut entry: HistoryEntry) -> Result<HistoryEntry, HistoryError> {
        if let Some(fields) = self.accessory_type.fields() {
            entry.fields.retain(|name, _| fields.contains(&name.as_str()));
        }
        if entry.fields.is_empty() {
            return Err(HistoryError::NoFields(self.accessory_type.to_string()));
        }
        Ok(entry)
    }

    /// Append an entry to the ring log and persist the result.
    fn store(&self, state: &mut State, entry: HistoryEntry) -> Result<(), HistoryError> {
        debug!("{} appending {}", self.name, entry);
        state.ring.append(entry);
        debug!(
            "{} status: {}",
            self.name,
            hex(&self.encoder.status(&state.ring))
        );
        self.persist(state)
    }

    fn persist(&self, state: &State) -> Result<(), HistoryError> {
        if let Some(gateway) = &self.gateway {
            gateway.write(&state.ring.snapshot(state.extra.clone()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TickHandler for Inner {
    async fn tick(&self, time: u32) -> Result<(), HistoryError> {
        if !*self.loaded.borrow() {
            debug!("{} not loaded yet, skipping tick", self.name);
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let entry = match self.routing {
            Routing::Continuous => state.sampler.average(time),
            Routing::Discrete => state.sampler.repeat_event(time),
            Routing::Direct => None,
        };
        match entry {
            Some(entry) => self.store(&mut state, entry),
            None => Ok(()),
        }
    }
}

/// Load the persisted snapshot, if any, then let appends through.
async fn load(inner: Arc<Inner>) {
    if let Some(gateway) = &inner.gateway {
        match gateway.read().await {
            Ok(Some(snapshot)) => {
                let extra = snapshot.extra.clone();
                match RingLog::restore(inner.options.size, snapshot) {
                    Ok(ring) => {
                        info!(
                            "Loaded {} entries of {} history from {}",
                            ring.used(),
                            inner.name,
                            gateway.key()
                        );
                        let mut state = inner.state.lock().await;
                        state.ring = ring;
                        state.extra = extra;
                    }
                    Err(reason) => warn!(
                        "{}, starting empty",
                        PersistError::Inconsistent {
                            key: gateway.key().to_owned(),
                            reason,
                        }
                    ),
                }
            }
            Ok(None) => info!("No saved history for {}, starting empty", inner.name),
            Err(e) => warn!("{}, starting empty", e),
        }
    }
    inner.loaded.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EPOCH_OFFSET;
    use crate::entry::FieldValue;
    use crate::options::RetryPolicy;
    use crate::persist::Snapshot;
    use std::io;
    use std::time::Duration;

    const START: u32 = EPOCH_OFFSET + 600_000_000;
    const PERIOD: Duration = Duration::from_secs(600);

    fn in_memory(accessory_type: AccessoryType, scheduler: &Scheduler) -> History {
        History::builder(accessory_type, "Test").spawn(scheduler)
    }

    #[tokio::test]
    async fn discrete_appends_immediately() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Door, &scheduler);
        history
            .append_entry(HistoryEntry::new(START).with("status", true))
            .await
            .unwrap();
        assert_eq!(history.with_log(RingLog::used).await, 1);
        assert_eq!(history.initial_time().await, Some(START));
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn continuous_waits_for_tick() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Weather, &scheduler);
        for temp in [20.0, 22.0, 21.0] {
            history
                .append_entry(HistoryEntry::new(START).with("temp", temp))
                .await
                .unwrap();
        }
        assert_eq!(history.with_log(RingLog::used).await, 0);

        scheduler.tick_now().await;
        let latest = history.with_log(|log| log.latest().cloned()).await.unwrap();
        assert_eq!(latest.get("temp"), Some(FieldValue::Number(21.0)));
    }

    #[tokio::test]
    async fn direct_types_not_subscribed() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Thermo, &scheduler);
        assert_eq!(scheduler.subscriber_count(), 0);
        history
            .append_entry(HistoryEntry::new(START).with("currentTemp", 19.5))
            .await
            .unwrap();
        assert_eq!(history.with_log(RingLog::used).await, 1);
    }

    #[tokio::test]
    async fn disable_timer_appends_directly() {
        let scheduler = Scheduler::new(PERIOD);
        let mut builder = History::builder(AccessoryType::Weather, "Test");
        builder.set_options(HistoryOptions {
            disable_timer: true,
            ..Default::default()
        });
        let history = builder.spawn(&scheduler);
        assert!(!scheduler.is_running());
        history
            .append_entry(HistoryEntry::new(START).with("temp", 20.5))
            .await
            .unwrap();
        assert_eq!(history.with_log(RingLog::used).await, 1);
    }

    #[tokio::test]
    async fn unrecorded_fields_dropped() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Door, &scheduler);
        history
            .append_entry(HistoryEntry::new(START).with("status", true).with("temp", 20.0))
            .await
            .unwrap();
        let latest = history.with_log(|log| log.latest().cloned()).await.unwrap();
        assert_eq!(latest.get("temp"), None);

        assert!(matches!(
            history
                .append_entry(HistoryEntry::new(START).with("temp", 20.0))
                .await,
            Err(HistoryError::NoFields(_))
        ));
    }

    #[tokio::test]
    async fn discrete_repeated_on_tick() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Motion, &scheduler);
        history
            .append_entry(HistoryEntry::new(START).with("status", true))
            .await
            .unwrap();
        scheduler.tick_now().await;
        assert_eq!(history.with_log(RingLog::used).await, 2);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Room, &scheduler);
        assert_eq!(scheduler.subscriber_count(), 1);
        drop(history);
        assert_eq!(scheduler.subscriber_count(), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn malformed_address_starts_from_beginning() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Switch, &scheduler);
        for i in 0..3 {
            history
                .append_entry(HistoryEntry::new(START + i).with("status", i % 2 == 0))
                .await
                .unwrap();
        }
        history.set_address("!!!").await;
        let chunk = codec::from_base64(&history.read_data().await).unwrap();
        // Time-sync record, then three switch records.
        assert_eq!(chunk.len(), 21 + 3 * 11);
        assert_eq!(history.read_data().await, "AA==");
    }

    #[tokio::test]
    async fn extra_data() {
        let scheduler = Scheduler::new(PERIOD);
        let history = in_memory(AccessoryType::Energy, &scheduler);
        assert_eq!(history.extra_persisted_data().await, serde_json::Value::Null);
        let extra = serde_json::json!({"totalConsumption": 3.5, "lastReset": 1000});
        history.set_extra_persisted_data(extra.clone()).await.unwrap();
        assert_eq!(history.extra_persisted_data().await, extra);
    }

    #[test]
    fn key_from_options() {
        let mut builder = History::builder(AccessoryType::Weather, "Garden");
        builder.set_options(HistoryOptions {
            host: Some("pi.home".to_owned()),
            ..Default::default()
        });
        assert_eq!(builder.snapshot_key(), "pi_Garden_persist.json");

        builder.set_options(HistoryOptions {
            filename: Some("garden.json".to_owned()),
            ..Default::default()
        });
        assert_eq!(builder.snapshot_key(), "garden.json");
    }

    /// A store whose reads never complete.
    struct StuckStore;

    #[async_trait]
    impl SnapshotStore for StuckStore {
        async fn read(&self, _key: &str) -> io::Result<Option<Vec<u8>>> {
            std::future::pending().await
        }

        async fn write(&self, _key: &str, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn append_times_out_if_not_loaded() {
        let scheduler = Scheduler::new(PERIOD);
        let mut builder = History::builder(AccessoryType::Door, "Stuck");
        builder.set_options(HistoryOptions {
            load_timeout: Duration::from_secs(5),
            write_retry: RetryPolicy {
                initial_delay_ms: 1,
                max_retries: 1,
            },
            ..Default::default()
        });
        builder.set_store(Arc::new(StuckStore));
        let history = builder.spawn(&scheduler);

        assert!(matches!(
            history
                .append_entry(HistoryEntry::new(START).with("status", true))
                .await,
            Err(HistoryError::NotLoaded(_))
        ));
        assert_eq!(history.with_log(RingLog::used).await, 0);
    }

    /// A store kept in memory, whose reads take a while.
    #[derive(Default)]
    struct SlowStore {
        data: std::sync::Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl SnapshotStore for SlowStore {
        async fn read(&self, _key: &str) -> io::Result<Option<Vec<u8>>> {
            time::sleep(Duration::from_millis(100)).await;
            Ok(self.data.lock().unwrap().clone())
        }

        async fn write(&self, _key: &str, data: &[u8]) -> io::Result<()> {
            *self.data.lock().unwrap() = Some(data.to_vec());
            Ok(())
        }
    }

    fn with_store(store: &Arc<SlowStore>, scheduler: &Scheduler) -> History {
        let mut builder = History::builder(AccessoryType::Door, "Slow");
        builder.set_store(store.clone());
        builder.spawn(scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn extra_data_waits_for_load() {
        let scheduler = Scheduler::new(PERIOD);
        let store = Arc::new(SlowStore::default());

        let history = with_store(&store, &scheduler);
        for i in 0..5 {
            history
                .append_entry(HistoryEntry::new(START + i).with("status", true))
                .await
                .unwrap();
        }
        history
            .set_extra_persisted_data(serde_json::json!({"old": 1}))
            .await
            .unwrap();
        history.flush().await;
        drop(history);

        let reloaded = with_store(&store, &scheduler);
        reloaded
            .set_extra_persisted_data(serde_json::json!({"new": 2}))
            .await
            .unwrap();
        reloaded.flush().await;

        assert_eq!(reloaded.with_log(RingLog::used).await, 5);
        assert_eq!(
            reloaded.extra_persisted_data().await,
            serde_json::json!({"new": 2})
        );
        let saved: Snapshot =
            serde_json::from_slice(store.data.lock().unwrap().as_ref().unwrap()).unwrap();
        assert_eq!(saved.used_memory, 5);
        assert_eq!(saved.extra, serde_json::json!({"new": 2}));
    }

    #[test]
    fn tick_interval_mismatch() {
        let scheduler = Scheduler::new(PERIOD);
        let mut builder = History::builder(AccessoryType::Weather, "Test");
        builder.set_options(HistoryOptions {
            minutes: 5,
            ..Default::default()
        });
        let history = builder.spawn(&scheduler);
        assert!(!history.inner.ticks_match(&scheduler));
        assert!(history.inner.ticks_match(&Scheduler::new(Duration::from_secs(300))));
        assert!(in_memory(AccessoryType::Room, &scheduler)
            .inner
            .ticks_match(&scheduler));
    }
}
