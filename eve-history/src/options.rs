use crate::ring::DEFAULT_CAPACITY;
use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use std::time::Duration;

const DEFAULT_MINUTES: u32 = 10;
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a single history.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryOptions {
    /// The number of entries kept before the oldest are overwritten.
    pub size: u32,
    /// How often readings are averaged, in minutes. Ticks come from the shared `Scheduler`, so
    /// this should match the period it was created with.
    pub minutes: u32,
    /// Append every entry as it arrives rather than averaging or repeating on a timer.
    pub disable_timer: bool,
    /// Don't repeat the last value on ticks without new readings.
    pub disable_repeat_last_data: bool,
    /// The host name used in the snapshot key, if not this machine's.
    pub host: Option<String>,
    /// The snapshot key to use instead of the one derived from the host and accessory names.
    pub filename: Option<String>,
    /// How long appends wait for the persisted snapshot to load before being dropped.
    #[serde(
        deserialize_with = "de_duration_seconds",
        rename = "load_timeout_seconds"
    )]
    pub load_timeout: Duration,
    pub write_retry: RetryPolicy,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_CAPACITY,
            minutes: DEFAULT_MINUTES,
            disable_timer: false,
            disable_repeat_last_data: false,
            host: None,
            filename: None,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            write_retry: RetryPolicy::default(),
        }
    }
}

impl HistoryOptions {
    /// The period at which readings are averaged.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.minutes.max(1)) * 60)
    }
}

/// How failed snapshot writes are retried.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// The delay before the first retry, which grows exponentially after that.
    pub initial_delay_ms: u64,
    /// The number of retries after the first attempt before the write is dropped.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_retries: 10,
        }
    }
}

pub fn de_duration_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let seconds = u64::deserialize(d)?;
    Ok(Duration::from_secs(seconds))
}
