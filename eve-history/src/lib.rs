//! A history log for virtual smart-home accessories, compatible with the Eve app's history view.
//!
//! Each accessory gets a [`History`], which keeps a fixed number of time-stamped entries in a
//! ring log. Readings from continuous sensors are averaged by a shared [`Scheduler`] tick, while
//! state changes are recorded as they happen. The history viewer pages through the log using the
//! binary transfer protocol implemented by [`History::status`], [`History::set_address`] and
//! [`History::read_data`]. The log is saved after every change, so it survives restarts.
//!
//! ```no_run
//! use eve_history::{AccessoryType, History, HistoryEntry, Scheduler};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), eve_history::HistoryError> {
//! let scheduler = Scheduler::new(Duration::from_secs(600));
//! let mut builder = History::builder(AccessoryType::Weather, "Garden");
//! builder.set_storage_path("/var/lib/eve-history");
//! let history = builder.spawn(&scheduler);
//!
//! history
//!     .append_entry(HistoryEntry::new(1_700_000_000).with("temp", 12.5))
//!     .await?;
//! println!("Status: {}", history.status().await);
//! # Ok(())
//! # }
//! ```

pub mod accessory;
pub mod codec;
pub mod entry;
mod error;
pub mod frame;
mod history;
pub mod options;
pub mod persist;
pub mod ring;
pub mod sampler;
pub mod scheduler;
pub mod schema;
pub mod transfer;

pub use accessory::AccessoryType;
pub use entry::{FieldValue, HistoryEntry};
pub use error::{HistoryError, PersistError, SchemaError, TransferError};
pub use history::{History, HistoryBuilder};
pub use options::{HistoryOptions, RetryPolicy};
pub use persist::{FileStore, Snapshot, SnapshotStore};
pub use scheduler::{Scheduler, SubscriptionId, TickHandler};
pub use schema::Signature;
