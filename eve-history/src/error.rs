use std::io;
use thiserror::Error;

/// An error from a `History` operation.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The persisted snapshot was not loaded in time, so the entry was dropped.
    #[error("History for {0} was not loaded in time, dropping entry.")]
    NotLoaded(String),
    /// The entry carried none of the fields this accessory type records.
    #[error("Entry has no fields recorded by {0} history.")]
    NoFields(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// An error reading or writing a persisted snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on snapshot {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("Invalid snapshot {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Snapshot {key} is inconsistent: {reason}")]
    Inconsistent { key: String, reason: String },
    #[error("Error encoding snapshot {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Gave up writing snapshot {key} after {attempts} attempts: {source}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// An error decoding a request written by the history viewer.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransferError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),
    #[error("Address request too short: {0} bytes")]
    TooShort(usize),
}

/// An error registering a field in a custom schema.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SchemaError {
    #[error("Unknown history field {0:?}")]
    UnknownField(String),
    #[error("Unsupported field width {0}")]
    UnsupportedWidth(u8),
    #[error("No known fields matched, history will be empty")]
    Empty,
}
