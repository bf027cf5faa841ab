//! The chunked read protocol through which the history viewer pages through stored entries.

use crate::codec::{FrameWriter, EMPTY_FRAME};
use crate::frame::FrameEncoder;
use crate::ring::RingLog;
use log::debug;

/// The maximum number of records sent in one chunk.
pub const RECORDS_PER_CHUNK: usize = 11;

/// Read cursor of the (single) transfer in progress for one log.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferSession {
    cursor: u32,
    active: bool,
    /// A time-sync record is still owed before the first data record of this transfer.
    sync_pending: bool,
    /// The index for which a time-sync record was last sent, so it is sent only once.
    synced: Option<u32>,
}

impl TransferSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start a transfer from the given address, replacing any transfer in progress. Address 0
    /// means the oldest stored entry.
    pub fn begin(&mut self, address: u32, log: &RingLog) {
        let oldest = log.first_index() + 1;
        self.cursor = if address == 0 {
            oldest
        } else if address < oldest {
            debug!(
                "Requested address {} has been overwritten, starting from {}",
                address, oldest
            );
            oldest
        } else {
            address
        };
        self.active = true;
        self.sync_pending = true;
        self.synced = None;
    }

    /// Render the next chunk of up to `RECORDS_PER_CHUNK` records, or the empty frame once the
    /// transfer is exhausted.
    pub fn read_chunk(&mut self, log: &RingLog, encoder: &FrameEncoder) -> Vec<u8> {
        if !self.active || self.cursor > log.last_index() {
            self.active = false;
            return EMPTY_FRAME.to_vec();
        }
        if self.cursor <= log.first_index() {
            // Entries were overwritten since the last chunk.
            self.cursor = log.first_index() + 1;
            self.sync_pending = true;
        }

        let ref_time = log.ref_time().unwrap_or(0);
        let mut out = FrameWriter::new();
        let mut records = 0;
        while records < RECORDS_PER_CHUNK && self.cursor <= log.last_index() {
            let entry = match log.get(self.cursor) {
                Some(entry) => entry,
                None => break,
            };
            let wants_sync = self.sync_pending
                || entry.is_reference()
                || self.cursor == log.first_index() + 1;
            if wants_sync && self.synced != Some(self.cursor) {
                encoder.write_sync(&mut out, self.cursor, ref_time);
                self.synced = Some(self.cursor);
                self.sync_pending = false;
            } else {
                encoder.write_record(&mut out, self.cursor, entry, ref_time);
                self.cursor += 1;
            }
            records += 1;
        }

        if out.is_empty() {
            self.active = false;
            return EMPTY_FRAME.to_vec();
        }
        out.into_bytes()
    }
}
