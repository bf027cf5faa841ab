//! The fixed-capacity circular log behind each history.
//!
//! Entries are addressed by a logical index which only ever increases. The valid indices are
//! `first_index + 1 ..= last_index`, and index `i` is stored in slot `i % capacity`. Index 0 is
//! never a valid entry, which keeps it free to mean "from the beginning" in address requests.

use crate::codec::EPOCH_OFFSET;
use crate::entry::HistoryEntry;
use crate::persist::Snapshot;
use log::warn;

/// Default capacity: four weeks of entries at one entry every ten minutes.
pub const DEFAULT_CAPACITY: u32 = 4032;

/// The status frame sends `used + 1` as a 16-bit count, which bounds the capacity.
pub const MAX_CAPACITY: u32 = u16::MAX as u32 - 1;

#[derive(Clone, Debug, PartialEq)]
pub struct RingLog {
    capacity: u32,
    used: u32,
    first: u32,
    last: u32,
    /// Seconds since 2001-01-01 of the first entry ever stored.
    ref_time: Option<u32>,
    /// Seconds since the Unix epoch of the first entry ever stored.
    initial_time: Option<u32>,
    /// Set at start-up; cleared by the first overwrite, which is flagged as a reference entry.
    restarted: bool,
    slots: Vec<Option<HistoryEntry>>,
}

impl RingLog {
    pub fn new(capacity: u32) -> Self {
        if capacity > MAX_CAPACITY {
            warn!(
                "History size {} is too large, using {}",
                capacity, MAX_CAPACITY
            );
        }
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            capacity,
            used: 0,
            first: 0,
            last: 0,
            ref_time: None,
            initial_time: None,
            restarted: true,
            slots: vec![None; capacity as usize],
        }
    }

    /// Store an entry, overwriting the oldest one if the log is full.
    pub fn append(&mut self, mut entry: HistoryEntry) {
        entry.reference = false;
        if self.ref_time.is_none() {
            self.ref_time = Some(entry.time.wrapping_sub(EPOCH_OFFSET));
            self.initial_time = Some(entry.time);
            entry.reference = true;
        }

        if self.used < self.capacity {
            self.used += 1;
        } else {
            self.first += 1;
            if self.restarted {
                entry.reference = true;
                self.restarted = false;
            }
        }
        self.last = self.first + self.used;

        let slot = self.slot(self.last);
        self.slots[slot] = Some(entry);
    }

    /// Get the entry with the given logical index, if it is still stored.
    pub fn get(&self, index: u32) -> Option<&HistoryEntry> {
        if index == 0 || index <= self.first || index > self.last {
            return None;
        }
        self.slots[self.slot(index)].as_ref()
    }

    /// The most recently appended entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.get(self.last)
    }

    /// Iterate over the stored entries from oldest to newest, with their indices.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &HistoryEntry)> + '_ {
        (self.first + 1..=self.last).filter_map(move |index| Some((index, self.get(index)?)))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn first_index(&self) -> u32 {
        self.first
    }

    pub fn last_index(&self) -> u32 {
        self.last
    }

    pub fn is_full(&self) -> bool {
        self.used >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn ref_time(&self) -> Option<u32> {
        self.ref_time
    }

    pub fn initial_time(&self) -> Option<u32> {
        self.initial_time
    }

    fn slot(&self, index: u32) -> usize {
        (index % self.capacity) as usize
    }

    pub fn snapshot(&self, extra: serde_json::Value) -> Snapshot {
        Snapshot {
            first_entry: self.first,
            last_entry: self.last,
            used_memory: self.used,
            ref_time: self.ref_time.unwrap_or(0),
            initial_time: self.initial_time.unwrap_or(0),
            history: self.slots.clone(),
            extra,
        }
    }

    /// Rebuild a log from a persisted snapshot, checking that it fits the given capacity.
    ///
    /// The restored log counts as freshly restarted, so its next overwrite will be flagged as a
    /// reference entry.
    pub fn restore(capacity: u32, snapshot: Snapshot) -> Result<Self, String> {
        let mut log = Self::new(capacity);
        if snapshot.used_memory > log.capacity {
            return Err(format!(
                "{} entries used but capacity is {}",
                snapshot.used_memory, log.capacity
            ));
        }
        if snapshot.history.len() > log.capacity as usize {
            return Err(format!(
                "{} slots stored but capacity is {}",
                snapshot.history.len(),
                log.capacity
            ));
        }
        if snapshot.first_entry.checked_add(snapshot.used_memory) != Some(snapshot.last_entry) {
            return Err(format!(
                "first entry {} + used {} != last entry {}",
                snapshot.first_entry, snapshot.used_memory, snapshot.last_entry
            ));
        }

        for (slot, entry) in snapshot.history.into_iter().enumerate() {
            log.slots[slot] = entry;
        }
        log.used = snapshot.used_memory;
        log.first = snapshot.first_entry;
        log.last = snapshot.last_entry;
        log.ref_time = Some(snapshot.ref_time).filter(|&time| time != 0);
        log.initial_time = Some(snapshot.initial_time).filter(|&time| time != 0);

        if let Some(missing) = (log.first + 1..=log.last).find(|&index| log.get(index).is_none()) {
            return Err(format!("entry {} missing", missing));
        }
        Ok(log)
    }
}
