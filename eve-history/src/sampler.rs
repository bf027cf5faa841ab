//! Down-sampling of high-rate readings into one entry per tick.

use crate::entry::{FieldValue, HistoryEntry};
use std::collections::BTreeMap;

/// Collects readings between ticks and produces their average.
///
/// For continuous accessories every reading is buffered and each tick turns the buffer into a
/// single averaged entry. For discrete accessories the latest event is remembered so it can be
/// repeated as a heartbeat on ticks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sampler {
    backlog: Vec<HistoryEntry>,
    previous_average: BTreeMap<String, FieldValue>,
    last_event: Option<HistoryEntry>,
    repeat_last_value: bool,
}

impl Sampler {
    pub fn new(repeat_last_value: bool) -> Self {
        Self {
            repeat_last_value,
            ..Default::default()
        }
    }

    /// Buffer a reading until the next tick.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.backlog.push(entry);
    }

    pub fn backlog(&self) -> &[HistoryEntry] {
        &self.backlog
    }

    /// Remember a discrete event so it can be repeated on later ticks.
    pub fn record_event(&mut self, entry: &HistoryEntry) {
        self.last_event = Some(entry.clone());
    }

    /// The last discrete event restamped at the given time, if repeating is enabled.
    pub fn repeat_event(&self, time: u32) -> Option<HistoryEntry> {
        if !self.repeat_last_value {
            return None;
        }
        let mut event = self.last_event.clone()?;
        event.time = time;
        event.reference = false;
        Some(event)
    }

    /// Average the buffered readings into a single entry stamped with the given time, and clear
    /// the buffer.
    ///
    /// Numeric fields are averaged over the readings which contain them and rounded to two
    /// decimal places. Boolean fields take their latest value. Fields missing from every reading
    /// reuse the previous tick's value if repeating is enabled. Returns `None` if no field has a
    /// value.
    pub fn average(&mut self, time: u32) -> Option<HistoryEntry> {
        let mut sums: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
        let mut average = HistoryEntry::new(time);
        for entry in &self.backlog {
            for (name, value) in &entry.fields {
                match value {
                    FieldValue::Bool(_) => {
                        average.fields.insert(name.clone(), *value);
                    }
                    FieldValue::Number(number) => {
                        let sum = sums.entry(name.as_str()).or_insert((0.0, 0));
                        sum.0 += number;
                        sum.1 += 1;
                    }
                }
            }
        }
        for (name, (sum, count)) in sums {
            average
                .fields
                .insert(name.to_owned(), round_hundredths(sum / f64::from(count)).into());
        }
        self.backlog.clear();

        if self.repeat_last_value {
            for (name, value) in &self.previous_average {
                average.fields.entry(name.clone()).or_insert(*value);
            }
        }
        if average.fields.is_empty() {
            return None;
        }
        self.previous_average = average.fields.clone();
        Some(average)
    }
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
