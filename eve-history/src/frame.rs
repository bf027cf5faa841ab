//! Rendering of ring log state and entries into the frames read by the history viewer.
//!
//! All multi-byte integers are little-endian except signature codes. Every data record starts
//! with its own length in bytes (including the length byte), followed by the entry index and the
//! entry time relative to the reference time.

use crate::accessory::AccessoryType;
use crate::codec::{FrameWriter, EPOCH_OFFSET};
use crate::entry::HistoryEntry;
use crate::ring::RingLog;
use crate::schema::Schema;
use log::warn;

/// Trailer of every status frame.
const STATUS_TRAILER: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x01, 0x01];
/// Trailer of aqua records.
const AQUA_TRAILER: [u8; 2] = [0x30, 0x0c];

#[derive(Clone, Debug, PartialEq)]
pub struct FrameEncoder {
    schema: Schema,
}

impl FrameEncoder {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Render the status frame describing the current state of the log.
    pub fn status(&self, log: &RingLog) -> Vec<u8> {
        let ref_time = log.ref_time().unwrap_or(0);
        let elapsed = log
            .latest()
            .map_or(0, |entry| relative_time(entry.time, ref_time));
        let (used, first) = if log.is_full() {
            (log.used(), log.first_index() + 1)
        } else {
            (log.used() + 1, log.first_index())
        };

        let mut writer = FrameWriter::new();
        writer.u32_le(elapsed).zeros(4).u32_le(ref_time);
        writer.u8(self.schema.codes().len() as u8);
        for &code in self.schema.codes() {
            writer.u16_be(code);
        }
        writer
            .u16_le(used as u16)
            .u16_le(log.capacity() as u16)
            .u32_le(first)
            .bytes(&STATUS_TRAILER);
        writer.into_bytes()
    }

    /// Append a time-sync record carrying the reference time.
    pub fn write_sync(&self, out: &mut FrameWriter, index: u32, ref_time: u32) {
        let mut body = FrameWriter::new();
        body.u32_le(index)
            .bytes(&[0x01, 0x00, 0x00, 0x00])
            .u8(0x81)
            .u32_le(ref_time)
            .zeros(4)
            .u8(0x00)
            .zeros(2);
        write_with_length(out, &body);
    }

    /// Append the data record for one entry.
    pub fn write_record(
        &self,
        out: &mut FrameWriter,
        index: u32,
        entry: &HistoryEntry,
        ref_time: u32,
    ) {
        let mut body = FrameWriter::new();
        body.u32_le(index)
            .u32_le(relative_time(entry.time, ref_time));

        let presence = self.schema.presence();
        match self.schema.accessory_type() {
            AccessoryType::Weather => {
                body.u8(presence)
                    .scaled(entry.number_or_zero("temp"), 100.0, 2)
                    .scaled(entry.number_or_zero("humidity"), 100.0, 2)
                    .scaled(entry.number_or_zero("pressure"), 10.0, 2);
            }
            AccessoryType::Energy => {
                body.u8(presence)
                    .zeros(4)
                    .scaled(entry.number_or_zero("power"), 10.0, 2)
                    .zeros(4);
            }
            AccessoryType::Room => {
                body.u8(presence)
                    .scaled(entry.number_or_zero("temp"), 100.0, 2)
                    .scaled(entry.number_or_zero("humidity"), 100.0, 2)
                    .scaled(entry.number_or_zero("ppm"), 1.0, 2)
                    .zeros(3);
            }
            AccessoryType::Door | AccessoryType::Motion | AccessoryType::Switch => {
                body.u8(presence)
                    .scaled(entry.number_or_zero("status"), 1.0, 1);
            }
            AccessoryType::Aqua => {
                let status = entry.number_or_zero("status");
                body.u8(presence).scaled(status, 1.0, 1);
                if status == 0.0 {
                    body.scaled(entry.number_or_zero("waterAmount"), 1.0, 4)
                        .zeros(4);
                }
                body.bytes(&AQUA_TRAILER);
            }
            AccessoryType::Thermo => {
                body.u8(presence)
                    .scaled(entry.number_or_zero("currentTemp"), 100.0, 2)
                    .scaled(entry.number_or_zero("setTemp"), 100.0, 2)
                    .scaled(entry.number_or_zero("valvePosition"), 1.0, 1)
                    .zeros(2);
            }
            AccessoryType::Custom => {
                let mut bitmask: u32 = 0;
                let mut values = FrameWriter::new();
                for (position, signature) in self.schema.fields().iter().enumerate() {
                    if let Some(value) = entry.get(&signature.field) {
                        values.scaled(value.as_f64(), signature.scale, signature.width);
                        bitmask |= 1u32.checked_shl(position as u32).unwrap_or(0);
                    }
                }
                // Only the low byte is sent; fields past the eighth are encoded without a flag.
                body.u8(bitmask as u8).bytes(values.as_bytes());
            }
        }
        write_with_length(out, &body);
    }
}

/// Seconds from the reference time to `time`. Entries stamped before it are sent as 0.
fn relative_time(time: u32, ref_time: u32) -> u32 {
    match time.checked_sub(ref_time.wrapping_add(EPOCH_OFFSET)) {
        Some(seconds) => seconds,
        None => {
            warn!(
                "Entry time {} is before the reference time {}, sending 0",
                time,
                ref_time.wrapping_add(EPOCH_OFFSET)
            );
            0
        }
    }
}

fn write_with_length(out: &mut FrameWriter, body: &FrameWriter) {
    out.u8((body.len() + 1) as u8).bytes(body.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Signature;

    const START: u32 = EPOCH_OFFSET + 600_000_000;
    const REF: u32 = 600_000_000;

    fn record(schema: Schema, entry: &HistoryEntry) -> Vec<u8> {
        let mut out = FrameWriter::new();
        FrameEncoder::new(schema).write_record(&mut out, 2, entry, REF);
        out.into_bytes()
    }

    #[test]
    fn status_not_full() {
        let encoder = FrameEncoder::new(Schema::fixed(AccessoryType::Weather));
        let mut log = RingLog::new(4032);
        log.append(HistoryEntry::new(START).with("temp", 20.0));
        log.append(HistoryEntry::new(START + 600).with("temp", 21.0));

        assert_eq!(
            encoder.status(&log),
            vec![
                0x58, 0x02, 0x00, 0x00, // 600 seconds since the reference time
                0x00, 0x00, 0x00, 0x00, //
                0x00, 0x46, 0xc3, 0x23, // reference time
                0x03, 0x01, 0x02, 0x02, 0x02, 0x03, 0x02, // signatures
                0x03, 0x00, // used + 1
                0xc0, 0x0f, // capacity
                0x00, 0x00, 0x00, 0x00, // first index
                0x00, 0x00, 0x00, 0x00, 0x01, 0x01,
            ]
        );
    }

    #[test]
    fn status_full() {
        let encoder = FrameEncoder::new(Schema::fixed(AccessoryType::Door));
        let mut log = RingLog::new(10);
        for i in 0..12 {
            log.append(HistoryEntry::new(START + i).with("status", true));
        }

        let status = encoder.status(&log);
        assert_eq!(status.len(), 12 + 3 + 14);
        assert_eq!(&status[0..4], &11u32.to_le_bytes());
        assert_eq!(&status[12..15], &[0x01, 0x06, 0x01]);
        assert_eq!(u16::from_le_bytes([status[15], status[16]]), 10);
        assert_eq!(u16::from_le_bytes([status[17], status[18]]), 10);
        assert_eq!(&status[19..23], &3u32.to_le_bytes());
    }

    #[test]
    fn status_empty() {
        let encoder = FrameEncoder::new(Schema::fixed(AccessoryType::Switch));
        let status = encoder.status(&RingLog::new(100));
        assert_eq!(&status[0..12], &[0; 12]);
        assert_eq!(u16::from_le_bytes([status[15], status[16]]), 1);
    }

    #[test]
    fn sync_record() {
        let encoder = FrameEncoder::new(Schema::fixed(AccessoryType::Weather));
        let mut out = FrameWriter::new();
        encoder.write_sync(&mut out, 1, REF);
        assert_eq!(
            out.into_bytes(),
            vec![
                0x15, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x81, 0x00, 0x46, 0xc3,
                0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn weather_record() {
        let entry = HistoryEntry::new(START + 600)
            .with("temp", 21.5)
            .with("humidity", 45.0)
            .with("pressure", 1013.2);
        assert_eq!(
            record(Schema::fixed(AccessoryType::Weather), &entry),
            vec![
                0x10, 0x02, 0x00, 0x00, 0x00, 0x58, 0x02, 0x00, 0x00, 0x07, 0x66, 0x08, 0x94,
                0x11, 0x94, 0x27,
            ]
        );
    }

    #[test]
    fn energy_record() {
        let entry = HistoryEntry::new(START).with("power", 12.3);
        assert_eq!(
            record(Schema::fixed(AccessoryType::Energy), &entry),
            vec![
                0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00,
                0x00, 0x7b, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn room_record() {
        let entry = HistoryEntry::new(START)
            .with("temp", 20.0)
            .with("humidity", 50.0)
            .with("ppm", 800);
        let bytes = record(Schema::fixed(AccessoryType::Room), &entry);
        assert_eq!(bytes.len(), 0x13);
        assert_eq!(bytes[0], 0x13);
        assert_eq!(&bytes[9..], &[0x0f, 0xd0, 0x07, 0x88, 0x13, 0x20, 0x03, 0, 0, 0]);
    }

    #[test]
    fn door_record() {
        let entry = HistoryEntry::new(START + 1).with("status", true);
        assert_eq!(
            record(Schema::fixed(AccessoryType::Door), &entry),
            vec![0x0b, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01]
        );
    }

    #[test]
    fn motion_record_uses_motion_presence() {
        let entry = HistoryEntry::new(START).with("status", false);
        let bytes = record(Schema::fixed(AccessoryType::Motion), &entry);
        assert_eq!(&bytes[9..], &[0x02, 0x00]);
    }

    #[test]
    fn aqua_records() {
        let on = HistoryEntry::new(START).with("status", true);
        let bytes = record(Schema::fixed(AccessoryType::Aqua), &on);
        assert_eq!(bytes[0], 0x0d);
        assert_eq!(&bytes[9..], &[0x05, 0x01, 0x30, 0x0c]);

        let off = HistoryEntry::new(START)
            .with("status", false)
            .with("waterAmount", 300);
        let bytes = record(Schema::fixed(AccessoryType::Aqua), &off);
        assert_eq!(bytes[0], 0x15);
        assert_eq!(
            &bytes[9..],
            &[0x05, 0x00, 0x2c, 0x01, 0x00, 0x00, 0, 0, 0, 0, 0x30, 0x0c]
        );
    }

    #[test]
    fn thermo_record() {
        let entry = HistoryEntry::new(START)
            .with("currentTemp", 19.5)
            .with("setTemp", 21.0)
            .with("valvePosition", 40);
        let bytes = record(Schema::fixed(AccessoryType::Thermo), &entry);
        assert_eq!(bytes[0], 0x11);
        assert_eq!(&bytes[9..], &[0x1f, 0x9e, 0x07, 0x34, 0x08, 0x28, 0x00, 0x00]);
    }

    #[test]
    fn custom_record_with_bitmask() {
        let schema = Schema::resolve(["temp", "pressure", "status"]);
        let entry = HistoryEntry::new(START + 600)
            .with("status", true)
            .with("temp", 21.5);
        assert_eq!(
            record(schema, &entry),
            vec![
                0x0d, 0x02, 0x00, 0x00, 0x00, 0x58, 0x02, 0x00, 0x00, 0x05, 0x66, 0x08, 0x01,
            ]
        );
    }

    #[test]
    fn custom_record_four_byte_field() {
        let schema = Schema::custom(vec![Signature::new(0x2204, "energy", 4, 1000.0).unwrap()]);
        let entry = HistoryEntry::new(START).with("energy", 1.5);
        let bytes = record(schema, &entry);
        assert_eq!(bytes[0], 14);
        assert_eq!(&bytes[9..], &[0x01, 0xdc, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn custom_empty_schema() {
        let schema = Schema::resolve(["colour"]);
        let encoder = FrameEncoder::new(schema.clone());
        let mut log = RingLog::new(10);
        log.append(HistoryEntry::new(START).with("colour", 3));
        assert_eq!(encoder.status(&log)[12], 0);

        let bytes = record(schema, &HistoryEntry::new(START).with("colour", 3));
        assert_eq!(bytes, vec![0x0a, 0x02, 0, 0, 0, 0, 0, 0, 0, 0x00]);
    }

    #[test]
    fn status_large_size_clamped() {
        let encoder = FrameEncoder::new(Schema::fixed(AccessoryType::Door));
        let mut log = RingLog::new(70_000);
        log.append(HistoryEntry::new(START).with("status", true));

        let status = encoder.status(&log);
        assert_eq!(u16::from_le_bytes([status[15], status[16]]), 2);
        assert_eq!(u16::from_le_bytes([status[17], status[18]]), 0xfffe);
    }

    #[test]
    fn entry_before_reference_time() {
        let bytes = record(
            Schema::fixed(AccessoryType::Door),
            &HistoryEntry::new(START - 10).with("status", true),
        );
        assert_eq!(&bytes[5..9], &[0, 0, 0, 0]);
    }
}
