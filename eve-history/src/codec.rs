//! Low-level encoding for the history protocol: a byte writer with explicit little-endian
//! primitives, and the base64 framing used for every payload.

use crate::error::TransferError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z, the epoch used on the wire.
pub const EPOCH_OFFSET: u32 = 978_307_200;

/// The payload returned when there is nothing (more) to transfer.
pub const EMPTY_FRAME: [u8; 1] = [0x00];

/// Accumulates the bytes of a frame.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameWriter {
    bytes: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16_le(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32_le(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a signature code, which is sent high byte first.
    pub fn u16_be(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.bytes.resize(self.bytes.len() + count, 0);
        self
    }

    /// Write a scaled value truncated toward zero and wrapped to `width` bytes.
    pub fn scaled(&mut self, value: f64, scale: f64, width: u8) -> &mut Self {
        let fixed = (value * scale) as i64;
        match width {
            1 => self.u8(fixed as u8),
            2 => self.u16_le(fixed as u16),
            _ => self.u32_le(fixed as u32),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_base64(payload: &str) -> Result<Vec<u8>, TransferError> {
    STANDARD
        .decode(payload.trim())
        .map_err(|e| TransferError::InvalidBase64(e.to_string()))
}

/// Decode the starting address from an address-set request. Bytes 2 to 5 hold the address in
/// little-endian order.
pub fn decode_address(payload: &str) -> Result<u32, TransferError> {
    let bytes = from_base64(payload)?;
    if bytes.len() < 6 {
        return Err(TransferError::TooShort(bytes.len()));
    }
    Ok(u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]))
}

/// Format bytes as lowercase hex, for logging.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}
