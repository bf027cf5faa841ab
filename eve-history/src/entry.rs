use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// The value of one field of a history entry.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
}

impl FieldValue {
    /// The value as a number, with booleans mapped to 0 and 1.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(value) => {
                if value {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(value) => value,
        }
    }

    pub fn is_bool(self) -> bool {
        matches!(self, Self::Bool(_))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Number(value) => write!(f, "{}", value),
        }
    }
}

/// A single time-stamped sample or state change.
///
/// The set of fields depends on the accessory type, e.g. `temp`, `humidity` and `pressure` for a
/// weather station or `status` for a contact sensor.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Seconds since the Unix epoch.
    pub time: u32,
    /// Whether a time-sync record precedes this entry in the transfer stream.
    #[serde(
        rename = "setRefTime",
        default,
        skip_serializing_if = "is_false",
        with = "reference_flag"
    )]
    pub(crate) reference: bool,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl HistoryEntry {
    pub fn new(time: u32) -> Self {
        Self {
            time,
            reference: false,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field, consuming and returning the entry so calls can be chained.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_owned(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.fields.get(name).copied()
    }

    /// The numeric value of the given field, or 0 if it is missing.
    pub(crate) fn number_or_zero(&self, name: &str) -> f64 {
        self.get(name).map_or(0.0, FieldValue::as_f64)
    }

    pub fn is_reference(&self) -> bool {
        self.reference
    }
}

impl Display for HistoryEntry {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.time)?;
        for (name, value) in &self.fields {
            write!(f, " {}={}", name, value)?;
        }
        if self.reference {
            f.write_str(" (reference)")?;
        }
        Ok(())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The persisted format marks reference entries with `"setRefTime": 1`.
mod reference_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*flag))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(u8::deserialize(deserializer)? != 0)
    }
}
