//! Per-accessory-type layout descriptors.
//!
//! Every history advertises a list of 16-bit signature codes in its status frame. The high byte of
//! a code identifies the quantity and the low byte is its width in bytes. The fixed accessory
//! types use hard-coded lists, while the custom type builds its list from the fields the accessory
//! declares, sorted by code.

use crate::accessory::AccessoryType;
use crate::error::SchemaError;
use log::warn;

/// Fields which a custom history knows how to encode: (name, signature code, width, scale).
const KNOWN_FIELDS: &[(&str, u16, u8, f64)] = &[
    ("temp", 0x0102, 2, 100.0),
    ("humidity", 0x0202, 2, 100.0),
    ("pressure", 0x0302, 2, 10.0),
    ("ppm", 0x0402, 2, 1.0),
    ("contact", 0x0601, 1, 1.0),
    ("power", 0x0702, 2, 10.0),
    ("status", 0x0e01, 1, 1.0),
    ("valvePosition", 0x1001, 1, 1.0),
    ("setTemp", 0x1102, 2, 100.0),
    ("motion", 0x1c01, 1, 1.0),
    ("lux", 0x3002, 2, 1.0),
];

/// One field of a custom schema: how to find it in an entry and how to encode it.
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub code: u16,
    pub field: String,
    /// Encoded width in bytes: 1, 2 or 4.
    pub width: u8,
    /// The value is multiplied by this before being truncated to an integer.
    pub scale: f64,
}

impl Signature {
    pub fn new(code: u16, field: &str, width: u8, scale: f64) -> Result<Self, SchemaError> {
        if ![1, 2, 4].contains(&width) {
            return Err(SchemaError::UnsupportedWidth(width));
        }
        Ok(Self {
            code,
            field: field.to_owned(),
            width,
            scale,
        })
    }

    /// Look up a field name in the table of known fields.
    pub fn known(field: &str) -> Result<Self, SchemaError> {
        KNOWN_FIELDS
            .iter()
            .find(|(name, ..)| *name == field)
            .map(|&(name, code, width, scale)| Self {
                code,
                field: name.to_owned(),
                width,
                scale,
            })
            .ok_or_else(|| SchemaError::UnknownField(field.to_owned()))
    }
}

/// The binary layout descriptor for one history.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    accessory_type: AccessoryType,
    codes: Vec<u16>,
    /// The byte following the timestamp in each data record of a fixed type.
    presence: u8,
    /// Fields in ascending code order, only for custom schemas.
    fields: Vec<Signature>,
}

impl Schema {
    /// The fixed schema for the given type. For `AccessoryType::Custom` this is empty; use
    /// `Schema::custom` instead.
    pub fn fixed(accessory_type: AccessoryType) -> Self {
        let (codes, presence): (&[u16], u8) = match accessory_type {
            AccessoryType::Weather => (&[0x0102, 0x0202, 0x0302], 0x07),
            AccessoryType::Energy => (&[0x0102, 0x0202, 0x0702, 0x0f03], 0x1f),
            AccessoryType::Room => (&[0x0102, 0x0202, 0x0402, 0x0f03], 0x0f),
            AccessoryType::Door => (&[0x0601], 0x01),
            AccessoryType::Motion => (&[0x1301, 0x1c01], 0x02),
            AccessoryType::Switch => (&[0x0e01], 0x01),
            AccessoryType::Aqua => (&[0x1f01, 0x2a08, 0x2302], 0x05),
            AccessoryType::Thermo => (&[0x0102, 0x1102, 0x1001, 0x1201, 0x1d01], 0x1f),
            AccessoryType::Custom => (&[], 0x00),
        };
        Self {
            accessory_type,
            codes: codes.to_vec(),
            presence,
            fields: vec![],
        }
    }

    /// Build a custom schema from explicitly registered fields, sorted by signature code.
    ///
    /// An empty list is allowed; the history will then only ever send time-sync records.
    pub fn custom(mut fields: Vec<Signature>) -> Self {
        if fields.is_empty() {
            warn!("{}", SchemaError::Empty);
        }
        fields.sort_by_key(|signature| signature.code);
        Self {
            accessory_type: AccessoryType::Custom,
            codes: fields.iter().map(|signature| signature.code).collect(),
            presence: 0,
            fields,
        }
    }

    /// Build a custom schema by matching field names against the table of known fields. Names
    /// which don't match are skipped.
    pub fn resolve<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let fields = names
            .into_iter()
            .filter_map(|name| match Signature::known(name) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    warn!("Skipping custom history field: {}", e);
                    None
                }
            })
            .collect();
        Self::custom(fields)
    }

    pub fn accessory_type(&self) -> AccessoryType {
        self.accessory_type
    }

    pub fn codes(&self) -> &[u16] {
        &self.codes
    }

    pub fn presence(&self) -> u8 {
        self.presence
    }

    pub fn fields(&self) -> &[Signature] {
        &self.fields
    }
}
