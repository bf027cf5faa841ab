use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// An error parsing an `AccessoryType` from a string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Invalid accessory type '{0}'")]
pub struct ParseAccessoryTypeError(String);

/// The category of accessory a history belongs to. This selects which fields an entry carries and
/// how they are encoded for the history viewer.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum AccessoryType {
    Weather,
    Energy,
    Room,
    Door,
    Motion,
    Switch,
    Thermo,
    Aqua,
    /// A category whose fields are declared when the history is created.
    Custom,
}

/// How entries of an accessory type reach the ring log.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Routing {
    /// State changes are appended immediately, and the last state is repeated on each tick.
    Discrete,
    /// Samples are collected in a backlog and averaged on each tick.
    Continuous,
    /// Entries are always appended immediately.
    Direct,
}

impl AccessoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Energy => "energy",
            Self::Room => "room",
            Self::Door => "door",
            Self::Motion => "motion",
            Self::Switch => "switch",
            Self::Thermo => "thermo",
            Self::Aqua => "aqua",
            Self::Custom => "custom",
        }
    }

    pub fn routing(self) -> Routing {
        match self {
            Self::Door | Self::Motion | Self::Switch => Routing::Discrete,
            Self::Weather | Self::Energy | Self::Room | Self::Custom => Routing::Continuous,
            Self::Thermo | Self::Aqua => Routing::Direct,
        }
    }

    /// The entry fields recorded for this type, or `None` if every field is kept.
    pub fn fields(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Weather => Some(&["temp", "humidity", "pressure"]),
            Self::Energy => Some(&["power"]),
            Self::Room => Some(&["temp", "humidity", "ppm"]),
            Self::Door | Self::Motion | Self::Switch => Some(&["status"]),
            Self::Aqua => Some(&["status", "waterAmount"]),
            Self::Thermo => Some(&["currentTemp", "setTemp", "valvePosition"]),
            Self::Custom => None,
        }
    }
}

impl Display for AccessoryType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessoryType {
    type Err = ParseAccessoryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weather" => Ok(Self::Weather),
            "energy" => Ok(Self::Energy),
            "room" => Ok(Self::Room),
            "door" => Ok(Self::Door),
            "motion" => Ok(Self::Motion),
            "switch" => Ok(Self::Switch),
            "thermo" => Ok(Self::Thermo),
            "aqua" => Ok(Self::Aqua),
            "custom" => Ok(Self::Custom),
            _ => Err(ParseAccessoryTypeError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        assert_eq!("weather".parse(), Ok(AccessoryType::Weather));
        assert_eq!("custom".parse(), Ok(AccessoryType::Custom));
    }

    #[test]
    fn parse_invalid() {
        assert_eq!(
            "Weather".parse::<AccessoryType>(),
            Err(ParseAccessoryTypeError("Weather".to_string()))
        );
    }

    #[test]
    fn format_round_trips() {
        for accessory_type in [
            AccessoryType::Weather,
            AccessoryType::Energy,
            AccessoryType::Room,
            AccessoryType::Door,
            AccessoryType::Motion,
            AccessoryType::Switch,
            AccessoryType::Thermo,
            AccessoryType::Aqua,
            AccessoryType::Custom,
        ] {
            assert_eq!(accessory_type.to_string().parse(), Ok(accessory_type));
        }
    }

    #[test]
    fn routing() {
        assert_eq!(AccessoryType::Door.routing(), Routing::Discrete);
        assert_eq!(AccessoryType::Room.routing(), Routing::Continuous);
        assert_eq!(AccessoryType::Aqua.routing(), Routing::Direct);
    }
}
