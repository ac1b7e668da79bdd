use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;

/// Measurand identity as stored upstream. The snapshot map keys measurands by
/// string while the history tiers carry numeric id fields; both collapse to
/// this one type so downstream code never branches on representation.
/// A trimmed decimal string coerces to `Num`, anything else stays `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MeasurandKey {
    Num(i64),
    Text(String),
}

impl MeasurandKey {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(num) => Self::Num(num),
            Err(_) => Self::Text(trimmed.to_string()),
        }
    }

    /// Lenient extraction from the JSON shapes the store and the wire use.
    /// Integral numbers and non-empty strings normalize; everything else is
    /// not a usable key.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(num) => match num.as_i64() {
                Some(n) => Some(Self::Num(n)),
                None => Some(Self::Text(num.to_string())),
            },
            JsonValue::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Self::parse(trimmed))
                }
            }
            _ => None,
        }
    }
}

impl From<i64> for MeasurandKey {
    fn from(num: i64) -> Self {
        Self::Num(num)
    }
}

impl fmt::Display for MeasurandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(num) => write!(f, "{num}"),
            Self::Text(raw) => write!(f, "{raw}"),
        }
    }
}

impl Serialize for MeasurandKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Num(num) => serializer.serialize_i64(*num),
            Self::Text(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for MeasurandKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_json(&value)
            .ok_or_else(|| de::Error::custom("measurand id must be a number or non-empty string"))
    }
}
