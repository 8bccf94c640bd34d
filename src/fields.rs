use std::collections::HashMap;

use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::keyify;

/// Normalized field map emitted once per poll, per device.
pub type FieldMap = HashMap<String, FieldValue>;

/// Typed value of a single metric field.
///
/// The monitor endpoint mixes numbers, booleans and strings under
/// the same kind of key, so every companion value is converted into
/// this union before it leaves the extractor.
///
/// JSON `null` has no variant: a null value produces no field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl FieldValue {
    /// Converts a decoded JSON value.
    ///
    /// RETURNS:
    /// - `Ok(Some(_))` for numbers, booleans and strings
    /// - `Ok(None)` for `null`
    /// - `Err(kind)` for arrays and objects
    pub fn from_json(value: &Value) -> Result<Option<Self>, &'static str> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(Self::Bool(*b))),
            Value::String(s) => Ok(Some(Self::String(s.clone()))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Some(Self::Integer(i))),
                // u64 beyond i64::MAX and real floats both land here
                None => Ok(n.as_f64().map(Self::Float)),
            },
            Value::Array(_) => Err("array"),
            Value::Object(_) => Err("object"),
        }
    }
}

/// Field-level extraction failure.
///
/// These never abort a poll: the offending field is left out and
/// the error is reported next to the emitted sample.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("{key}: label is not a string")]
    Label { key: String },

    #[error("{key}: cannot parse temperature {raw:?}")]
    Temperature { key: String, raw: String },

    #[error("{key}: unsupported {kind} value")]
    Unsupported { key: String, kind: &'static str },
}

// ------------------------------------------------------------
// Field rules
// ------------------------------------------------------------
//
// The monitor payload names its entries with numbered keys:
//
//     "T101": "Studio A"        <- label, rule "T1", index 01
//     "TempValue01": "72 *F"    <- companion value
//
// A rule recognizes the label key by its literal prefix followed by
// digits, and reads the companion key built from its own prefix
// plus the same index, zero-padded to two digits.
//
// The prefixes are distinct, so a key matches at most one rule.
//

/// Unit marker appended to temperature readings.
pub const TEMPERATURE_UNIT: &str = " *F";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Temperature,
    Meter,
    VoltageCurrent,
    Status,
    Relay,
}

impl FieldRule {
    pub const ALL: [FieldRule; 5] = [
        FieldRule::Temperature,
        FieldRule::Meter,
        FieldRule::VoltageCurrent,
        FieldRule::Status,
        FieldRule::Relay,
    ];

    /// Literal prefix of the label key.
    pub fn key_prefix(self) -> &'static str {
        match self {
            FieldRule::Temperature => "T1",
            FieldRule::Meter => "M1",
            FieldRule::VoltageCurrent => "VCLabel",
            FieldRule::Status => "S1",
            FieldRule::Relay => "R2",
        }
    }

    /// Literal prefix of the companion value key.
    pub fn companion_prefix(self) -> &'static str {
        match self {
            FieldRule::Temperature => "TempValue",
            FieldRule::Meter => "MeterValue",
            FieldRule::VoltageCurrent => "VCValue",
            FieldRule::Status => "StatusIndicator",
            FieldRule::Relay => "RelayIndicator",
        }
    }

    /// Finds the rule a key belongs to, with its numeric index.
    pub fn classify(key: &str) -> Option<(FieldRule, u32)> {
        Self::ALL
            .into_iter()
            .find_map(|rule| rule.index_of(key).map(|index| (rule, index)))
    }

    /// Index captured from `<prefix><digits>`, if the key has that shape.
    fn index_of(self, key: &str) -> Option<u32> {
        let digits = key.strip_prefix(self.key_prefix())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn companion_key(self, index: u32) -> String {
        format!("{}{:02}", self.companion_prefix(), index)
    }

    /// Converts the companion value into the emitted field value.
    ///
    /// Temperatures are parsed out of their "<n> *F" string form;
    /// every other rule passes the value through with its JSON type.
    fn transform(self, companion_key: &str, value: &Value) -> Result<Option<FieldValue>, FieldError> {
        match self {
            FieldRule::Temperature => parse_temperature(companion_key, value),
            FieldRule::Meter | FieldRule::VoltageCurrent | FieldRule::Status | FieldRule::Relay => {
                FieldValue::from_json(value).map_err(|kind| FieldError::Unsupported {
                    key: companion_key.to_string(),
                    kind,
                })
            }
        }
    }
}

fn parse_temperature(key: &str, value: &Value) -> Result<Option<FieldValue>, FieldError> {
    let raw = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s.as_str(),
        // bare integers are taken as-is
        Value::Number(n) if n.is_i64() => return Ok(n.as_i64().map(FieldValue::Integer)),
        other => {
            return Err(FieldError::Temperature {
                key: key.to_string(),
                raw: other.to_string(),
            })
        }
    };

    raw.strip_suffix(TEMPERATURE_UNIT)
        .unwrap_or(raw)
        .parse::<i64>()
        .map(|t| Some(FieldValue::Integer(t)))
        .map_err(|_| FieldError::Temperature {
            key: key.to_string(),
            raw: raw.to_string(),
        })
}

/// Result of running every rule over one `values` object.
#[derive(Debug, Default)]
pub struct Extraction {
    pub fields: FieldMap,
    pub errors: Vec<FieldError>,
}

/// Builds the metric field map from the nested `values` object.
///
/// For every key matching a rule, the key's own value is the field
/// label (normalized with [`keyify`]) and the companion key holds the
/// field value. Keys matching no rule are ignored, as are labels
/// whose companion is missing or null.
pub fn extract(values: &Map<String, Value>) -> Extraction {
    let mut out = Extraction::default();

    for (key, label) in values {
        let Some((rule, index)) = FieldRule::classify(key) else {
            continue;
        };

        let Some(label) = label.as_str() else {
            out.errors.push(FieldError::Label { key: key.clone() });
            continue;
        };

        let companion_key = rule.companion_key(index);
        let Some(companion) = values.get(&companion_key) else {
            debug!("{key}: companion {companion_key} missing, skipped");
            continue;
        };

        match rule.transform(&companion_key, companion) {
            Ok(Some(value)) => {
                out.fields.insert(keyify(label), value);
            }
            Ok(None) => debug!("{key}: companion {companion_key} is null, skipped"),
            Err(e) => out.errors.push(e),
        }
    }

    out
}
