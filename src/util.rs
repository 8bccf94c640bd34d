/// Utility helpers shared by the extractor and the output sink.
///
/// This module contains:
/// - Field name normalization
/// - Time helpers
/// - InfluxDB line-protocol formatting
///
/// IMPORTANT:
/// - No device-specific business logic should live here.
/// - Everything in this module is pure and deterministic
///   (apart from the clock).
///

use chrono::Utc;

use crate::fields::{FieldMap, FieldValue};

/// Normalize a human-readable device label into a field name.
///
/// Examples:
/// - "Temp Sensor 01" -> "temp_sensor_01"
/// - "Main PGM"       -> "main_pgm"
///
/// Applying it twice yields the same result as applying it once.
pub fn keyify(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

/// Returns the current Unix timestamp in nanoseconds.
///
/// Falls back to 0 outside the representable range
/// (roughly years 1677..2262).
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Formats one sample as an InfluxDB line-protocol line.
///
/// Layout:
///     measurement[,tag=value...] field=value[,field=value...] timestamp
///
/// Fields and tags are sorted by key so output is stable.
/// Returns `None` when there is nothing to write (line protocol
/// requires at least one field).
pub fn format_line(
    measurement: &str,
    fields: &FieldMap,
    tags: &[(&str, &str)],
    timestamp_ns: i64,
) -> Option<String> {
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_key(measurement, true);

    let mut tags = tags.to_vec();
    tags.sort_unstable();
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_key(key, false));
        line.push('=');
        line.push_str(&escape_key(value, false));
    }

    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort_unstable();

    let rendered: Vec<String> = keys
        .into_iter()
        .map(|key| format!("{}={}", escape_key(key, false), format_value(&fields[key])))
        .collect();

    line.push(' ');
    line.push_str(&rendered.join(","));
    line.push(' ');
    line.push_str(&timestamp_ns.to_string());

    Some(line)
}

fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Integer(v) => format!("{v}i"),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::String(v) => format!(
            "\"{}\"",
            v.replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
                .replace('\r', "\\r")
        ),
    }
}

// Measurements escape commas and spaces; tag keys, tag values and
// field keys additionally escape '='. Line breaks are written as the
// two-character sequences \n and \r so a sample stays on one line.
fn escape_key(raw: &str, measurement: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\n' => {
                out.push_str("\\n");
                continue;
            }
            '\r' => {
                out.push_str("\\r");
                continue;
            }
            ',' | ' ' => out.push('\\'),
            '=' if !measurement => out.push('\\'),
            _ => {}
        }
        out.push(c);
    }
    out
}
