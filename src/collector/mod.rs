/// Collector module
///
/// This module groups the gather side of the collector:
/// - The `Accumulator` contract every sample and error goes through
/// - `LineAccumulator`, the stdout sink of the standalone binary
/// - The `runner` submodule: the gather orchestrator
///
/// Design notes:
/// - Device-specific logic MUST NOT live here
/// - Sinks only format and forward, they never inspect fields
pub mod runner;

use std::collections::HashMap;

use log::error;

use crate::fields::FieldMap;
use crate::util;

pub type Tags = HashMap<String, String>;

/// Output sink for gathered samples.
///
/// CONTRACT:
/// - `add_fields` records one sample
/// - `add_error` records a non-fatal error; the cycle continues
///
/// THREAD SAFETY:
/// - Must be Send + Sync
pub trait Accumulator: Send + Sync {
    fn add_fields(&self, measurement: &str, fields: FieldMap, tags: Option<&Tags>);

    fn add_error(&self, err: anyhow::Error);
}

/// Prints every sample to stdout as an InfluxDB line-protocol line.
///
/// Errors are not printed to stdout: they go to the log at error
/// level, so the output stream stays machine-readable.
pub struct LineAccumulator;

impl Accumulator for LineAccumulator {
    fn add_fields(&self, measurement: &str, fields: FieldMap, tags: Option<&Tags>) {
        let tags: Vec<(&str, &str)> = tags
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        if let Some(line) = util::format_line(measurement, &fields, &tags, util::now_ns()) {
            println!("{line}");
        }
    }

    fn add_error(&self, err: anyhow::Error) {
        error!("{err:#}");
    }
}
