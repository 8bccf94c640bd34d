use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::transport::Request;
use super::{Device, DeviceError};
use crate::fields::{self, FieldError, FieldMap};

pub const MONITOR_PATH: &str = "/cgi-bin/getexchanger_monitor.cgi";

/// Measurement name of every emitted sample.
pub const METRIC_NAME: &str = "broadcasttools";

/// Body of the monitor endpoint.
///
/// Only the nested `values` object is used; any other top-level
/// member is ignored.
#[derive(Debug, Deserialize)]
struct MonitorPayload {
    values: Map<String, Value>,
}

/// Outcome of one successful poll.
#[derive(Debug)]
pub struct Sample {
    pub metric: &'static str,
    pub fields: FieldMap,

    /// Per-field failures; the affected fields are absent from `fields`.
    pub field_errors: Vec<FieldError>,
}

impl Device {
    /// Reads the monitor endpoint and extracts the field map.
    ///
    /// The device must already be logged in; polling never logs in
    /// on its own.
    pub async fn poll(&self) -> Result<Sample, DeviceError> {
        let Some(cookie) = self.session() else {
            return Err(DeviceError::NotAuthenticated);
        };

        let response = self
            .transport
            .send(Request::get(MONITOR_PATH).with_cookie(Some(cookie)))
            .await?;

        if response.status != 200 {
            return Err(DeviceError::UnexpectedStatus {
                status: response.status,
            });
        }

        let payload: MonitorPayload = serde_json::from_slice(&response.body)?;
        let extraction = fields::extract(&payload.values);

        debug!(
            "{}: {} keys, {} fields, {} field errors",
            self.address,
            payload.values.len(),
            extraction.fields.len(),
            extraction.errors.len()
        );

        Ok(Sample {
            metric: METRIC_NAME,
            fields: extraction.fields,
            field_errors: extraction.errors,
        })
    }
}
