//! Broadcast Tools device handle
//!
//! This module provides:
//! - The `Device` type: one configured unit, its session and transport
//! - The device-level error taxonomy
//!
//! Behavior lives in the submodules:
//! - `session`: login / logout
//! - `poller`:  monitor request and field extraction
//! - `transport`: the HTTP seam

pub mod poller;
pub mod session;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use transport::{HttpTransport, SessionCookie, Transport, TransportError};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid device address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("authentication failed (status {status})")]
    Authentication { status: u16 },

    #[error("no session cookie returned")]
    NoSession,

    #[error("already logged in")]
    AlreadyAuthenticated,

    #[error("not logged in")]
    NotAuthenticated,

    #[error("expected status 200; got {status}")]
    UnexpectedStatus { status: u16 },

    #[error("malformed monitor payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Login credentials, shared by every configured device.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// One polled unit.
///
/// OWNERSHIP:
/// - The device exclusively owns its transport and session cookie
/// - It is moved into its poll task each cycle and handed back
///   when the task completes
///
pub struct Device {
    address: String,
    credentials: Arc<Credentials>,
    transport: Box<dyn Transport>,
    session: Option<SessionCookie>,
}

impl Device {
    pub fn new(
        address: impl Into<String>,
        credentials: Arc<Credentials>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            address: address.into(),
            credentials,
            transport,
            session: None,
        }
    }

    /// Builds an HTTP-backed device from a configured base address.
    ///
    /// Only `http` and `https` addresses are accepted; anything else
    /// (including a bare "host:port", which parses as a scheme) is
    /// rejected here rather than on first request.
    pub fn connect(
        address: &str,
        credentials: Arc<Credentials>,
        timeout: Option<Duration>,
    ) -> Result<Self, DeviceError> {
        let invalid = |reason: String| DeviceError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let base = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", base.scheme())));
        }
        if base.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }

        let transport = HttpTransport::new(base, timeout)?;
        Ok(Self::new(address, credentials, Box::new(transport)))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&SessionCookie> {
        self.session.as_ref()
    }
}
