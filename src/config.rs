use std::time::Duration;

use serde::Deserialize;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - The devices to poll and the shared login
// - Gather cadence and request timeout
// - Optional debug logging
//
// NOTE:
// - The file contains the device password and must not be
//   committed to version control.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Base addresses of the devices, e.g. "http://10.0.0.5:1776"
    pub urls: Vec<String>,

    /// Login user, shared by every device
    #[serde(default)]
    pub user: String,

    /// Login password, shared by every device
    #[serde(default)]
    pub password: String,

    /// Seconds between gather cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per-request timeout in seconds.
    ///
    /// Unset means requests wait indefinitely: a hung device then
    /// holds back the end of every gather cycle.
    pub timeout_secs: Option<u64>,

    /// Enables debug-level logging
    pub debug: Option<bool>,
}

fn default_interval_secs() -> u64 {
    10
}

impl Config {
    /// Gather interval, at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }
}
