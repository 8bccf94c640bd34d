use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track devices currently logged in
/// - Track gather throughput (cycles, polls)
/// - Track failures (poll errors, field errors)
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe to update from every poll task
#[derive(Default)]
pub struct RuntimeMetrics {
    pub devices_online: AtomicUsize,

    pub gather_cycles: AtomicUsize,
    pub polls_ok: AtomicUsize,
    pub poll_errors: AtomicUsize,
    pub field_errors: AtomicUsize,

    pub logins: AtomicUsize,
    pub login_errors: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for the periodic log reporter.
    pub fn summary(&self) -> String {
        format!(
            "online={} cycles={} polls_ok={} poll_err={} field_err={} logins={} login_err={}",
            self.devices_online.load(Ordering::Relaxed),
            self.gather_cycles.load(Ordering::Relaxed),
            self.polls_ok.load(Ordering::Relaxed),
            self.poll_errors.load(Ordering::Relaxed),
            self.field_errors.load(Ordering::Relaxed),
            self.logins.load(Ordering::Relaxed),
            self.login_errors.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
