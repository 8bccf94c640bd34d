use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::time::{MissedTickBehavior, interval, timeout};

use crate::{
    collector::Accumulator,
    config::Config,
    device::{Credentials, Device, DeviceError, poller::Sample},
    metrics::METRICS,
};

/// Gather orchestrator for a set of Broadcast Tools devices.
///
/// LIFECYCLE:
/// - Addresses are parsed once, at construction
/// - The first `gather` logs every device in, one after the other;
///   any failure aborts that cycle and the next one retries
/// - Every `gather` after that polls all devices concurrently
/// - `close` logs every device out; the next `gather` logs in again
///
/// GUARANTEES:
/// - One failing device never prevents the others from reporting
/// - `gather` returns only after every device's poll has finished
///
pub struct BroadcastTools {
    devices: Vec<Device>,
    initialized: bool,
}

impl BroadcastTools {
    pub const DESCRIPTION: &'static str = "Read metrics from one or many Broadcast Tools devices";

    pub const SAMPLE_CONFIG: &'static str = r#"{
  "urls": ["http://localhost:1776"],
  "user": "admin",
  "password": "password",
  "interval_secs": 10,
  "timeout_secs": 5,
  "debug": false
}"#;

    /// Builds one HTTP device per configured address.
    ///
    /// A malformed address fails the whole set.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let credentials = Arc::new(Credentials {
            user: config.user.clone(),
            password: config.password.clone(),
        });

        let devices = config
            .urls
            .iter()
            .map(|url| Device::connect(url, credentials.clone(), config.timeout()))
            .collect::<Result<Vec<_>, DeviceError>>()
            .context("invalid device configuration")?;

        Ok(Self::new(devices))
    }

    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            initialized: false,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Logs in every device, in configuration order.
    ///
    /// On failure the devices logged in so far are logged out again,
    /// leaving the whole set unauthenticated for the retry.
    async fn init(&mut self) -> anyhow::Result<()> {
        for i in 0..self.devices.len() {
            if let Err(e) = self.devices[i].login().await {
                METRICS.login_errors.fetch_add(1, Ordering::Relaxed);
                let address = self.devices[i].address().to_string();

                join_all(self.devices[..i].iter_mut().map(|d| d.logout())).await;

                return Err(anyhow::Error::new(e).context(format!("device {address}: login failed")));
            }
            METRICS.logins.fetch_add(1, Ordering::Relaxed);
        }

        METRICS
            .devices_online
            .fetch_add(self.devices.len(), Ordering::Relaxed);
        info!("{} device(s) online", self.devices.len());

        self.initialized = true;
        Ok(())
    }

    /// Runs one gather cycle.
    ///
    /// Each device moves into its own task for the poll and comes
    /// back through the join handle. Results are reported after the
    /// fan-in: samples through `add_fields`, failures through
    /// `add_error`.
    ///
    /// ERRORS:
    /// - Only initialization failures; poll failures are reported
    ///   to the accumulator instead
    pub async fn gather(&mut self, acc: &dyn Accumulator) -> anyhow::Result<()> {
        if !self.initialized {
            self.init().await?;
        }

        METRICS.gather_cycles.fetch_add(1, Ordering::Relaxed);

        let addresses: Vec<String> = self.devices.iter().map(|d| d.address().to_string()).collect();

        let tasks: Vec<_> = std::mem::take(&mut self.devices)
            .into_iter()
            .map(|device| {
                tokio::spawn(async move {
                    let result = device.poll().await;
                    (device, result)
                })
            })
            .collect();

        for (address, joined) in addresses.into_iter().zip(join_all(tasks).await) {
            match joined {
                Ok((device, result)) => {
                    report(&device, result, acc);
                    self.devices.push(device);
                }

                // A panicked task takes its device with it
                Err(e) => {
                    METRICS.poll_errors.fetch_add(1, Ordering::Relaxed);
                    METRICS.devices_online.fetch_sub(1, Ordering::Relaxed);
                    error!("{address}: poll task aborted, removed from the device set");
                    acc.add_error(
                        anyhow::Error::new(e).context(format!("device {address}: poll task aborted, device dropped")),
                    );
                }
            }
        }

        Ok(())
    }

    /// Logs every device out. Never fails.
    pub async fn close(&mut self) {
        let online = self.devices.iter().filter(|d| d.is_authenticated()).count();

        join_all(self.devices.iter_mut().map(|d| d.logout())).await;

        METRICS.devices_online.fetch_sub(online, Ordering::Relaxed);
        self.initialized = false;
    }

    /// Gathers every `every` until `shutdown` resolves, then closes.
    ///
    /// DESIGN:
    /// - Shutdown is raced against the running cycle, so a device
    ///   stuck mid-request cannot hold the process open
    /// - A cycle cancelled this way leaves its poll tasks detached;
    ///   those devices are not logged out
    /// - `close` gets at most `grace` before it is abandoned
    ///
    pub async fn run<F>(&mut self, acc: &dyn Accumulator, every: Duration, grace: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                _ = ticker.tick() => {
                    tokio::select! {
                        biased;

                        _ = &mut shutdown => {
                            warn!("shutdown requested during a gather cycle, cycle abandoned");
                            break;
                        }

                        result = self.gather(acc) => {
                            if let Err(e) = result {
                                error!("gather failed: {e:#}");
                            }
                        }
                    }
                }
            }
        }

        info!("shutting down");

        if timeout(grace, self.close()).await.is_err() {
            warn!("logout did not finish within {grace:?}, exiting anyway");
        }
    }
}

fn report(device: &Device, result: Result<Sample, DeviceError>, acc: &dyn Accumulator) {
    match result {
        Ok(sample) => {
            METRICS.polls_ok.fetch_add(1, Ordering::Relaxed);
            debug!("{}: {} fields", device.address(), sample.fields.len());

            for e in sample.field_errors {
                METRICS.field_errors.fetch_add(1, Ordering::Relaxed);
                acc.add_error(anyhow::Error::new(e).context(format!("device {}", device.address())));
            }

            acc.add_fields(sample.metric, sample.fields, None);
        }

        Err(e) => {
            METRICS.poll_errors.fetch_add(1, Ordering::Relaxed);
            acc.add_error(anyhow::Error::new(e).context(format!("device {}: poll failed", device.address())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::memory::MemoryAccumulator;
    use crate::device::session::{LOGIN_PATH, LOGOUT_PATH};
    use crate::device::testing::fake_device;
    use crate::device::transport::{Response, TransportError, fake::{self, FakeMode, FakeTransport}};
    use crate::fields::FieldValue;
    use serde_json::json;

    fn monitor(label: &str, level: i64) -> Result<Response, TransportError> {
        fake::json(json!({
            "values": {
                "M101": label,
                "MeterValue01": level
            }
        }))
    }

    fn plugin(transports: &[(&str, &FakeTransport)]) -> BroadcastTools {
        BroadcastTools::new(
            transports
                .iter()
                .map(|(address, t)| fake_device(address, t))
                .collect(),
        )
    }

    #[tokio::test]
    async fn first_gather_logs_in_then_polls() {
        let a = FakeTransport::new(vec![fake::login_ok(&[("SID", "a")]), monitor("Level", 1), monitor("Level", 2)]);
        let mut bt = plugin(&[("http://a", &a)]);
        let acc = MemoryAccumulator::default();

        bt.gather(&acc).await.unwrap();
        bt.gather(&acc).await.unwrap();

        let paths: Vec<_> = a.requests().iter().map(|r| r.path).collect();
        assert_eq!(paths.iter().filter(|p| **p == LOGIN_PATH).count(), 1);
        assert_eq!(paths.len(), 3);

        let samples = acc.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].0, "broadcasttools");
        assert_eq!(samples[1].1["level"], FieldValue::Integer(2));
        assert!(acc.errors().is_empty());
    }

    #[tokio::test]
    async fn failing_device_does_not_block_siblings() {
        let a = FakeTransport::new(vec![fake::login_ok(&[("SID", "a")]), monitor("Level", 1)]);
        let b = FakeTransport::new(vec![fake::login_ok(&[("SID", "b")]), fake::status(500)]);
        let c = FakeTransport::new(vec![fake::login_ok(&[("SID", "c")]), monitor("Level", 3)]);
        let mut bt = plugin(&[("http://a", &a), ("http://b", &b), ("http://c", &c)]);
        let acc = MemoryAccumulator::default();

        bt.gather(&acc).await.unwrap();

        assert_eq!(acc.samples().len(), 2);
        let errors = acc.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("http://b"), "{}", errors[0]);
        assert!(errors[0].contains("got 500"), "{}", errors[0]);

        // every device is handed back, in order
        let addresses: Vec<_> = bt.devices().iter().map(|d| d.address()).collect();
        assert_eq!(addresses, ["http://a", "http://b", "http://c"]);
    }

    #[tokio::test]
    async fn login_failure_aborts_cycle_and_rolls_back() {
        let a = FakeTransport::new(vec![fake::login_ok(&[("SID", "a")]), fake::status(200)]);
        let b = FakeTransport::new(vec![fake::status(403)]);
        let mut bt = plugin(&[("http://a", &a), ("http://b", &b)]);
        let acc = MemoryAccumulator::default();

        let err = bt.gather(&acc).await.unwrap_err();
        assert!(format!("{err:#}").contains("http://b: login failed"), "{err:#}");

        assert!(acc.samples().is_empty());
        assert!(bt.devices().iter().all(|d| !d.is_authenticated()));
        assert_eq!(a.requests().last().map(|r| r.path), Some(LOGOUT_PATH));

        // next cycle retries initialization
        a.push(fake::login_ok(&[("SID", "a2")]));
        a.push(monitor("Level", 1));
        b.push(fake::login_ok(&[("SID", "b2")]));
        b.push(monitor("Level", 2));

        bt.gather(&acc).await.unwrap();
        assert_eq!(acc.samples().len(), 2);
    }

    #[tokio::test]
    async fn field_errors_are_reported_alongside_the_sample() {
        let a = FakeTransport::new(vec![
            fake::login_ok(&[("SID", "a")]),
            fake::json(json!({
                "values": {
                    "T101": "Rack",
                    "TempValue01": "hot *F",
                    "S101": "Silence",
                    "StatusIndicator01": false
                }
            })),
        ]);
        let mut bt = plugin(&[("http://a", &a)]);
        let acc = MemoryAccumulator::default();

        bt.gather(&acc).await.unwrap();

        let samples = acc.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1.len(), 1);
        assert_eq!(samples[0].1["silence"], FieldValue::Bool(false));

        let errors = acc.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("cannot parse temperature"), "{}", errors[0]);
    }

    #[tokio::test]
    async fn close_logs_out_and_next_gather_logs_in_again() {
        let a = FakeTransport::new(vec![
            fake::login_ok(&[("SID", "a")]),
            monitor("Level", 1),
            Err(fake::timeout(LOGOUT_PATH)),
            fake::login_ok(&[("SID", "a2")]),
            monitor("Level", 2),
        ]);
        let mut bt = plugin(&[("http://a", &a)]);
        let acc = MemoryAccumulator::default();

        bt.gather(&acc).await.unwrap();
        bt.close().await;
        assert!(!bt.devices()[0].is_authenticated());

        bt.gather(&acc).await.unwrap();
        assert_eq!(acc.samples().len(), 2);
        assert!(acc.errors().is_empty());
    }

    #[tokio::test]
    async fn panicked_poll_names_the_lost_device() {
        let a = FakeTransport::new(vec![fake::login_ok(&[("SID", "a")]), monitor("Level", 1), monitor("Level", 2)]);
        let b = FakeTransport::new(vec![fake::login_ok(&[("SID", "b")]), monitor("Level", 5)]);
        let mut bt = plugin(&[("http://a", &a), ("http://b", &b)]);
        let acc = MemoryAccumulator::default();

        bt.gather(&acc).await.unwrap();
        assert!(acc.errors().is_empty());

        b.set_mode(FakeMode::Panic);
        bt.gather(&acc).await.unwrap();

        let errors = acc.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("device http://b: poll task aborted"), "{}", errors[0]);

        let addresses: Vec<_> = bt.devices().iter().map(|d| d.address()).collect();
        assert_eq!(addresses, ["http://a"]);
        assert_eq!(acc.samples().len(), 3);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_hung_cycle() {
        let a = FakeTransport::default();
        a.set_mode(FakeMode::Hang);
        let mut bt = plugin(&[("http://a", &a)]);
        let acc = MemoryAccumulator::default();

        let stop = tokio::time::sleep(Duration::from_millis(100));
        let finished = timeout(
            Duration::from_secs(5),
            bt.run(&acc, Duration::from_secs(1), Duration::from_millis(100), stop),
        )
        .await;

        assert!(finished.is_ok(), "run kept waiting on the hung login");
        assert_eq!(a.requests().len(), 1);
        assert!(acc.samples().is_empty());
    }

    #[tokio::test]
    async fn hung_logout_is_bounded_by_grace() {
        let a = FakeTransport::new(vec![fake::login_ok(&[("SID", "a")]), monitor("Level", 1)]);
        let mut bt = plugin(&[("http://a", &a)]);
        let acc = MemoryAccumulator::default();

        bt.gather(&acc).await.unwrap();
        a.set_mode(FakeMode::Hang);

        let finished = timeout(
            Duration::from_secs(5),
            bt.run(&acc, Duration::from_secs(1), Duration::from_millis(100), std::future::ready(())),
        )
        .await;

        assert!(finished.is_ok(), "run kept waiting on the hung logout");
        assert_eq!(a.requests().last().map(|r| r.path), Some(LOGOUT_PATH));
        assert_eq!(acc.samples().len(), 1);
    }

    #[tokio::test]
    async fn run_gathers_on_each_tick_until_shutdown() {
        let a = FakeTransport::new(vec![
            fake::login_ok(&[("SID", "a")]),
            monitor("Level", 1),
            monitor("Level", 2),
            fake::status(200),
        ]);
        let mut bt = plugin(&[("http://a", &a)]);
        let acc = MemoryAccumulator::default();

        // ticks at 0ms and 100ms, shutdown at 150ms
        let stop = tokio::time::sleep(Duration::from_millis(150));
        bt.run(&acc, Duration::from_millis(100), Duration::from_secs(1), stop).await;

        assert_eq!(acc.samples().len(), 2);
        assert!(!bt.devices()[0].is_authenticated());
        assert_eq!(a.requests().last().map(|r| r.path), Some(LOGOUT_PATH));
    }

    #[test]
    fn sample_config_is_valid() {
        crate::device::testing::install_crypto();
        let config: Config = serde_json::from_str(BroadcastTools::SAMPLE_CONFIG).unwrap();
        let bt = BroadcastTools::from_config(&config).unwrap();
        assert_eq!(bt.devices().len(), 1);
    }

    #[test]
    fn bad_address_fails_construction() {
        crate::device::testing::install_crypto();
        let config: Config = serde_json::from_str(
            r#"{"urls": ["http://ok:1776", "bad address"], "user": "u", "password": "p"}"#,
        )
        .unwrap();
        let err = BroadcastTools::from_config(&config).err().unwrap();
        assert!(format!("{err:#}").contains("bad address"));
    }
}
