//! Loopback network interface as a device under test.
//!
//! The driver reads transmit byte counters from `/proc/net/dev`; its only command
//! pings localhost to generate traffic. The component checks that the interface is
//! quiet unless the test just sent something. This assumes nothing else on the host
//! uses the interface during the test.

use crate::component::{Component, Probe};
use crate::driver::{Driver, FixedRecord};
use crate::logging::SharedLogger;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Kernel interface statistics.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

crate::fixed_record! {
    /// One interface reading.
    pub struct NetworkReading {
        /// Bytes transmitted since the previous read.
        pub incremental_bytes: i32,
        /// Bytes transmitted since the driver was created.
        pub cumulative_bytes: i32,
    }
}

/// Commands accepted by [`NetworkDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkCommand {
    /// Send one ICMP echo request to the ping target.
    Ping,
}

/// Transmit byte count for `interface` from `/proc/net/dev` formatted text.
///
/// Each interface line is `name: <8 receive columns> <8 transmit columns>`; the
/// first transmit column is the byte count.
pub fn transmitted_bytes(contents: &str, interface: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let counters = line.trim_start().strip_prefix(interface)?.strip_prefix(':')?;
        counters.split_whitespace().nth(8)?.parse().ok()
    })
}

struct Counters {
    baseline: u64,
    last: u64,
}

/// Reads one interface's transmit counter.
pub struct NetworkDriver {
    interface: String,
    stats_path: PathBuf,
    ping_target: String,
    counters: Mutex<Counters>,
    telemetry: Option<SharedLogger>,
}

impl NetworkDriver {
    /// Driver for the loopback interface `lo`.
    pub async fn loopback() -> Result<Self> {
        Self::new("lo", PROC_NET_DEV).await
    }

    /// Driver for `interface`, reading statistics from `stats_path`.
    ///
    /// The current counter becomes the baseline for `cumulative_bytes`.
    pub async fn new(interface: impl Into<String>, stats_path: impl Into<PathBuf>) -> Result<Self> {
        let interface = interface.into();
        let stats_path = stats_path.into();
        let start = read_counter(&stats_path, &interface).await?;
        debug!(interface = %interface, start, "network driver opened");

        Ok(Self {
            interface,
            stats_path,
            ping_target: "localhost".to_string(),
            counters: Mutex::new(Counters {
                baseline: start,
                last: start,
            }),
            telemetry: None,
        })
    }

    /// Ping a different host.
    pub fn with_ping_target(mut self, target: impl Into<String>) -> Self {
        self.ping_target = target.into();
        self
    }

    /// Also log every reading as `network` telemetry.
    pub fn with_telemetry(mut self, logger: SharedLogger) -> Self {
        self.telemetry = Some(logger);
        self
    }

    /// Interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

async fn read_counter(path: &std::path::Path, interface: &str) -> Result<u64> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    transmitted_bytes(&contents, interface)
        .ok_or_else(|| anyhow!("interface '{interface}' not found in {}", path.display()))
}

fn clamp(bytes: u64) -> i32 {
    i32::try_from(bytes).unwrap_or(i32::MAX)
}

#[async_trait]
impl Driver for NetworkDriver {
    type Reading = NetworkReading;
    type Command = NetworkCommand;

    async fn read(&self) -> Result<NetworkReading> {
        let now = read_counter(&self.stats_path, &self.interface).await?;
        let reading = {
            let mut counters = match self.counters.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let reading = NetworkReading {
                incremental_bytes: clamp(now.saturating_sub(counters.last)),
                cumulative_bytes: clamp(now.saturating_sub(counters.baseline)),
            };
            counters.last = now;
            reading
        };

        if let Some(logger) = &self.telemetry {
            logger.log(reading.to_telemetry("network").into());
        }
        Ok(reading)
    }

    async fn write(&self, command: NetworkCommand) -> Result<()> {
        match command {
            NetworkCommand::Ping => {
                let status = tokio::process::Command::new("ping")
                    .args(["-c", "1", &self.ping_target])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .context("running ping")?;
                if !status.success() {
                    bail!("ping {} failed: {status}", self.ping_target);
                }
            }
        }
        Ok(())
    }
}

/// Component checking that the interface carries traffic only when the test sends.
pub struct Network<D> {
    probe: Probe,
    driver: D,
    expect_bytes: AtomicBool,
    last_cumulative: AtomicI32,
}

impl<D> Network<D>
where
    D: Driver<Reading = NetworkReading, Command = NetworkCommand>,
{
    /// Component named `network`.
    pub fn new(driver: D, logger: SharedLogger) -> Self {
        Self {
            probe: Probe::new("network", logger),
            driver,
            expect_bytes: AtomicBool::new(false),
            last_cumulative: AtomicI32::new(0),
        }
    }

    /// Generate traffic and expect it at the next check.
    pub async fn send(&self) -> Result<()> {
        self.driver.write(NetworkCommand::Ping).await?;
        self.expect_bytes.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl<D> Component for Network<D>
where
    D: Driver<Reading = NetworkReading, Command = NetworkCommand>,
{
    fn probe(&self) -> &Probe {
        &self.probe
    }

    async fn check(&self) -> Result<()> {
        let reading = self.driver.read().await?;
        let previous = self
            .last_cumulative
            .swap(reading.cumulative_bytes, Ordering::SeqCst);
        let sent = f64::from(reading.cumulative_bytes.saturating_sub(previous));

        if self.expect_bytes.swap(false, Ordering::SeqCst) {
            self.assert_gt(1.0, sent);
        } else {
            self.assert_between(0.0, sent, 0.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Verdict;
    use crate::logging::MemoryLogger;
    use std::sync::Arc;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1000      10    0    0    0     0          0         0     1200      12    0    0    0     0       0          0
  eth0:98765432  1234    0    0    0     0          0         0 12345678    4321    0    0    0     0       0          0
";

    fn stats(dir: &tempfile::TempDir, lo_tx: u64) -> PathBuf {
        let path = dir.path().join("dev");
        let text = SAMPLE.replace("1200", &lo_tx.to_string());
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn parses_transmit_bytes() {
        assert_eq!(transmitted_bytes(SAMPLE, "lo"), Some(1200));
        assert_eq!(transmitted_bytes(SAMPLE, "eth0"), Some(12_345_678));
        assert_eq!(transmitted_bytes(SAMPLE, "wlan0"), None);
        assert_eq!(transmitted_bytes(SAMPLE, "eth"), None);
    }

    #[tokio::test]
    async fn read_tracks_increment_and_total() {
        let dir = tempfile::tempdir().unwrap();
        let path = stats(&dir, 1200);
        let driver = NetworkDriver::new("lo", &path).await.unwrap();

        assert_eq!(driver.read().await.unwrap(), NetworkReading::default());

        stats(&dir, 1500);
        assert_eq!(
            driver.read().await.unwrap(),
            NetworkReading {
                incremental_bytes: 300,
                cumulative_bytes: 300
            }
        );

        stats(&dir, 1600);
        assert_eq!(
            driver.read().await.unwrap(),
            NetworkReading {
                incremental_bytes: 100,
                cumulative_bytes: 400
            }
        );
    }

    #[tokio::test]
    async fn missing_interface_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = stats(&dir, 0);
        assert!(NetworkDriver::new("wlan0", &path).await.is_err());
    }

    #[tokio::test]
    async fn quiet_interface_passes_and_traffic_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = stats(&dir, 1200);
        let memory = MemoryLogger::new();
        let network = Network::new(
            NetworkDriver::new("lo", &path).await.unwrap(),
            Arc::new(memory.clone()),
        );

        network.check().await.unwrap();
        stats(&dir, 1300);
        network.check().await.unwrap();

        let events = memory.events();
        assert_eq!(events[0].verdict(), Verdict::Pass);
        assert_eq!(events[1].verdict(), Verdict::Fail);
        assert_eq!(
            (events[1].lower_bound(), events[1].value(), events[1].upper_bound()),
            (0.0, 100.0, 0.0)
        );
    }
}
