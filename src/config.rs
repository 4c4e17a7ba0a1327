//! Harness configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `hwtest.toml` (or an explicit path)
//! 2. Environment variables prefixed with `HWTEST_`, nested with `__`
//!
//! Every field has a default, so a missing file yields a working configuration.
//!
//! # Example
//! ```no_run
//! use hwtest::config::HarnessConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // HWTEST_CONTROLLER__DEFAULT_WAIT_SECS=0.5 overrides the file
//! let config = HarnessConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use crate::controller::{wait_from_secs, ActionKind};
use crate::error::{HarnessError, HarnessResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "hwtest.toml";

/// Top-level harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Controller scheduling defaults
    pub controller: ControllerConfig,
    /// Record sink settings
    pub logging: LoggingConfig,
    /// Background driver settings
    pub background: BackgroundConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Diagnostics level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "hwtest".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Scheduling defaults applied to steps that leave them unspecified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Action used when a step does not name one
    pub default_action: ActionKind,
    /// Wait in seconds used when a step does not give one
    pub default_wait_secs: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_action: ActionKind::CheckAndWait,
            default_wait_secs: 0.0,
        }
    }
}

impl ControllerConfig {
    /// The default wait as a `Duration`.
    pub fn default_wait(&self) -> HarnessResult<Duration> {
        wait_from_secs(self.default_wait_secs)
    }
}

/// Which sink records go to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Discard records
    Null,
    /// One line per record on the console
    Console,
    /// CSV tables in `csv_dir`
    Csv,
}

/// Record sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Sink type
    pub sink: SinkKind,
    /// Output directory for the CSV sink
    pub csv_dir: PathBuf,
    /// Wrap the sink in an asynchronous decoupling logger
    pub asynchronous: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Console,
            csv_dir: PathBuf::from("data"),
            asynchronous: false,
        }
    }
}

/// Background driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Worker polling period in milliseconds
    pub period_ms: u64,
    /// How long `read()` waits for the first record, in milliseconds
    pub read_timeout_ms: u64,
    /// How long `shutdown()` waits before killing the worker, in milliseconds
    pub shutdown_timeout_ms: u64,
    /// Sink used inside the worker process (console goes to stderr)
    pub worker_sink: SinkKind,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            period_ms: 20,
            read_timeout_ms: 2000,
            shutdown_timeout_ms: 2000,
            worker_sink: SinkKind::Console,
        }
    }
}

impl BackgroundConfig {
    /// Polling period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// First-record timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl HarnessConfig {
    /// Load configuration from `hwtest.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `HWTEST_`.
    /// Example: `HWTEST_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> HarnessResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(HarnessConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HWTEST_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> HarnessResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(HarnessError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.controller.default_wait()?;

        if self.background.period_ms == 0 {
            return Err(HarnessError::Configuration(
                "background.period_ms must be greater than 0".to_string(),
            ));
        }

        if self.background.read_timeout_ms < self.background.period_ms {
            return Err(HarnessError::Configuration(format!(
                "background.read_timeout_ms ({}) must be at least period_ms ({})",
                self.background.read_timeout_ms, self.background.period_ms
            )));
        }

        if self.background.worker_sink == SinkKind::Csv {
            return Err(HarnessError::Configuration(
                "background.worker_sink must be 'console' or 'null'".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.controller.default_action, ActionKind::CheckAndWait);
        assert_eq!(config.controller.default_wait().unwrap(), Duration::ZERO);
        assert_eq!(config.background.period(), Duration::from_millis(20));
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = HarnessConfig::load_from("does-not-exist.toml").unwrap();
            assert_eq!(config, HarnessConfig::default());
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "hwtest.toml",
                r#"
                    [application]
                    name = "bench"

                    [controller]
                    default_action = "wait"
                    default_wait_secs = 1.5

                    [logging]
                    sink = "csv"
                    csv_dir = "out"
                "#,
            )?;
            jail.set_env("HWTEST_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("HWTEST_BACKGROUND__PERIOD_MS", "50");

            let config = HarnessConfig::load().unwrap();
            assert_eq!(config.application.name, "bench");
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.controller.default_action, ActionKind::Wait);
            assert_eq!(
                config.controller.default_wait().unwrap(),
                Duration::from_millis(1500)
            );
            assert_eq!(config.logging.sink, SinkKind::Csv);
            assert_eq!(config.logging.csv_dir, PathBuf::from("out"));
            assert_eq!(config.background.period_ms, 50);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn invalid_log_level() {
        let mut config = HarnessConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Configuration(_))
        ));
    }

    #[test]
    fn negative_default_wait_is_rejected() {
        let mut config = HarnessConfig::default();
        config.controller.default_wait_secs = -1.0;
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidDuration(_))
        ));

        config.controller.default_wait_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_period_is_rejected() {
        let mut config = HarnessConfig::default();
        config.background.period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_cannot_log_to_csv() {
        let mut config = HarnessConfig::default();
        config.background.worker_sink = SinkKind::Csv;
        assert!(config.validate().is_err());
    }
}
