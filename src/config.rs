//! Configuration system using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/monitor.toml` (or a path given explicitly)
//! 3. Environment variables prefixed with `RS485_MONITOR_`, nested keys separated
//!    by a double underscore
//!
//! # Example
//! ```no_run
//! use rs485_monitor::config::MonitorConfig;
//!
//! // RS485_MONITOR_SERIAL__BAUD_RATE=9600 overrides [serial] baud_rate
//! let config = MonitorConfig::load()?;
//! config.validate()?;
//! println!("Default baud: {}", config.serial.baud_rate);
//! # Ok::<(), rs485_monitor::MonitorError>(())
//! ```

use crate::core::BaudRate;
use crate::error::{MonitorError, MonitorResult};
use crate::reader::ReaderSettings;
use crate::reconnect::ReconnectSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RS485_MONITOR_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial line settings
    pub serial: SerialConfig,
    /// Auto-connect settings
    pub auto_reconnect: AutoReconnectConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used when none is given on the command line
    pub baud_rate: BaudRate,
    /// Port read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Reader sleep between polls in milliseconds
    pub poll_interval_ms: u64,
    /// Longest incomplete line kept before it is dropped (unset = unbounded)
    pub max_line_len: Option<usize>,
}

/// Auto-connect configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReconnectConfig {
    /// Time between attempts in milliseconds
    pub period_ms: u64,
    /// Availability probe timeout in milliseconds
    pub probe_timeout_ms: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "RS485 Power Monitor".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::default(),
            read_timeout_ms: 200,
            poll_interval_ms: 10,
            max_line_len: None,
        }
    }
}

impl Default for AutoReconnectConfig {
    fn default() -> Self {
        Self {
            period_ms: 2000,
            probe_timeout_ms: 200,
        }
    }
}

impl SerialConfig {
    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl MonitorConfig {
    /// Load from `config/monitor.toml` and the environment.
    pub fn load() -> MonitorResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> MonitorResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let durations = [
            ("serial.read_timeout_ms", self.serial.read_timeout_ms),
            ("serial.poll_interval_ms", self.serial.poll_interval_ms),
            ("auto_reconnect.period_ms", self.auto_reconnect.period_ms),
            ("auto_reconnect.probe_timeout_ms", self.auto_reconnect.probe_timeout_ms),
        ];
        for (key, value) in durations {
            if value == 0 {
                return Err(MonitorError::Configuration(format!(
                    "{key} must be greater than zero"
                )));
            }
        }

        if self.serial.max_line_len == Some(0) {
            return Err(MonitorError::Configuration(
                "serial.max_line_len must be greater than zero when set".to_string(),
            ));
        }

        // A probe that outlives the tick would stall the control loop.
        if self.auto_reconnect.probe_timeout_ms >= self.auto_reconnect.period_ms {
            return Err(MonitorError::Configuration(format!(
                "auto_reconnect.probe_timeout_ms ({}) must be shorter than period_ms ({})",
                self.auto_reconnect.probe_timeout_ms, self.auto_reconnect.period_ms
            )));
        }

        Ok(())
    }

    /// Line reader settings.
    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            poll_interval: Duration::from_millis(self.serial.poll_interval_ms),
            max_line_len: self.serial.max_line_len,
        }
    }

    /// Auto-connect settings.
    pub fn reconnect_settings(&self) -> ReconnectSettings {
        ReconnectSettings {
            period: Duration::from_millis(self.auto_reconnect.period_ms),
            probe_timeout: Duration::from_millis(self.auto_reconnect.probe_timeout_ms),
            read_timeout: self.serial.read_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        let config = MonitorConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, BaudRate::B115200);
        assert_eq!(config.reader_settings().poll_interval, Duration::from_millis(10));
        assert_eq!(config.reconnect_settings().period, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
            [serial]
            baud_rate = 9600
            max_line_len = 4096

            [auto_reconnect]
            period_ms = 5000
            "#,
        );
        let config = MonitorConfig::load_from(file.path()).unwrap();
        assert_eq!(config.serial.baud_rate, BaudRate::B9600);
        assert_eq!(config.serial.max_line_len, Some(4096));
        assert_eq!(config.serial.read_timeout_ms, 200);
        assert_eq!(config.auto_reconnect.period_ms, 5000);
        assert_eq!(config.application.log_level, "info");
    }

    #[test]
    #[serial]
    fn unsupported_baud_rate_is_rejected_at_load() {
        let file = write_config("[serial]\nbaud_rate = 1200\n");
        assert!(MonitorConfig::load_from(file.path()).is_err());
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let file = write_config("[application]\nlog_level = \"warn\"\n");
        std::env::set_var("RS485_MONITOR_APPLICATION__LOG_LEVEL", "debug");
        std::env::set_var("RS485_MONITOR_SERIAL__BAUD_RATE", "57600");
        let loaded = MonitorConfig::load_from(file.path());
        std::env::remove_var("RS485_MONITOR_APPLICATION__LOG_LEVEL");
        std::env::remove_var("RS485_MONITOR_SERIAL__BAUD_RATE");

        let config = loaded.unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.serial.baud_rate, BaudRate::B57600);
    }

    #[test]
    fn config_validation() {
        let mut config = MonitorConfig::default();
        assert!(config.validate().is_ok());

        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.serial.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.serial.max_line_len = Some(0);
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.auto_reconnect.probe_timeout_ms = 2000;
        assert!(config.validate().is_err());
    }
}
