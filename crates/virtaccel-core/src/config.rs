//! Configuration loading and typed config structures for the runtime.
//!
//! A virtual accelerator is configured from a YAML document. Every field
//! has a default so a minimal file only needs `data_dir`:
//!
//! ```yaml
//! data_dir: /opt/va/data
//! cycle:
//!   rate_hz: 2.0
//!   noise: 0.001
//! bridge:
//!   command: softIoc
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of its accepted range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding the simulation engine's data files. Must exist
    /// when the runtime starts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Explicit working directory. Must not exist yet; it is created at
    /// start and kept afterwards. When absent a temporary directory is
    /// used and removed at cleanup.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Prefix prepended to the runtime's own control channels
    /// (e.g. `VA:` gives `VA:SVR:NOISE`).
    #[serde(default)]
    pub channel_prefix: Option<String>,

    /// Cycle pacing, noise and escalation parameters.
    #[serde(default)]
    pub cycle: CycleConfig,

    /// Output mapping parameters.
    #[serde(default)]
    pub output: OutputConfig,

    /// Channel-protocol bridge process parameters.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Device kind codes (`SEXT`, `EQUAD`, ...) whose devices are treated
    /// as plain drifts.
    #[serde(default)]
    pub drift_mask: BTreeSet<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            work_dir: None,
            channel_prefix: None,
            cycle: CycleConfig::default(),
            output: OutputConfig::default(),
            bridge: BridgeConfig::default(),
            drift_mask: BTreeSet::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `VA_DATA_DIR` overrides `data_dir`
    /// - `VA_WORK_DIR` overrides `work_dir`
    /// - `VA_BRIDGE_COMMAND` overrides `bridge.command`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override paths and the bridge command with environment variables
    /// when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VA_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("VA_WORK_DIR") {
            self.work_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("VA_BRIDGE_COMMAND") {
            self.bridge.command = val;
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cycle = &self.cycle;
        if !cycle.rate_hz.is_finite() || cycle.rate_hz <= 0.0 {
            return Err(invalid(format!(
                "cycle.rate_hz must be positive, got {}",
                cycle.rate_hz
            )));
        }
        if !cycle.noise.is_finite() || cycle.noise < 0.0 {
            return Err(invalid(format!(
                "cycle.noise must be non-negative, got {}",
                cycle.noise
            )));
        }
        for (name, value) in [
            ("cycle.overrun_fraction", cycle.overrun_fraction),
            ("cycle.overrun_sleep_fraction", cycle.overrun_sleep_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(format!("{name} must be in (0, 1], got {value}")));
            }
        }
        if self.bridge.command.trim().is_empty() {
            return Err(invalid("bridge.command must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Prefix for control channels, or the empty string.
    pub fn prefix(&self) -> &str {
        self.channel_prefix.as_deref().unwrap_or("")
    }
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::Invalid { reason }
}

/// Cycle pacing, noise and escalation parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CycleConfig {
    /// Target cycle rate in Hz. Adjustable at runtime through the rate
    /// control channel.
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Initial noise fraction. Adjustable at runtime through the noise
    /// control channel.
    #[serde(default = "default_noise")]
    pub noise: f64,

    /// Consecutive failed cycles before the runtime stops with a fatal
    /// error. 0 disables escalation.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Fraction of the nominal period above which a cycle counts as an
    /// overrun.
    #[serde(default = "default_overrun_fraction")]
    pub overrun_fraction: f64,

    /// Fraction of an overrunning cycle's duration to sleep afterwards.
    #[serde(default = "default_overrun_sleep_fraction")]
    pub overrun_sleep_fraction: f64,

    /// Seed for the noise generator. Drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            noise: default_noise(),
            error_threshold: default_error_threshold(),
            overrun_fraction: default_overrun_fraction(),
            overrun_sleep_fraction: default_overrun_sleep_fraction(),
            seed: None,
        }
    }
}

/// Output mapping parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputConfig {
    /// Value written to diagnostic channels whose element produced no
    /// output in a cycle.
    #[serde(default)]
    pub default_error_value: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_error_value: 0.0,
        }
    }
}

/// Channel-protocol bridge process parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Executable to spawn.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments passed to the executable. The process runs with the
    /// working directory as its current directory.
    #[serde(default = "default_bridge_args")]
    pub args: Vec<String>,

    /// File name of the generated record configuration, relative to the
    /// working directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// File name receiving the process's stdout and stderr, relative to
    /// the working directory.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// How long the process gets to exit after SIGTERM before it is
    /// killed, in milliseconds.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl BridgeConfig {
    /// [`stop_timeout_ms`](Self::stop_timeout_ms) as a duration.
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: default_bridge_args(),
            database_file: default_database_file(),
            log_file: default_log_file(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

const fn default_rate_hz() -> f64 {
    1.0
}

const fn default_noise() -> f64 {
    0.001
}

const fn default_error_threshold() -> u32 {
    3
}

const fn default_overrun_fraction() -> f64 {
    0.5
}

const fn default_overrun_sleep_fraction() -> f64 {
    0.1
}

fn default_bridge_command() -> String {
    "softIoc".to_owned()
}

fn default_bridge_args() -> Vec<String> {
    vec!["-d".to_owned(), "va.db".to_owned()]
}

fn default_database_file() -> String {
    "va.db".to_owned()
}

fn default_log_file() -> String {
    "softioc.log".to_owned()
}

const fn default_stop_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle.rate_hz, 1.0);
        assert_eq!(config.cycle.noise, 0.001);
        assert_eq!(config.cycle.error_threshold, 3);
        assert_eq!(config.bridge.command, "softIoc");
        assert_eq!(config.bridge.args, vec!["-d", "va.db"]);
        assert_eq!(config.prefix(), "");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
data_dir: /opt/va/data
work_dir: /tmp/va-run
channel_prefix: "VA:"
cycle:
  rate_hz: 2.0
  noise: 0.01
  error_threshold: 5
  overrun_fraction: 0.6
  overrun_sleep_fraction: 0.2
output:
  default_error_value: -1.0
bridge:
  command: softIocPVA
  args: ["-d", "machine.db"]
  database_file: machine.db
  log_file: ioc.log
  stop_timeout_ms: 1500
drift_mask:
  - SEXT
"#;
        let config = RuntimeConfig::parse(yaml).unwrap();
        assert_eq!(config.cycle.rate_hz, 2.0);
        assert_eq!(config.cycle.error_threshold, 5);
        assert_eq!(config.output.default_error_value, -1.0);
        assert_eq!(config.bridge.database_file, "machine.db");
        assert_eq!(config.bridge.stop_timeout(), Duration::from_millis(1500));
        assert_eq!(config.prefix(), "VA:");
        assert!(config.drift_mask.contains("SEXT"));
    }

    #[test]
    fn parse_minimal_yaml_uses_defaults() {
        let config = RuntimeConfig::parse("data_dir: /data\n").unwrap();
        assert_eq!(config.cycle, CycleConfig::default());
        assert_eq!(config.bridge, BridgeConfig::default());
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn reject_non_positive_rate() {
        let err = RuntimeConfig::parse("cycle:\n  rate_hz: 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn reject_negative_noise() {
        let err = RuntimeConfig::parse("cycle:\n  noise: -0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn reject_fraction_out_of_range() {
        let err = RuntimeConfig::parse("cycle:\n  overrun_sleep_fraction: 1.5\n").unwrap_err();
        assert!(err.to_string().contains("overrun_sleep_fraction"));
    }

    #[test]
    fn reject_invalid_yaml() {
        let err = RuntimeConfig::parse("cycle: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
