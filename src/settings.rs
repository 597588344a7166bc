//! Runtime settings resolved once at startup.
//!
//! Values that used to be process-wide constants (online-monitoring prescale, timeouts,
//! poll cadence) live here and are passed explicitly to the components that need them.

use crate::error::ControlError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "daqctl.toml";
const CONFIG_PATH_ENV: &str = "ARTDAQ_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub onmon: OnmonSettings,
    pub timeouts: TimeoutSettings,
    pub monitor: MonitorSettings,
    pub daq: DaqSettings,
}

/// Online-monitoring knobs embedded in aggregator configurations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OnmonSettings {
    pub event_prescale: u32,
    pub modules: Vec<String>,
}

impl Default for OnmonSettings {
    fn default() -> Self {
        Self {
            event_prescale: 1,
            modules: vec!["app".into(), "wf".into()],
        }
    }
}

/// Per-call RPC timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Every command other than `stop`.
    #[serde(with = "humantime_serde")]
    pub default: Duration,
    /// Aggregators may block while flushing output files.
    #[serde(with = "humantime_serde")]
    pub stop_aggregator: Duration,
    /// Event builders and merged multi-board fragment receivers.
    #[serde(with = "humantime_serde")]
    pub stop_event_builder: Duration,
    #[serde(with = "humantime_serde")]
    pub stop_other: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(60),
            stop_aggregator: Duration::from_secs(120),
            stop_event_builder: Duration::from_secs(45),
            stop_other: Duration::from_secs(30),
        }
    }
}

/// Cadence of the run-boundary poll loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub busy_retry_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub min_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(10),
            busy_retry_delay: Duration::from_secs(10),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(900),
        }
    }
}

impl MonitorSettings {
    /// Longest interval the poll loop accepts between two reports.
    pub const MAX_INTERVAL_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn validate(&self) -> Result<(), String> {
        if self.min_interval.is_zero() {
            return Err("monitor.min_interval must be greater than zero".into());
        }
        if self.max_interval > Self::MAX_INTERVAL_LIMIT {
            return Err(format!(
                "monitor.max_interval must not exceed {}",
                humantime::format_duration(Self::MAX_INTERVAL_LIMIT)
            ));
        }
        if self.max_interval < self.min_interval {
            return Err("monitor.max_interval must not be shorter than monitor.min_interval".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaqSettings {
    pub input_buffer_size_words: u64,
}

impl Default for DaqSettings {
    fn default() -> Self {
        Self {
            input_buffer_size_words: 2_097_152,
        }
    }
}

impl ControlSettings {
    /// Resolve settings: an explicit path must exist; otherwise the first file found in
    /// `ARTDAQ_CONFIG_PATH`, then the user config dir, then built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ControlError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let search_path = std::env::var(CONFIG_PATH_ENV).ok();
        match discover(search_path.as_deref(), dirs::config_dir()) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ControlError> {
        let text = std::fs::read_to_string(path).map_err(|source| ControlError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&text).map_err(|source| ControlError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })?;
        settings
            .monitor
            .validate()
            .map_err(|reason| ControlError::SettingsInvalid {
                path: path.to_path_buf(),
                reason,
            })?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Locate a settings file. Earlier `ARTDAQ_CONFIG_PATH` entries shadow later ones.
fn discover(search_path: Option<&str>, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    let from_env = search_path
        .into_iter()
        .flat_map(|p| p.split(':'))
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(SETTINGS_FILE));
    let from_home = config_dir.map(|d| d.join("daqctl").join(SETTINGS_FILE));
    from_env.chain(from_home).find(|p| p.is_file())
}
