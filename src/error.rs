use crate::model::Metric;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote procedure call.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("malformed XML-RPC response: {0}")]
    Malformed(String),
}

/// Failure of one `daq.report` poll. The monitor keeps the previous value and carries on.
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("aggregator still busy after retry (reported {0:?})")]
    StillBusy(String),

    #[error("could not parse {} value {value:?}", .metric.as_str())]
    Parse { metric: Metric, value: String },
}

/// Errors raised before any command is dispatched.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to read settings file {}: {source}", .path.display())]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", .path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid settings file {}: {reason}", .path.display())]
    SettingsInvalid { path: PathBuf, reason: String },
}
