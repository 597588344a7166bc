use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Wall-clock timestamp in local time, falling back to UTC when the offset is unknown.
pub fn local_now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc())
}

/// Role an artdaq process plays in the data flow (FR -> EB -> AG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    FragmentReceiver,
    EventBuilder,
    Aggregator,
}

impl Role {
    /// Group number used in the aggregator's XML-RPC client list.
    pub fn xmlrpc_group(self) -> u8 {
        match self {
            Role::FragmentReceiver => 3,
            Role::EventBuilder => 4,
            Role::Aggregator => 5,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::FragmentReceiver => "FragmentReceiver",
            Role::EventBuilder => "EventBuilder",
            Role::Aggregator => "Aggregator",
        })
    }
}

/// Simulated front-end board flavors a fragment receiver can read out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardKind {
    Toy1,
    Toy2,
}

impl BoardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BoardKind::Toy1 => "TOY1",
            BoardKind::Toy2 => "TOY2",
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific parameters supplied on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardParams {
    FragmentReceiver { kind: BoardKind, board_id: u32 },
    EventBuilder,
    Aggregator { bunch_size: u32 },
}

impl BoardParams {
    pub fn role(&self) -> Role {
        match self {
            BoardParams::FragmentReceiver { .. } => Role::FragmentReceiver,
            BoardParams::EventBuilder => Role::EventBuilder,
            BoardParams::Aggregator { .. } => Role::Aggregator,
        }
    }
}

/// Network address of a remote artdaq process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}/RPC2", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One logical endpoint as given on the command line. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Address,
    pub role: Role,
    /// Position among the endpoints of the same role, in registration order.
    pub role_index: usize,
    pub params: BoardParams,
}

/// Transition commands understood by artdaq processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCommand {
    Init,
    Start,
    Stop,
    Pause,
    Resume,
    Shutdown,
    Status,
    #[value(name = "legal_commands", alias = "get-legal-commands")]
    LegalCommands,
}

impl TransitionCommand {
    pub fn name(self) -> &'static str {
        match self {
            TransitionCommand::Init => "init",
            TransitionCommand::Start => "start",
            TransitionCommand::Stop => "stop",
            TransitionCommand::Pause => "pause",
            TransitionCommand::Resume => "resume",
            TransitionCommand::Shutdown => "shutdown",
            TransitionCommand::Status => "status",
            TransitionCommand::LegalCommands => "legal_commands",
        }
    }

    /// XML-RPC method name, e.g. `daq.init`.
    pub fn method(self) -> String {
        format!("daq.{}", self.name())
    }
}

impl fmt::Display for TransitionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CLI-derived constraints for the current invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionParameters {
    pub run_number: u32,
    #[serde(with = "humantime_serde")]
    pub run_duration: Option<Duration>,
    pub events_in_run: Option<u64>,
    /// Close each data file at this size (MB); 0 disables.
    pub file_size_mb: f64,
    #[serde(with = "humantime_serde")]
    pub file_duration: Option<Duration>,
    /// Close each file after this many events; 0 disables.
    pub events_in_file: u64,
    pub write_data: bool,
    pub online_monitoring: bool,
    pub data_dir: PathBuf,
}

impl Default for TransitionParameters {
    fn default() -> Self {
        Self {
            run_number: 101,
            run_duration: None,
            events_in_run: None,
            file_size_mb: 0.0,
            file_duration: None,
            events_in_file: 0,
            write_data: true,
            online_monitoring: false,
            data_dir: PathBuf::from("."),
        }
    }
}

impl TransitionParameters {
    /// The boundary the stop transition should wait for, if any.
    ///
    /// An event-count limit takes precedence over a duration limit.
    pub fn run_boundary(&self) -> Option<RunBoundary> {
        if let Some(n) = self.events_in_run.filter(|n| *n > 0) {
            return Some(RunBoundary::EventCount(n));
        }
        self.run_duration
            .filter(|d| !d.is_zero())
            .map(RunBoundary::Duration)
    }
}

/// Progress metric queried through `daq.report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    EventCount,
    RunDuration,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::EventCount => "event_count",
            Metric::RunDuration => "run_duration",
        }
    }
}

/// Threshold at which the stop transition may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RunBoundary {
    EventCount(u64),
    #[serde(with = "humantime_serde")]
    Duration(Duration),
}

impl RunBoundary {
    pub fn metric(&self) -> Metric {
        match self {
            RunBoundary::EventCount(_) => Metric::EventCount,
            RunBoundary::Duration(_) => Metric::RunDuration,
        }
    }

    /// Target expressed in the unit the aggregator reports (events or seconds).
    pub fn target(&self) -> f64 {
        match self {
            RunBoundary::EventCount(n) => *n as f64,
            RunBoundary::Duration(d) => d.as_secs_f64(),
        }
    }
}

/// Physical target as seen by one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub group: usize,
    pub address: Address,
    pub role: Role,
    pub board_count: usize,
    /// Human-readable label such as `TOY1 FragmentReceiver` or `multi-board FragmentReceiver`.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed(String),
    Failed(String),
}

/// Result of one (target, command) dispatch attempt. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub target: TargetInfo,
    pub command: TransitionCommand,
    pub status: OutcomeStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
}

impl CommandOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }
}

/// Summary of the boundary wait that preceded a stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryReport {
    pub metric: Metric,
    pub target: f64,
    pub last_value: f64,
    pub polls: u32,
}

/// Everything a transition produced, in dispatch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReport {
    pub command: TransitionCommand,
    pub outcomes: Vec<CommandOutcome>,
    pub boundary: Option<BoundaryReport>,
}

impl TransitionReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }
}

/// Progress events emitted by the controller and consumed by CLI layers.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    WaveStarted {
        command: TransitionCommand,
        roles: Vec<Role>,
        targets: usize,
    },
    CommandSent {
        command: TransitionCommand,
        target: TargetInfo,
    },
    Outcome(Box<CommandOutcome>),
    WaveFinished {
        command: TransitionCommand,
    },
    Poll(PollEvent),
    Info(String),
}

/// Monitor progress for one `daq.report` poll.
#[derive(Debug, Clone)]
pub enum PollEvent {
    Fetching { metric: Metric },
    Reported { metric: Metric, value: String },
    Failed { metric: Metric, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_count_boundary_wins_over_duration() {
        let params = TransitionParameters {
            run_duration: Some(Duration::from_secs(600)),
            events_in_run: Some(500),
            ..Default::default()
        };
        assert_eq!(params.run_boundary(), Some(RunBoundary::EventCount(500)));
    }

    #[test]
    fn zero_limits_disable_the_boundary() {
        let params = TransitionParameters {
            run_duration: Some(Duration::ZERO),
            events_in_run: Some(0),
            ..Default::default()
        };
        assert_eq!(params.run_boundary(), None);

        let params = TransitionParameters {
            run_duration: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let boundary = params.run_boundary().unwrap();
        assert_eq!(boundary.metric(), Metric::RunDuration);
        assert_eq!(boundary.target(), 600.0);
    }

    #[test]
    fn command_methods_use_daq_prefix() {
        assert_eq!(TransitionCommand::Init.method(), "daq.init");
        assert_eq!(TransitionCommand::LegalCommands.method(), "daq.legal_commands");
    }
}
