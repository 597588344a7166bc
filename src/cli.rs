use crate::error::ControlError;
use crate::fhicl::FhiclGenerator;
use crate::model::{
    Address, BoardKind, BoardParams, ControlEvent, TransitionCommand, TransitionParameters,
};
use crate::orchestrator::RunControl;
use crate::registry::EndpointRegistry;
use crate::rpc::XmlRpcClient;
use crate::settings::ControlSettings;
use crate::text_summary;
use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
    /// End of a dispatch wave.
    Flush,
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
                OutputLine::Flush => {
                    let _ = out.flush();
                    let _ = err.flush();
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Fragment receiver reading one simulated board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSpec {
    pub host: String,
    pub port: u16,
    pub board_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBuilderSpec {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorSpec {
    pub host: String,
    pub port: u16,
    pub bunch_size: u32,
}

fn split_fields<'a>(value: &'a str, count: usize, usage: &str) -> Result<Vec<&'a str>, String> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    if fields.len() != count || fields.iter().any(|f| f.is_empty()) {
        return Err(usage.to_string());
    }
    Ok(fields)
}

fn parse_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port {value:?}")),
        Ok(port) => Ok(port),
    }
}

fn parse_board(value: &str) -> Result<BoardSpec, String> {
    let f = split_fields(value, 3, "You must specify a host, port, and board ID.")?;
    Ok(BoardSpec {
        host: f[0].to_string(),
        port: parse_port(f[1])?,
        board_id: f[2]
            .parse()
            .map_err(|_| format!("invalid board ID {:?}", f[2]))?,
    })
}

fn parse_event_builder(value: &str) -> Result<EventBuilderSpec, String> {
    let f = split_fields(value, 2, "You must specify a host and port")?;
    Ok(EventBuilderSpec {
        host: f[0].to_string(),
        port: parse_port(f[1])?,
    })
}

fn parse_aggregator(value: &str) -> Result<AggregatorSpec, String> {
    let f = split_fields(value, 3, "You must specify a host, port, and bunch size")?;
    let bunch_size = match f[2].parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => return Err(format!("invalid bunch size {:?}", f[2])),
    };
    Ok(AggregatorSpec {
        host: f[0].to_string(),
        port: parse_port(f[1])?,
        bunch_size,
    })
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(format!("expected 0 or 1, got {other:?}")),
    }
}

fn parse_run_duration(value: &str) -> Result<Duration, String> {
    if let Ok(minutes) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(minutes * 60.0).map_err(|_| {
            format!("run duration must be a non-negative number of minutes, got {value:?}")
        });
    }
    humantime::parse_duration(value).map_err(|e| format!("{e} in {value:?}"))
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "daqctl",
    version,
    about = "Send run-control transitions to artdaq board readers, event builders and aggregators"
)]
pub struct Cli {
    /// Add a fragment receiver reading a simulated TOY1 board
    #[arg(long, value_name = "HOST,PORT,BOARD_ID", value_parser = parse_board)]
    pub toy1: Vec<BoardSpec>,

    /// Add a fragment receiver reading a simulated TOY2 board
    #[arg(long, value_name = "HOST,PORT,BOARD_ID", value_parser = parse_board)]
    pub toy2: Vec<BoardSpec>,

    /// Add an event builder
    #[arg(long, value_name = "HOST,PORT", value_parser = parse_event_builder)]
    pub eb: Vec<EventBuilderSpec>,

    /// Add an aggregator
    #[arg(long, value_name = "HOST,PORT,BUNCH_SIZE", value_parser = parse_aggregator)]
    pub ag: Vec<AggregatorSpec>,

    /// Transition to send; without one the endpoints are only validated
    #[arg(short, long, value_enum)]
    pub command: Option<TransitionCommand>,

    /// Run number sent with start
    #[arg(short, long, default_value_t = 101)]
    pub run_number: u32,

    /// Stop once the run has lasted this long (e.g. 10m; a bare number is minutes)
    #[arg(short = 't', long, value_parser = parse_run_duration)]
    pub run_duration: Option<Duration>,

    /// Stop once the run holds this many events
    #[arg(short = 'n', long)]
    pub run_event_count: Option<u64>,

    /// Close data files at this size in MB (0 disables)
    #[arg(short = 'f', long, default_value_t = 0.0)]
    pub file_size: f64,

    /// Close data files after this long
    #[arg(long)]
    pub file_duration: Option<humantime::Duration>,

    /// Close data files after this many events (0 disables)
    #[arg(long, default_value_t = 0)]
    pub file_event_count: u64,

    /// Directory the data files are written to
    #[arg(short, long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Write data to disk (0 or 1)
    #[arg(short, long, default_value = "1", value_parser = parse_switch, action = clap::ArgAction::Set)]
    pub write_data: bool,

    /// Enable online monitoring (0 or 1)
    #[arg(short = 'm', long, default_value = "0", value_parser = parse_switch, action = clap::ArgAction::Set)]
    pub online_monitoring: bool,

    /// Print a per-host summary of the configured processes
    #[arg(short, long)]
    pub summary: bool,

    /// Write every generated init configuration to a .fcl file
    #[arg(short = 'e', long)]
    pub serialize: bool,

    /// Directory for --serialize output (defaults to the working directory)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Settings file (daqctl.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the transition report as JSON
    #[arg(long)]
    pub json: bool,

    /// Exit with status 1 when any target failed
    #[arg(long)]
    pub strict: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Build the endpoint registry. Boards sharing a host:port merge into one group; any other
/// reuse of an address is rejected.
pub fn build_registry(args: &Cli) -> Result<EndpointRegistry, ControlError> {
    let mut registry = EndpointRegistry::new();

    let boards = args
        .toy1
        .iter()
        .map(|b| (b, BoardKind::Toy1))
        .chain(args.toy2.iter().map(|b| (b, BoardKind::Toy2)));
    for (board, kind) in boards {
        let params = BoardParams::FragmentReceiver {
            kind,
            board_id: board.board_id,
        };
        add_checked(&mut registry, &board.host, board.port, params, true)?;
    }
    for eb in &args.eb {
        add_checked(&mut registry, &eb.host, eb.port, BoardParams::EventBuilder, false)?;
    }
    for ag in &args.ag {
        let params = BoardParams::Aggregator {
            bunch_size: ag.bunch_size,
        };
        add_checked(&mut registry, &ag.host, ag.port, params, false)?;
    }
    Ok(registry)
}

fn add_checked(
    registry: &mut EndpointRegistry,
    host: &str,
    port: u16,
    params: BoardParams,
    may_share: bool,
) -> Result<(), ControlError> {
    let role = params.role();
    let address = Address::new(host, port);
    match registry.role_at(&address) {
        Some(existing) if existing != role => {
            return Err(ControlError::Configuration(format!(
                "{address} is already used by a {existing}, cannot add a {role}"
            )));
        }
        Some(_) if !may_share => {
            return Err(ControlError::Configuration(format!(
                "duplicate {role} endpoint {address}"
            )));
        }
        _ => {}
    }
    registry.add_board(host, port, params);
    Ok(())
}

pub fn build_parameters(args: &Cli) -> TransitionParameters {
    TransitionParameters {
        run_number: args.run_number,
        run_duration: args.run_duration,
        events_in_run: args.run_event_count,
        file_size_mb: args.file_size,
        file_duration: args.file_duration.map(Duration::from),
        events_in_file: args.file_event_count,
        write_data: args.write_data,
        online_monitoring: args.online_monitoring,
        data_dir: args.data_dir.clone(),
    }
}

/// Run one invocation. Returns the number of failed targets.
pub async fn run(args: Cli) -> Result<usize> {
    let (settings, settings_path) = ControlSettings::resolve(args.config.as_deref())?;
    if let Some(path) = settings_path.as_deref() {
        info!(path = %path.display(), "loaded settings");
    }
    let registry = build_registry(&args)?;
    let params = build_parameters(&args);
    info!(write_data = params.write_data, "disk writing setting");

    let (out_tx, out_handle) = spawn_output_writer();
    if args.summary {
        for line in text_summary::configuration_summary(&registry) {
            let line = if args.json {
                OutputLine::Stderr(line)
            } else {
                OutputLine::Stdout(line)
            };
            let _ = out_tx.send(line);
        }
        let _ = out_tx.send(OutputLine::Flush);
    }

    let Some(command) = args.command else {
        info!("no command given, endpoints validated");
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(0);
    };
    if registry.all_groups().is_empty() {
        warn!(%command, "no endpoints configured, nothing to send");
    }

    let transport = Arc::new(XmlRpcClient::new().context("failed to build XML-RPC client")?);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<ControlEvent>();

    // In JSON mode stdout carries only the report; progress goes to stderr.
    let json = args.json;
    let progress_tx = out_tx.clone();
    let progress = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if let ControlEvent::WaveStarted {
                command,
                roles,
                targets,
            } = &ev
            {
                debug!(%command, ?roles, targets, "dispatch wave started");
            }
            if let Some(line) = text_summary::event_line(&ev) {
                let line = if json {
                    OutputLine::Stderr(line)
                } else {
                    OutputLine::Stdout(line)
                };
                let _ = progress_tx.send(line);
            }
            if matches!(ev, ControlEvent::WaveFinished { .. }) {
                let _ = progress_tx.send(OutputLine::Flush);
            }
        }
    });

    let mut control = RunControl::new(
        Arc::new(registry),
        transport,
        Arc::new(FhiclGenerator),
        params,
        settings,
        evt_tx,
    );
    if args.serialize {
        let dir = match args.output_dir.clone() {
            Some(dir) => dir,
            None => std::env::current_dir().context("failed to resolve working directory")?,
        };
        control = control.serialize_to(dir);
    }

    let outcome = interruptible(control.execute(command), ctrl_c()).await;
    drop(control);
    let Some(report) = outcome else {
        // Calls still in flight keep event senders alive; stop listening to them.
        progress.abort();
        warn!(%command, "interrupted, remaining waves not sent");
        drop(out_tx);
        let _ = out_handle.await;
        anyhow::bail!("{command} transition interrupted");
    };
    let _ = progress.await;
    let report = report.with_context(|| format!("{command} transition failed"))?;

    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    }
    drop(out_tx);
    let _ = out_handle.await;

    Ok(report.failures())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Drives `work` to completion, or gives up with `None` once `interrupt` resolves.
async fn interruptible<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        out = work => Some(out),
        () = interrupt => None,
    }
}
