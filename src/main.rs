mod cli;
mod dispatch;
mod error;
mod fhicl;
mod model;
mod monitor;
mod orchestrator;
mod registry;
mod rpc;
mod settings;
mod text_summary;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,daqctl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,daqctl=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose);
    let strict = args.strict;

    let failures = cli::run(args).await?;
    if strict && failures > 0 {
        tracing::error!(failures, "transition incomplete");
        std::process::exit(1);
    }
    Ok(())
}
