//! Tabula CLI: versioned, composable data artifacts.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tabula",
    version,
    about = "Versioned, composable data artifacts: schema conversion and pipeline stages"
)]
struct Cli {
    #[command(subcommand)]
    command: tabula::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = tabula::pipeline::PipelineRegistry::new();
    if let Err(e) = tabula::cli::dispatch(cli.command, &registry) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
