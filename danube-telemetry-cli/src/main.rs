mod plan;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "danube-telemetry")]
#[command(about = "Danube Telemetry - live CPU and memory charts for Danube brokers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll Prometheus for a broker and print every refreshed snapshot
    #[command(display_order = 1)]
    Watch(watch::WatchArgs),

    /// Show the sample plan for a span without querying anything
    #[command(display_order = 10)]
    Plan(plan::PlanArgs),

    /// List the refresh intervals and spans offered by the chart controls
    #[command(display_order = 11)]
    Options,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(args) => watch::handle(args).await,
        Commands::Plan(args) => plan::handle(args),
        Commands::Options => {
            plan::print_options();
            Ok(())
        }
    }
}
