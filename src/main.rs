use clap::Parser;
use sml::Agent;
use sml_core::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sml", about = "Ship My Logs — tail files, enrich lines, forward to sinks")]
struct Cli {
    /// Path to the agent config file.
    #[arg(long, default_value = "/etc/sml/config.toml")]
    config: PathBuf,

    /// Override the checkpoint directory from the config file.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Log at debug level regardless of RUST_LOG.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.checkpoint_dir {
        config.agent.checkpoint_dir = dir;
    }

    let agent = Agent::start(config)?;
    tracing::info!("sml started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    agent.shutdown().await;

    Ok(())
}
