use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vpsie_lb_agent::config;
use vpsie_lb_agent::lifecycle::{self, Shutdown};
use vpsie_lb_agent::observability;
use vpsie_lb_agent::Agent;

/// VPSie load balancer control-plane agent.
#[derive(Debug, Parser)]
#[command(name = "vpsie-lb-agent", version, about)]
struct Args {
    /// Path to the agent configuration file.
    #[arg(long, default_value = "/etc/vpsie-lb/agent.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let agent_config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration from {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    observability::init_logging(&agent_config.logging);
    tracing::info!(config = %args.config.display(), "VPSie Load Balancer Agent starting");

    let agent = match Agent::new(agent_config) {
        Ok(agent) => agent,
        Err(err) => {
            tracing::error!(error = %err, "failed to create agent");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();

    let runner = tokio::spawn(async move { agent.run(receiver).await });

    lifecycle::wait_for_signal().await;
    tracing::info!("received shutdown signal");
    shutdown.trigger();

    if let Err(err) = runner.await {
        tracing::error!(error = %err, "agent task failed");
        return ExitCode::FAILURE;
    }

    tracing::info!("VPSie Load Balancer Agent stopped");
    ExitCode::SUCCESS
}
