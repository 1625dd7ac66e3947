//! MCP Tollgate - protected, metered, pay-per-call MCP tool gateway

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info};

use mcp_tollgate::{
    auth::ApiKeyStore,
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let outcome = match &cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::HashKey { key }) => hash_key(key.as_deref()),
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    config.validate().context("Invalid configuration")?;
    println!("Configuration OK");
    println!("  listen:   {}:{}", config.server.host, config.server.port);
    println!("  auth:     {}", if config.auth.enabled { "enabled" } else { "disabled" });
    println!("  payments: {}", if config.payment.enabled { "enabled" } else { "disabled" });
    println!("  beacon:   {}", if config.beacon.enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn hash_key(key: Option<&str>) -> anyhow::Result<()> {
    let key = match key {
        Some(k) => k.to_string(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read key from stdin")?;
            buf.trim().to_string()
        }
    };
    if key.is_empty() {
        bail!("empty key");
    }
    println!("{}", ApiKeyStore::hash_key(&key));
    Ok(())
}

async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        payments = config.payment.enabled,
        beacon = config.beacon.enabled,
        "Starting MCP Tollgate"
    );

    let gateway = Gateway::new(config)
        .await
        .context("Failed to create gateway")?;
    gateway.run().await.context("Gateway error")?;

    info!("Gateway shutdown complete");
    Ok(())
}
