//! Turnstile service binary.
//!
//! Runs the scan-validation and mint-orchestration core of the ticketing
//! platform. The usual mode is `daemon`, which serves the HTTP API and the
//! background workers; the other subcommands are operator tooling for
//! one-off mints, offline manifests, and configuration checks.
//!
//! # Usage
//!
//! Run the service:
//! ```bash
//! turnstile daemon --config config/config.toml
//! ```
//!
//! Mint a single ticket from the command line:
//! ```bash
//! turnstile mint --tenant t-1 --ticket tk-1 --idempotency-key ops-manual-0001
//! ```
//!
//! Validate configuration and secrets without starting anything:
//! ```bash
//! turnstile check-config
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use turnstile::chain::{ChainRpc, HttpChainClient};
use turnstile::config::{Secrets, Settings, load_configuration, load_secrets};
use turnstile::core::Core;
use turnstile::daemon::Daemon;
use turnstile::infra::InMemoryKv;
use turnstile::mint::{InMemoryMetadataStore, MintOutcome};
use turnstile::models::TenantId;
use turnstile::vault::InMemoryKms;

#[derive(Parser)]
#[command(name = "turnstile", about = "Ticket scan-validation and mint-orchestration core")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config/config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and background workers.
    Daemon {
        /// Override the configured API port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Mint one ticket and print the receipt.
    Mint {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        ticket: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Generate an offline manifest for a device and print it.
    GenerateManifest {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        event: String,
        #[arg(long)]
        device: String,
    },
    /// Validate configuration and secrets, then exit.
    CheckConfig,
}

fn load_settings_and_secrets(config_path: &PathBuf) -> Result<(Settings, Secrets), anyhow::Error> {
    let cfg = load_configuration(config_path)?;
    let settings = Settings::from_config(cfg)?;

    match load_secrets(settings.is_production()) {
        Ok(secrets) => Ok((settings, secrets)),
        Err(problems) => {
            for problem in &problems {
                eprintln!("secret validation: {}", problem);
            }
            Err(anyhow::anyhow!("{} secret validation problem(s)", problems.len()))
        },
    }
}

fn build_core(settings: &Settings, secrets: &Secrets) -> Result<Arc<Core>, anyhow::Error> {
    let db_pool = turnstile::db::init_db(&settings.database_file)?;

    let mut endpoints: Vec<(String, Arc<dyn ChainRpc>)> = Vec::new();
    for raw in &settings.rpc_endpoints {
        endpoints.push((raw.clone(), Arc::new(HttpChainClient::new(raw.parse()?)?)));
    }

    Core::build(
        settings,
        secrets,
        db_pool,
        Arc::new(InMemoryKv::new()),
        endpoints,
        Arc::new(InMemoryKms::new()),
        Arc::new(InMemoryMetadataStore::new()),
    )
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let (mut settings, secrets) = load_settings_and_secrets(&cli.config)?;

    match cli.command {
        Commands::Daemon { port } => {
            if let Some(port) = port {
                settings.api_port = port;
            }
            Daemon::new(settings, secrets).run().await
        },

        Commands::Mint {
            tenant,
            ticket,
            idempotency_key,
        } => {
            let core = build_core(&settings, &secrets)?;
            let tenant = TenantId::new(tenant);
            let outcome = core
                .orchestrator
                .mint(&tenant, &ticket, idempotency_key.as_deref())
                .await?;

            match outcome {
                MintOutcome::Completed(receipt) => {
                    println!("{}", serde_json::to_string_pretty(&receipt.to_json())?);
                },
                MintOutcome::Replayed { response, .. } => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                },
                MintOutcome::InFlight { recovery_point } => {
                    println!("mint already in progress (at {})", recovery_point);
                },
            }
            Ok(())
        },

        Commands::GenerateManifest { tenant, event, device } => {
            let core = build_core(&settings, &secrets)?;
            let tenant = TenantId::new(tenant);
            let manifest = core.manifest_builder.generate(&tenant, &event, &device).await?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        },

        Commands::CheckConfig => {
            info!("Configuration OK");
            println!(
                "environment: {}\napi_port: {}\ndatabase_file: {}\nrpc_endpoints: {}\nrotation_window: {}s",
                settings.environment,
                settings.api_port,
                settings.database_file.display(),
                settings.rpc_endpoints.len(),
                settings.rotation_window_secs,
            );
            Ok(())
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    turnstile::log::init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}
