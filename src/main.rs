//! # Lease Engine Main Entry Point
//!
//! This is the main entry point for the lease engine service.

use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};

use lease_engine::{config::ConfigLoader, db::init_pool, server::run_server, telemetry};

#[derive(Parser)]
#[command(name = "lease-engine", about = "Lease signing & verification engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Remove OTP challenges older than the configured retention window
    CleanupOtp,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config_loader = ConfigLoader::new();
    let config = config_loader.load()?;
    config.validate()?;

    telemetry::init_tracing(&config)?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::info!(profile = %config.profile, config = %redacted_json, "Loaded configuration");
    }

    let db = init_pool(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Apply pending migrations before serving
            Migrator::up(&db, None).await?;
            run_server(config, db).await
        }
        Command::Migrate => {
            Migrator::up(&db, None).await?;
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::CleanupOtp => {
            use lease_engine::clock::system_clock;
            use lease_engine::notify::notifier_from_config;
            use lease_engine::server::AppState;
            use lease_engine::sms::HttpSmsTransport;
            use std::sync::Arc;

            let config = Arc::new(config);
            let state = AppState::build(
                Arc::new(db),
                config.clone(),
                system_clock(),
                Arc::new(HttpSmsTransport::new(config.sms.clone())),
                notifier_from_config(&config.dispute),
            );

            let removed = state.otp.cleanup().await?;
            tracing::info!(removed, "OTP retention sweep finished");
            Ok(())
        }
    }
}
