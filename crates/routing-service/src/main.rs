use anyhow::{Context, Result};
use clap::Parser;
use routing_config::ConfigLoader;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod demo;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	setup_tracing(&args.log_level)?;

	match args.command {
		Command::Validate { config } => validate_config(config).await,
		Command::Demo { config } => demo::run(config).await,
	}
}

async fn validate_config(path: PathBuf) -> Result<()> {
	info!("Validating configuration file: {:?}", path);

	let config = ConfigLoader::new()
		.with_file(&path)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Service name: {}", config.service.name);
	info!(
		"Gateway: latency {} ms, {} buffered events",
		config.gateway.latency_ms, config.gateway.event_capacity
	);
	info!(
		"Storage: {:?} at {:?}",
		config.storage.backend, config.storage.path
	);
	info!(
		"Validation: geocoded orders {}, route depots {}",
		config.coordinator.require_geocoded_orders, config.coordinator.require_route_depots
	);

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.context("Failed to initialise tracing")?;

	Ok(())
}
