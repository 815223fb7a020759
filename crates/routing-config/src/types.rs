//! Configuration types for the orchestrator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
	/// Service identity and logging
	pub service: ServiceSettings,
	/// Connection to the solving service
	pub gateway: GatewayConfig,
	/// Where committed schedules are persisted
	pub storage: StorageConfig,
	/// Coordinator behaviour
	pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
	/// Service name for logging
	pub name: String,
	/// Default log filter when RUST_LOG is not set
	pub log_level: String,
}

impl Default for ServiceSettings {
	fn default() -> Self {
		Self {
			name: "routing-orchestrator".to_string(),
			log_level: "info".to_string(),
		}
	}
}

/// Solver gateway settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
	/// Simulated solve latency of the in-process gateway, in milliseconds
	pub latency_ms: u64,
	/// Number of gateway events buffered per subscriber
	pub event_capacity: usize,
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			latency_ms: 50,
			event_capacity: 1024,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	Memory,
	File,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
	/// Storage backend: "memory" or "file"
	pub backend: StorageBackend,
	/// Base directory for the file backend
	pub path: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::Memory,
			path: PathBuf::from("./data/schedules"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
	/// Number of notifications buffered per subscriber
	pub notification_capacity: usize,
	/// Reject orders without a geocoded location before calling the solver
	pub require_geocoded_orders: bool,
	/// Reject routes without a depot location before calling the solver
	pub require_route_depots: bool,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			notification_capacity: 1024,
			require_geocoded_orders: true,
			require_route_depots: true,
		}
	}
}
