//! Configuration loading from files and environment.

use crate::{ConfigError, RoutingConfig, StorageBackend};
use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<PathBuf>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "ROUTING_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_path_buf());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	/// Loads the file if one was given, otherwise starts from defaults, then
	/// applies environment overrides and validates.
	pub async fn load(&self) -> Result<RoutingConfig, ConfigError> {
		let mut config = match &self.file_path {
			Some(path) => self.load_from_file(path).await?,
			None => {
				info!("No configuration file given, using defaults");
				RoutingConfig::default()
			}
		};

		self.apply_env_overrides(&mut config, |name| env::var(name).ok())?;
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, path: &Path) -> Result<RoutingConfig, ConfigError> {
		info!("Loading configuration from {:?}", path);

		let content = match tokio::fs::read_to_string(path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(path.display().to_string()));
			}
			Err(e) => return Err(e.into()),
		};

		let substituted = substitute_env_vars(&content, |name| env::var(name).ok())?;

		match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => from_toml(&substituted),
			Some("json") => from_json(&substituted),
			Some("yaml") | Some("yml") => from_yaml(&substituted),
			_ => Err(ConfigError::ParseError(format!(
				"Unsupported config format: {:?}",
				path
			))),
		}
	}

	fn apply_env_overrides<F>(&self, config: &mut RoutingConfig, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(log_level) = lookup(&format!("{}LOG_LEVEL", self.env_prefix)) {
			debug!("Overriding log level from environment");
			config.service.log_level = log_level;
		}

		if let Some(latency) = lookup(&format!("{}GATEWAY_LATENCY_MS", self.env_prefix)) {
			config.gateway.latency_ms = latency.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid gateway latency: {}", e))
			})?;
		}

		if let Some(path) = lookup(&format!("{}STORAGE_PATH", self.env_prefix)) {
			debug!("Overriding storage path from environment");
			config.storage.backend = StorageBackend::File;
			config.storage.path = PathBuf::from(path);
		}

		Ok(())
	}
}

/// Parses a TOML document.
pub fn from_toml(contents: &str) -> Result<RoutingConfig, ConfigError> {
	toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parses a JSON document.
pub fn from_json(contents: &str) -> Result<RoutingConfig, ConfigError> {
	serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parses a YAML document.
pub fn from_yaml(contents: &str) -> Result<RoutingConfig, ConfigError> {
	serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Replaces `${VAR_NAME}` placeholders using `lookup`.
fn substitute_env_vars<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;
	let mut result = content.to_string();

	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(full_match, &value);
	}

	Ok(result)
}

fn validate_config(config: &RoutingConfig) -> Result<(), ConfigError> {
	if config.gateway.event_capacity == 0 {
		return Err(ConfigError::ValidationError(
			"gateway.event_capacity must be greater than zero".to_string(),
		));
	}

	if config.coordinator.notification_capacity == 0 {
		return Err(ConfigError::ValidationError(
			"coordinator.notification_capacity must be greater than zero".to_string(),
		));
	}

	if config.storage.backend == StorageBackend::File && config.storage.path.as_os_str().is_empty() {
		return Err(ConfigError::ValidationError(
			"storage.path is required for the file backend".to_string(),
		));
	}

	Ok(())
}
