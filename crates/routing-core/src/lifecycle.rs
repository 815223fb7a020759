// routing-core/src/lifecycle.rs

use crate::error::CoordinatorError;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
	Created,
	Starting,
	Running,
	Stopping,
	Stopped,
	Failed,
}

impl std::fmt::Display for EngineState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Created => write!(f, "Created"),
			Self::Starting => write!(f, "Starting"),
			Self::Running => write!(f, "Running"),
			Self::Stopping => write!(f, "Stopping"),
			Self::Stopped => write!(f, "Stopped"),
			Self::Failed => write!(f, "Failed"),
		}
	}
}

/// Tracks the engine state and fans out the shutdown signal to background
/// tasks.
pub struct LifecycleManager {
	state: Arc<RwLock<EngineState>>,
	shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleManager {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(4);

		Self {
			state: Arc::new(RwLock::new(EngineState::Created)),
			shutdown_tx,
		}
	}

	pub async fn state(&self) -> EngineState {
		*self.state.read().await
	}

	async fn transition(&self, next: EngineState) -> Result<(), CoordinatorError> {
		let mut state = self.state.write().await;
		let previous = *state;

		if !allowed(previous, next) {
			return Err(CoordinatorError::Lifecycle(format!(
				"Cannot go from {} to {}",
				previous, next
			)));
		}

		*state = next;
		info!("Engine state changed: {} -> {}", previous, next);
		Ok(())
	}

	pub async fn begin_start(&self) -> Result<(), CoordinatorError> {
		self.transition(EngineState::Starting).await
	}

	pub async fn mark_running(&self) -> Result<(), CoordinatorError> {
		self.transition(EngineState::Running).await
	}

	pub async fn mark_failed(&self) -> Result<(), CoordinatorError> {
		self.transition(EngineState::Failed).await
	}

	/// Signals every subscriber and moves to `Stopped`.
	pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
		self.transition(EngineState::Stopping).await?;
		self.shutdown_tx.send(()).ok();
		self.transition(EngineState::Stopped).await
	}

	pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
		self.shutdown_tx.subscribe()
	}

	pub async fn is_running(&self) -> bool {
		*self.state.read().await == EngineState::Running
	}
}

impl Default for LifecycleManager {
	fn default() -> Self {
		Self::new()
	}
}

fn allowed(from: EngineState, to: EngineState) -> bool {
	use EngineState::*;

	match (from, to) {
		(Created, Starting) => true,
		(Starting, Running) => true,
		(Running, Stopping) => true,
		(Stopping, Stopped) => true,
		(Stopped | Failed, Failed) => false,
		(_, Failed) => true,
		_ => false,
	}
}
