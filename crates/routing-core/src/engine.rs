// routing-core/src/engine.rs

use crate::{
	coordinator::{RoutingCommand, RoutingOperationCoordinator},
	error::CoordinatorError,
	event_bus::NotificationBus,
	lifecycle::{EngineState, LifecycleManager},
	project::Project,
	session::SolveSession,
	validation::ValidationPolicy,
	workflow::{
		DeleteOrders, FollowUp, MoveOrders, MultiScheduleUnassignWorkflow,
		WorkflowOutcome,
	},
};
use chrono::NaiveDate;
use routing_config::{ConfigLoader, RoutingConfig};
use routing_gateway::{
	implementations::memory::{CompletionMode, InMemoryGateway},
	GatewayService, SolverGateway,
};
use routing_storage::{create_storage, StorageInterface, StorageService};
use routing_types::{
	OperationId, OperationInfo, OrderId, RoutingEvent, ScheduleId, SelectedItem,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Entry point for planners' routing commands.
///
/// Single commands go through a shared coordinator whose completions are
/// processed by a background driver; outcomes arrive on the notification
/// bus. Multi-schedule unassigns run inline and return their outcome.
#[derive(Clone)]
pub struct RoutingEngine {
	config: Arc<RoutingConfig>,
	project: Arc<Project>,
	gateway: GatewayService,
	storage: StorageService,
	bus: NotificationBus,
	coordinator: Arc<RoutingOperationCoordinator>,
	workflow: Arc<MultiScheduleUnassignWorkflow>,
	lifecycle: Arc<LifecycleManager>,
	tasks: Arc<Mutex<JoinSet<Result<(), CoordinatorError>>>>,
}

impl RoutingEngine {
	/// Starts the completion driver.
	pub async fn start(&self) -> Result<(), CoordinatorError> {
		info!("Starting routing engine {}", self.config.service.name);
		self.lifecycle.begin_start().await?;

		let coordinator = self.coordinator.clone();
		let shutdown = self.lifecycle.subscribe_shutdown();
		self.tasks
			.lock()
			.await
			.spawn(async move { coordinator.run(shutdown).await });

		self.lifecycle.mark_running().await?;
		Ok(())
	}

	/// Stops the driver and waits for it to exit. Operations still in
	/// flight are left to the solver.
	pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
		info!("Shutting down routing engine");
		self.lifecycle.shutdown().await?;

		let mut tasks = self.tasks.lock().await;
		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok(Ok(())) => {}
				Ok(Err(e)) => warn!("Background task ended with error: {}", e),
				Err(e) => warn!("Background task aborted: {}", e),
			}
		}

		info!("Routing engine stopped");
		Ok(())
	}

	async fn ensure_running(&self) -> Result<(), CoordinatorError> {
		match self.lifecycle.state().await {
			EngineState::Running => Ok(()),
			state => Err(CoordinatorError::Lifecycle(format!(
				"Engine is {}, not accepting commands",
				state
			))),
		}
	}

	/// Issues a single routing command. The outcome is published on the
	/// notification bus once the solver completes.
	pub async fn issue_routing_command(
		&self,
		command: RoutingCommand,
	) -> Result<OperationId, CoordinatorError> {
		self.ensure_running().await?;
		self.coordinator.start(command).await
	}

	/// Unassigns `orders` from every schedule of `date`, then runs
	/// `follow_up`.
	pub async fn issue_multi_schedule_unassign(
		&self,
		orders: &[OrderId],
		date: NaiveDate,
		follow_up: &dyn FollowUp,
	) -> Result<WorkflowOutcome, CoordinatorError> {
		self.ensure_running().await?;
		self.workflow.run(orders, date, follow_up).await
	}

	/// Same as [`Self::issue_multi_schedule_unassign`] for a selection made
	/// in a view of `schedule_id`.
	pub async fn unassign_selection(
		&self,
		schedule_id: &ScheduleId,
		items: &[SelectedItem],
		follow_up: &dyn FollowUp,
	) -> Result<WorkflowOutcome, CoordinatorError> {
		let schedule = self
			.project
			.schedule(schedule_id)
			.await
			.ok_or_else(|| CoordinatorError::UnknownSchedule(schedule_id.clone()))?;
		let orders = self.project.resolve_selection(schedule_id, items).await;
		self.issue_multi_schedule_unassign(&orders, schedule.planned_date, follow_up)
			.await
	}

	/// Unassigns the orders everywhere on `date` and deletes them.
	pub async fn delete_orders(
		&self,
		orders: &[OrderId],
		date: NaiveDate,
	) -> Result<WorkflowOutcome, CoordinatorError> {
		let follow_up = DeleteOrders::new(self.project.clone(), self.storage.clone());
		self.issue_multi_schedule_unassign(orders, date, &follow_up)
			.await
	}

	/// Unassigns the orders everywhere on `from` and re-plans them on `to`.
	pub async fn move_orders(
		&self,
		orders: &[OrderId],
		from: NaiveDate,
		to: NaiveDate,
	) -> Result<WorkflowOutcome, CoordinatorError> {
		let follow_up = MoveOrders::new(self.project.clone(), self.storage.clone(), to);
		self.issue_multi_schedule_unassign(orders, from, &follow_up)
			.await
	}

	/// Requests cancellation of any in-flight operation.
	pub async fn cancel(&self, id: &OperationId) -> bool {
		self.gateway.cancel(id).await
	}

	/// Requests cancellation of every operation targeting `date`.
	pub async fn cancel_for_date(&self, date: NaiveDate) -> usize {
		let mut accepted = 0;
		for info in self.gateway.operations_for_date(date).await {
			if self.gateway.cancel(&info.id).await {
				accepted += 1;
			}
		}
		accepted
	}

	/// Operations the solver is running for schedules of `date`.
	pub async fn active_operations(&self, date: NaiveDate) -> Vec<OperationInfo> {
		self.gateway.operations_for_date(date).await
	}

	/// Single commands issued through this engine and not completed yet.
	pub fn pending_commands(&self) -> Vec<SolveSession> {
		self.coordinator.active_operations()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
		self.bus.subscribe()
	}

	pub fn project(&self) -> Arc<Project> {
		self.project.clone()
	}

	pub fn storage(&self) -> StorageService {
		self.storage.clone()
	}

	pub fn config(&self) -> &RoutingConfig {
		&self.config
	}

	pub async fn state(&self) -> EngineState {
		self.lifecycle.state().await
	}
}

/// Builder for creating a [`RoutingEngine`].
///
/// Anything not supplied is created from configuration: an in-process
/// gateway and the configured storage backend.
#[derive(Default)]
pub struct RoutingEngineBuilder {
	config: Option<RoutingConfig>,
	config_path: Option<PathBuf>,
	gateway: Option<Arc<dyn SolverGateway>>,
	storage: Option<Arc<dyn StorageInterface>>,
	project: Option<Project>,
}

impl RoutingEngineBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_config(mut self, config: RoutingConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.config_path = Some(path.into());
		self
	}

	pub fn with_gateway(mut self, gateway: Arc<dyn SolverGateway>) -> Self {
		self.gateway = Some(gateway);
		self
	}

	pub fn with_storage(mut self, storage: Arc<dyn StorageInterface>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_project(mut self, project: Project) -> Self {
		self.project = Some(project);
		self
	}

	pub async fn build(self) -> Result<RoutingEngine, CoordinatorError> {
		let config = match (self.config, self.config_path) {
			(Some(config), _) => config,
			(None, Some(path)) => ConfigLoader::new()
				.with_file(&path)
				.load()
				.await
				.map_err(|e| CoordinatorError::Configuration(e.to_string()))?,
			(None, None) => RoutingConfig::default(),
		};

		let gateway: Arc<dyn SolverGateway> = match self.gateway {
			Some(gateway) => gateway,
			None => Arc::new(InMemoryGateway::new(
				CompletionMode::Automatic {
					latency: Duration::from_millis(config.gateway.latency_ms),
				},
				config.gateway.event_capacity,
			)),
		};
		let storage = StorageService::new(
			self.storage
				.unwrap_or_else(|| create_storage(&config.storage)),
		);
		let project = Arc::new(self.project.unwrap_or_default());
		let bus = NotificationBus::new(config.coordinator.notification_capacity);
		let policy = ValidationPolicy::from(&config.coordinator);

		let coordinator = Arc::new(RoutingOperationCoordinator::new(
			gateway.clone(),
			project.clone(),
			storage.clone(),
			bus.clone(),
			policy,
		));
		let workflow = Arc::new(MultiScheduleUnassignWorkflow::new(
			gateway.clone(),
			project.clone(),
			storage.clone(),
			bus.clone(),
			policy,
		));

		Ok(RoutingEngine {
			config: Arc::new(config),
			project,
			gateway: GatewayService::new(gateway),
			storage,
			bus,
			coordinator,
			workflow,
			lifecycle: Arc::new(LifecycleManager::new()),
			tasks: Arc::new(Mutex::new(JoinSet::new())),
		})
	}
}
