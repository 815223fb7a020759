// routing-core/src/coordinator.rs

//! Drives solve requests through start, completion and reconciliation.
//!
//! A coordinator subscribes to the gateway when it is created, so no
//! completion of an operation it starts can be missed. It only reacts to
//! completions of operations it started itself; several coordinators can
//! share one gateway without seeing each other's results.

use chrono::NaiveDate;
use routing_gateway::{GatewayError, GatewayEvent, GatewayService, SolveOutcome, SolverGateway};
use routing_storage::{StorageError, StorageService};
use routing_types::{
	MessageDetail, MessageKey, Notification, ObjectRef, OperationId, OperationKind, OrderId,
	RouteId, RoutingEvent, Schedule, ScheduleId, Severity, SolveOptions, SolveRequest,
	SolveResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::CoordinatorError;
use crate::event_bus::NotificationBus;
use crate::project::{CommitSummary, Project};
use crate::session::{SessionRegistry, SessionState, SolveSession};
use crate::validation::{ValidationPolicy, ValidationReport};
use crate::violations::ViolationReporter;

/// Storage namespace of persisted schedules.
pub const SCHEDULES_NAMESPACE: &str = "schedules";

/// A routing command as issued by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingCommand {
	pub kind: OperationKind,
	pub schedule_id: ScheduleId,
	pub orders: Vec<OrderId>,
	pub routes: Vec<RouteId>,
	pub options: SolveOptions,
}

impl RoutingCommand {
	pub fn new(kind: OperationKind, schedule_id: ScheduleId) -> Self {
		Self {
			kind,
			schedule_id,
			orders: Vec::new(),
			routes: Vec::new(),
			options: SolveOptions::default(),
		}
	}

	pub fn with_orders(mut self, orders: Vec<OrderId>) -> Self {
		self.orders = orders;
		self
	}

	pub fn with_routes(mut self, routes: Vec<RouteId>) -> Self {
		self.routes = routes;
		self
	}

	pub fn with_options(mut self, options: SolveOptions) -> Self {
		self.options = options;
		self
	}
}

/// How a completed operation was reconciled.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
	Succeeded,
	/// The solution was applied but the solver reported violations.
	PartiallySucceeded {
		details: Vec<MessageDetail>,
		assigned: BTreeMap<RouteId, Vec<OrderId>>,
	},
	Failed {
		details: Vec<MessageDetail>,
	},
	Cancelled,
	ServiceUnavailable(GatewayError),
}

impl OperationOutcome {
	/// Whether the schedule was updated with the solver's result.
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Succeeded | Self::PartiallySucceeded { .. })
	}
}

/// Outcome of one owned operation after its completion was processed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
	pub operation_id: OperationId,
	pub schedule_id: ScheduleId,
	pub planned_date: NaiveDate,
	pub kind: OperationKind,
	pub outcome: OperationOutcome,
}

impl CompletionReport {
	/// Converts unsuccessful outcomes into the matching error.
	pub fn into_result(self) -> Result<Self, CoordinatorError> {
		match &self.outcome {
			OperationOutcome::Succeeded | OperationOutcome::PartiallySucceeded { .. } => Ok(self),
			OperationOutcome::Failed { .. } => Err(CoordinatorError::SolveFailed(self.schedule_id)),
			OperationOutcome::Cancelled => Err(CoordinatorError::SolveCancelled(self.schedule_id)),
			OperationOutcome::ServiceUnavailable(e) => Err(CoordinatorError::Transport(e.clone())),
		}
	}
}

pub struct RoutingOperationCoordinator {
	gateway: GatewayService,
	project: Arc<Project>,
	storage: StorageService,
	bus: NotificationBus,
	policy: ValidationPolicy,
	sessions: SessionRegistry,
	events: Mutex<broadcast::Receiver<GatewayEvent>>,
	/// Completions processed while waiting for another id.
	finished: Mutex<HashMap<OperationId, CompletionReport>>,
	/// Held while a start is in flight so a completion is never looked up
	/// before its session is registered.
	start_gate: Mutex<()>,
}

impl RoutingOperationCoordinator {
	pub fn new(
		gateway: Arc<dyn SolverGateway>,
		project: Arc<Project>,
		storage: StorageService,
		bus: NotificationBus,
		policy: ValidationPolicy,
	) -> Self {
		let gateway = GatewayService::new(gateway);
		let events = gateway.subscribe();

		Self {
			gateway,
			project,
			storage,
			bus,
			policy,
			sessions: SessionRegistry::new(),
			events: Mutex::new(events),
			finished: Mutex::new(HashMap::new()),
			start_gate: Mutex::new(()),
		}
	}

	/// Validates a command and issues it to the solver.
	///
	/// Returns as soon as the gateway accepted the request; the result is
	/// reconciled when its completion is processed.
	pub async fn start(&self, command: RoutingCommand) -> Result<OperationId, CoordinatorError> {
		let schedule = self
			.project
			.schedule(&command.schedule_id)
			.await
			.ok_or_else(|| CoordinatorError::UnknownSchedule(command.schedule_id.clone()))?;
		let (orders, missing_orders) = self.project.orders(&command.orders).await;
		let (routes, missing_routes) = self
			.project
			.routes(&command.schedule_id, &command.routes)
			.await?;

		if let Err(report) =
			self.policy
				.validate(command.kind, &orders, &routes, &missing_orders, &missing_routes)
		{
			warn!(
				"Rejected {} on schedule {}: {} invalid object(s)",
				command.kind,
				schedule.id,
				report.invalid.len()
			);
			self.publish_invalid(&report, schedule.planned_date);
			return Err(CoordinatorError::ValidationFailed(report));
		}

		let _gate = self.start_gate.lock().await;
		let started = match command.kind {
			OperationKind::BuildRoutes => {
				self.gateway
					.build_routes(&schedule, orders.clone(), routes.clone(), command.options.clone())
					.await
			}
			OperationKind::AssignOrders => {
				self.gateway
					.assign_orders(&schedule, orders.clone(), routes.clone(), command.options.clone())
					.await
			}
			OperationKind::UnassignOrders => {
				self.gateway
					.unassign_orders(&schedule, orders.clone(), routes.clone())
					.await
			}
			OperationKind::SequenceRoutes => {
				self.gateway
					.sequence_routes(&schedule, orders.clone(), routes.clone(), command.options.clone())
					.await
			}
			OperationKind::GenerateShapes => {
				self.gateway
					.generate_shapes(&schedule, routes.clone())
					.await
			}
		};

		let id = match started {
			Ok(id) => id,
			Err(e) => return Err(self.start_refused(&schedule, command.kind, e)),
		};

		let request = SolveRequest {
			schedule_id: schedule.id.clone(),
			planned_date: schedule.planned_date,
			kind: command.kind,
			orders,
			routes,
			options: command.options,
		};
		self.sessions
			.insert(id, SolveSession::new(request).started(id));

		self.bus.publish(RoutingEvent::OperationStarted {
			operation_id: id,
			schedule_id: schedule.id.clone(),
			kind: command.kind,
		});
		Ok(id)
	}

	fn start_refused(
		&self,
		schedule: &Schedule,
		kind: OperationKind,
		error: GatewayError,
	) -> CoordinatorError {
		match error {
			GatewayError::Validation { invalid, .. } => {
				let report = ValidationReport::rejected_by_solver(kind, &invalid);
				self.publish_invalid(&report, schedule.planned_date);
				CoordinatorError::ValidationFailed(report)
			}
			e if e.is_transport() => {
				self.publish_unavailable(schedule.planned_date);
				CoordinatorError::Transport(e)
			}
			e => {
				error!("Solver failed to start {} on {}: {}", kind, schedule.id, e);
				CoordinatorError::Fatal(e)
			}
		}
	}

	/// Processes the completion of an operation.
	///
	/// Returns `Ok(None)` for operations this coordinator did not start.
	/// Every owned completion publishes exactly one `ScheduleRefreshed`
	/// event, whatever the outcome.
	pub async fn on_completed(
		&self,
		id: &OperationId,
		outcome: SolveOutcome,
	) -> Result<Option<CompletionReport>, CoordinatorError> {
		let session = {
			let _gate = self.start_gate.lock().await;
			self.sessions.take(id)
		};
		let Some(mut session) = session else {
			trace!("Ignoring completion of foreign operation {}", id);
			return Ok(None);
		};

		let schedule_id = session.schedule_id().clone();
		let planned_date = session.planned_date();
		let kind = session.kind();
		debug!("Processing completion of {} operation {}", kind, id);

		let reconciled = self.reconcile(&mut session, outcome).await;

		self.bus.publish(RoutingEvent::ScheduleRefreshed {
			operation_id: Some(*id),
			schedule_id: schedule_id.clone(),
			planned_date,
		});

		let outcome = reconciled?;
		info!(
			"Operation {} on schedule {} finished as {}",
			id, schedule_id, session.state
		);

		Ok(Some(CompletionReport {
			operation_id: *id,
			schedule_id,
			planned_date,
			kind,
			outcome,
		}))
	}

	async fn reconcile(
		&self,
		session: &mut SolveSession,
		outcome: SolveOutcome,
	) -> Result<OperationOutcome, CoordinatorError> {
		let kind = session.kind();
		let date = session.planned_date();

		match outcome {
			SolveOutcome::Cancelled => {
				session.transition(SessionState::Cancelled);
				self.bus.publish(RoutingEvent::Outcome(
					Notification::new(Severity::Warning, MessageKey::OperationCancelled(kind))
						.on_date(date)
						.with_objects(vec![ObjectRef::Schedule(session.schedule_id().clone())]),
				));
				Ok(OperationOutcome::Cancelled)
			}
			SolveOutcome::Error(GatewayError::Validation { message, invalid }) => {
				session.transition(SessionState::CompletedError);
				warn!("Solver rejected {} input: {}", kind, message);
				let report = ValidationReport::rejected_by_solver(kind, &invalid);
				let mut details = ViolationReporter::error_details(&message);
				details.extend(ViolationReporter::validation_details(&report));
				self.bus.publish(RoutingEvent::Outcome(
					Notification::new(Severity::Error, MessageKey::ValidationFailed(kind))
						.on_date(date)
						.with_details(details.clone()),
				));
				Ok(OperationOutcome::Failed { details })
			}
			SolveOutcome::Error(e) if e.is_transport() => {
				session.transition(SessionState::CompletedError);
				warn!("Solving service unavailable: {}", e);
				self.publish_unavailable(date);
				Ok(OperationOutcome::ServiceUnavailable(e))
			}
			SolveOutcome::Error(e) => {
				session.transition(SessionState::CompletedError);
				error!("Unrecoverable solver error for {}: {}", kind, e);
				Err(CoordinatorError::Fatal(e))
			}
			SolveOutcome::Solved(result) if result.is_failed => {
				session.transition(SessionState::CompletedFailed);
				let details = if result.violations.is_empty() {
					ViolationReporter::error_details(result.error_text.as_deref().unwrap_or_default())
				} else {
					ViolationReporter::violation_details(&result.violations)
				};
				self.bus.publish(RoutingEvent::Outcome(
					Notification::new(Severity::Error, MessageKey::OperationFailed(kind))
						.on_date(date)
						.with_objects(vec![ObjectRef::Schedule(session.schedule_id().clone())])
						.with_details(details.clone()),
				));
				Ok(OperationOutcome::Failed { details })
			}
			SolveOutcome::Solved(result) => self.commit(session, result).await,
		}
	}

	async fn commit(
		&self,
		session: &mut SolveSession,
		result: SolveResult,
	) -> Result<OperationOutcome, CoordinatorError> {
		let kind = session.kind();
		let summary = self
			.project
			.commit_solution(
				session.schedule_id(),
				&result.routes,
				kind == OperationKind::BuildRoutes,
			)
			.await?;
		if let Err(e) = self.persist(&summary).await {
			session.transition(SessionState::CompletedError);
			error!("Failed to save schedule {}: {}", summary.schedule.id, e);
			self.bus.publish(RoutingEvent::Outcome(
				Notification::new(Severity::Error, MessageKey::OperationFailed(kind))
					.on_date(summary.schedule.planned_date)
					.with_objects(vec![ObjectRef::Schedule(summary.schedule.id.clone())])
					.with_details(ViolationReporter::error_details(&e.to_string())),
			));
			return Err(e.into());
		}
		session.transition(SessionState::CompletedSuccess);

		let objects = vec![ObjectRef::Schedule(summary.schedule.id.clone())];
		if result.violations.is_empty() {
			self.bus.publish(RoutingEvent::Outcome(
				Notification::new(Severity::Information, MessageKey::OperationCompleted(kind))
					.on_date(summary.schedule.planned_date)
					.with_objects(objects),
			));
			return Ok(OperationOutcome::Succeeded);
		}

		let details =
			ViolationReporter::build_details(&summary.schedule, &session.request, &result.violations);
		let assigned = ViolationReporter::assigned_by_route(
			&summary.schedule,
			&session.request,
			&result.violations,
		);
		self.bus.publish(RoutingEvent::Outcome(
			Notification::new(Severity::Warning, MessageKey::OperationPartiallyCompleted(kind))
				.on_date(summary.schedule.planned_date)
				.with_objects(objects)
				.with_details(details.clone()),
		));
		Ok(OperationOutcome::PartiallySucceeded { details, assigned })
	}

	async fn persist(&self, summary: &CommitSummary) -> Result<(), StorageError> {
		store_schedule(&self.storage, &summary.schedule).await?;
		if let Some(snapshot) = &summary.snapshot {
			store_schedule(&self.storage, snapshot).await?;
		}
		for id in &summary.dropped {
			match self.storage.remove(SCHEDULES_NAMESPACE, &id.0).await {
				Ok(()) | Err(StorageError::NotFound) => {}
				Err(e) => return Err(e),
			}
		}
		Ok(())
	}

	/// Recomputes the unassigned view of a schedule and persists it.
	pub async fn refresh_schedule(&self, id: &ScheduleId) -> Result<(), CoordinatorError> {
		let schedule = self
			.project
			.refresh(id)
			.await
			.ok_or_else(|| CoordinatorError::UnknownSchedule(id.clone()))?;
		store_schedule(&self.storage, &schedule).await?;
		Ok(())
	}

	/// Waits until the completion of `id` has been processed.
	///
	/// Completions of other owned operations seen meanwhile are processed
	/// too and kept for their own waiters.
	pub async fn wait_for(&self, id: &OperationId) -> Result<CompletionReport, CoordinatorError> {
		loop {
			let mut events = self.events.lock().await;
			if let Some(report) = self.finished.lock().await.remove(id) {
				return Ok(report);
			}
			if !self.sessions.owns(id) {
				return Err(CoordinatorError::UnknownOperation(*id));
			}

			let report = self.receive(&mut events).await?;
			if report.operation_id == *id {
				return Ok(report);
			}
			self.finished
				.lock()
				.await
				.insert(report.operation_id, report);
		}
	}

	/// Processes the next completion of an owned operation.
	pub async fn next_completion(&self) -> Result<CompletionReport, CoordinatorError> {
		let mut events = self.events.lock().await;
		{
			let mut finished = self.finished.lock().await;
			if let Some(id) = finished.keys().next().copied() {
				if let Some(report) = finished.remove(&id) {
					return Ok(report);
				}
			}
		}
		self.receive(&mut events).await
	}

	async fn receive(
		&self,
		events: &mut broadcast::Receiver<GatewayEvent>,
	) -> Result<CompletionReport, CoordinatorError> {
		loop {
			let received = events.recv().await;
			let mut reports = self.handle(events, received).await?.into_iter();
			if let Some(first) = reports.next() {
				self.finished
					.lock()
					.await
					.extend(reports.map(|report| (report.operation_id, report)));
				return Ok(first);
			}
		}
	}

	async fn handle(
		&self,
		events: &mut broadcast::Receiver<GatewayEvent>,
		received: Result<GatewayEvent, RecvError>,
	) -> Result<Vec<CompletionReport>, CoordinatorError> {
		match received {
			Ok(GatewayEvent::Completed { id, outcome }) => {
				Ok(self.on_completed(&id, outcome).await?.into_iter().collect())
			}
			Ok(GatewayEvent::Started { id }) => {
				trace!("Gateway started operation {}", id);
				Ok(Vec::new())
			}
			Err(RecvError::Lagged(skipped)) => {
				warn!("Missed {} gateway event(s); raise gateway.event_capacity", skipped);
				self.recover_lagged(events).await
			}
			Err(RecvError::Closed) => Err(CoordinatorError::Channel(
				"Gateway event stream closed".to_string(),
			)),
		}
	}

	/// Settles owned operations whose completion was dropped from the event
	/// stream. Events still buffered are processed first; an owned id the
	/// gateway no longer runs after that lost its completion.
	async fn recover_lagged(
		&self,
		events: &mut broadcast::Receiver<GatewayEvent>,
	) -> Result<Vec<CompletionReport>, CoordinatorError> {
		let mut reports = Vec::new();
		loop {
			match events.try_recv() {
				Ok(GatewayEvent::Completed { id, outcome }) => {
					reports.extend(self.on_completed(&id, outcome).await?);
				}
				Ok(GatewayEvent::Started { .. }) => {}
				Err(TryRecvError::Lagged(skipped)) => {
					warn!("Missed {} more gateway event(s)", skipped);
				}
				Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
			}
		}

		for id in self.sessions.ids() {
			if self.gateway.operation_info(&id).await.is_some() {
				continue;
			}
			warn!("Completion of operation {} was lost", id);
			let lost = SolveOutcome::Error(GatewayError::Communication(
				"completion event lost".to_string(),
			));
			reports.extend(self.on_completed(&id, lost).await?);
		}
		Ok(reports)
	}

	/// Processes completions until `shutdown` fires or the gateway goes away.
	///
	/// Shutdown is only observed between completions; one already received
	/// is reconciled to the end.
	pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), CoordinatorError> {
		loop {
			let mut events = tokio::select! {
				events = self.events.lock() => events,
				_ = shutdown.recv() => break,
			};
			let received = tokio::select! {
				received = events.recv() => received,
				_ = shutdown.recv() => break,
			};

			match self.handle(&mut events, received).await {
				Ok(reports) => {
					for report in reports {
						debug!("Processed completion of {}", report.operation_id);
					}
				}
				Err(CoordinatorError::Channel(msg)) => {
					error!("Completion driver stopped: {}", msg);
					return Err(CoordinatorError::Channel(msg));
				}
				Err(e) => error!("Error processing completion: {}", e),
			}
		}
		info!("Completion driver received shutdown signal");
		Ok(())
	}

	/// Requests cancellation of an owned operation.
	pub async fn cancel(&self, id: &OperationId) -> bool {
		if !self.sessions.owns(id) {
			return false;
		}
		self.gateway.cancel(id).await
	}

	/// Requests cancellation of every owned operation on `date`; returns how
	/// many requests were accepted.
	pub async fn cancel_for_date(&self, date: NaiveDate) -> usize {
		let mut accepted = 0;
		for id in self.sessions.ids_on(date) {
			if self.gateway.cancel(&id).await {
				accepted += 1;
			}
		}
		info!("Cancelled {} operation(s) on {}", accepted, date);
		accepted
	}

	pub fn active_operations(&self) -> Vec<SolveSession> {
		self.sessions.snapshot()
	}

	pub fn owns(&self, id: &OperationId) -> bool {
		self.sessions.owns(id)
	}

	fn publish_invalid(&self, report: &ValidationReport, date: NaiveDate) {
		self.bus.publish(RoutingEvent::Outcome(
			Notification::new(Severity::Error, MessageKey::ValidationFailed(report.kind))
				.on_date(date)
				.with_details(ViolationReporter::validation_details(report)),
		));
	}

	fn publish_unavailable(&self, date: NaiveDate) {
		self.bus.publish(RoutingEvent::Outcome(
			Notification::new(Severity::Error, MessageKey::ServiceUnavailable).on_date(date),
		));
	}
}

pub(crate) async fn store_schedule(
	storage: &StorageService,
	schedule: &Schedule,
) -> Result<(), StorageError> {
	storage
		.store(SCHEDULES_NAMESPACE, &schedule.id.0, schedule)
		.await
}
