// routing-core/src/workflow.rs

//! Unassigning orders from every schedule of a date before acting on them.
//!
//! Orders are only deleted or moved once no schedule on their date still
//! routes them. The workflow unassigns them one schedule at a time, each
//! solve awaited before the next one starts, then hands the orders to a
//! [`FollowUp`].
//!
//! The plan is computed once, before the first solve. A schedule that gets
//! one of the orders assigned while the workflow runs is not revisited.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashSet;
use routing_gateway::SolverGateway;
use routing_storage::StorageService;
use routing_types::{
	MessageKey, Notification, OperationKind, OrderId, RouteId, RoutingEvent, Schedule, ScheduleId,
	Severity,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::coordinator::{store_schedule, RoutingCommand, RoutingOperationCoordinator};
use crate::error::CoordinatorError;
use crate::event_bus::NotificationBus;
use crate::project::Project;
use crate::validation::ValidationPolicy;
use crate::violations::ViolationReporter;

/// One schedule the workflow has to unassign orders from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignScheduleInfo {
	pub schedule_id: ScheduleId,
	/// Input orders bound to a stop in this schedule when the plan was made.
	pub orders_to_unassign: Vec<OrderId>,
	pub is_processed: bool,
}

/// Schedules to process, in order, with a cursor on the next one.
#[derive(Debug, Clone, Default)]
pub struct UnassignPlan {
	order: Vec<ScheduleId>,
	entries: HashMap<ScheduleId, UnassignScheduleInfo>,
	cursor: usize,
}

impl UnassignPlan {
	/// Builds the plan from schedules already sorted in processing order.
	/// Schedules routing none of `orders` are left out.
	pub fn new(schedules: &[Schedule], orders: &[OrderId]) -> Self {
		let mut plan = Self::default();
		for schedule in schedules {
			let subset = schedule.assigned_subset(orders);
			if subset.is_empty() || plan.entries.contains_key(&schedule.id) {
				continue;
			}
			plan.order.push(schedule.id.clone());
			plan.entries.insert(
				schedule.id.clone(),
				UnassignScheduleInfo {
					schedule_id: schedule.id.clone(),
					orders_to_unassign: subset,
					is_processed: false,
				},
			);
		}
		plan
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	/// Position of the next schedule to process.
	pub fn cursor(&self) -> usize {
		self.cursor
	}

	pub fn current(&self) -> Option<&UnassignScheduleInfo> {
		self.order.get(self.cursor).and_then(|id| self.entries.get(id))
	}

	pub fn get(&self, schedule_id: &ScheduleId) -> Option<&UnassignScheduleInfo> {
		self.entries.get(schedule_id)
	}

	/// Marks the current entry processed and moves to the next one.
	pub fn advance(&mut self) {
		if let Some(entry) = self
			.order
			.get(self.cursor)
			.and_then(|id| self.entries.get_mut(id))
		{
			entry.is_processed = true;
			self.cursor += 1;
		}
	}

	pub fn entries(&self) -> impl Iterator<Item = &UnassignScheduleInfo> {
		self.order.iter().filter_map(|id| self.entries.get(id))
	}

	pub fn processed(&self) -> Vec<ScheduleId> {
		self.entries()
			.filter(|e| e.is_processed)
			.map(|e| e.schedule_id.clone())
			.collect()
	}

	/// Schedules after the current one.
	pub fn remaining_after_current(&self) -> Vec<ScheduleId> {
		self.order.iter().skip(self.cursor + 1).cloned().collect()
	}
}

/// Orders locked in place, per schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReport {
	pub schedules: Vec<(ScheduleId, Vec<OrderId>)>,
}

impl LockReport {
	pub fn scan(schedules: &[Schedule], orders: &[OrderId]) -> Self {
		Self {
			schedules: schedules
				.iter()
				.map(|s| (s.id.clone(), s.locked_subset(orders)))
				.filter(|(_, locked)| !locked.is_empty())
				.collect(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.schedules.is_empty()
	}
}

/// Dates a workflow is currently running on.
#[derive(Clone, Default)]
pub struct DateLocks {
	dates: Arc<DashSet<NaiveDate>>,
}

impl DateLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Claims `date` until the returned guard is dropped.
	pub fn try_acquire(&self, date: NaiveDate) -> Result<DateGuard, CoordinatorError> {
		if !self.dates.insert(date) {
			return Err(CoordinatorError::DateBusy(date));
		}
		Ok(DateGuard {
			dates: self.dates.clone(),
			date,
		})
	}

	pub fn is_locked(&self, date: NaiveDate) -> bool {
		self.dates.contains(&date)
	}
}

pub struct DateGuard {
	dates: Arc<DashSet<NaiveDate>>,
	date: NaiveDate,
}

impl Drop for DateGuard {
	fn drop(&mut self) {
		self.dates.remove(&self.date);
		debug!("Released workflow lock on {}", self.date);
	}
}

/// Action run on the orders once no schedule routes them anymore.
#[async_trait]
pub trait FollowUp: Send + Sync {
	async fn process_orders(&self, orders: &[OrderId], date: NaiveDate) -> Result<(), CoordinatorError>;
}

/// Removes the orders from the project.
pub struct DeleteOrders {
	project: Arc<Project>,
	storage: StorageService,
}

impl DeleteOrders {
	pub fn new(project: Arc<Project>, storage: StorageService) -> Self {
		Self { project, storage }
	}
}

#[async_trait]
impl FollowUp for DeleteOrders {
	async fn process_orders(&self, orders: &[OrderId], date: NaiveDate) -> Result<(), CoordinatorError> {
		let removed = self.project.remove_orders(orders).await;
		info!("Deleted {} order(s) planned on {}", removed.len(), date);
		for schedule in self.project.schedules_on(date).await {
			store_schedule(&self.storage, &schedule).await?;
		}
		Ok(())
	}
}

/// Re-plans the orders on another date.
pub struct MoveOrders {
	project: Arc<Project>,
	storage: StorageService,
	to: NaiveDate,
}

impl MoveOrders {
	pub fn new(project: Arc<Project>, storage: StorageService, to: NaiveDate) -> Self {
		Self { project, storage, to }
	}
}

#[async_trait]
impl FollowUp for MoveOrders {
	async fn process_orders(&self, orders: &[OrderId], date: NaiveDate) -> Result<(), CoordinatorError> {
		let touched = self.project.move_orders(orders, self.to).await;
		info!("Moved {} order(s) from {} to {}", orders.len(), date, self.to);
		for id in touched {
			if let Some(schedule) = self.project.schedule(&id).await {
				store_schedule(&self.storage, &schedule).await?;
			}
		}
		Ok(())
	}
}

/// How a workflow run ended.
#[derive(Debug)]
pub enum WorkflowOutcome {
	/// Every planned schedule was processed and the follow-up ran.
	Completed { processed: Vec<ScheduleId> },
	/// Some orders are locked; nothing was attempted.
	Locked(LockReport),
	/// Processing stopped at plan position `failed_at`. Earlier schedules
	/// stay committed; `skipped` were never attempted.
	Halted {
		failed_at: usize,
		schedule_id: ScheduleId,
		processed: Vec<ScheduleId>,
		skipped: Vec<ScheduleId>,
		reason: CoordinatorError,
	},
}

impl WorkflowOutcome {
	pub fn is_completed(&self) -> bool {
		matches!(self, Self::Completed { .. })
	}

	pub fn into_result(self) -> Result<Vec<ScheduleId>, CoordinatorError> {
		match self {
			Self::Completed { processed } => Ok(processed),
			Self::Locked(report) => Err(CoordinatorError::LockedObjects(report)),
			Self::Halted { reason, .. } => Err(reason),
		}
	}
}

pub struct MultiScheduleUnassignWorkflow {
	gateway: Arc<dyn SolverGateway>,
	project: Arc<Project>,
	storage: StorageService,
	bus: NotificationBus,
	policy: ValidationPolicy,
	locks: DateLocks,
}

impl MultiScheduleUnassignWorkflow {
	pub fn new(
		gateway: Arc<dyn SolverGateway>,
		project: Arc<Project>,
		storage: StorageService,
		bus: NotificationBus,
		policy: ValidationPolicy,
	) -> Self {
		Self {
			gateway,
			project,
			storage,
			bus,
			policy,
			locks: DateLocks::new(),
		}
	}

	/// Unassigns `orders` from every schedule on `date`, then runs
	/// `follow_up` with the same orders.
	pub async fn run(
		&self,
		orders: &[OrderId],
		date: NaiveDate,
		follow_up: &dyn FollowUp,
	) -> Result<WorkflowOutcome, CoordinatorError> {
		let _guard = self.locks.try_acquire(date)?;
		let schedules = self.project.schedules_on(date).await;

		let locked = LockReport::scan(&schedules, orders);
		if !locked.is_empty() {
			warn!(
				"Orders locked on {} schedule(s) of {}, nothing unassigned",
				locked.schedules.len(),
				date
			);
			self.bus.publish(RoutingEvent::Outcome(
				Notification::new(Severity::Error, MessageKey::OrdersLocked)
					.on_date(date)
					.with_details(ViolationReporter::locked_details(&locked)),
			));
			return Ok(WorkflowOutcome::Locked(locked));
		}

		let mut plan = UnassignPlan::new(&schedules, orders);
		info!(
			"Unassigning {} order(s) from {} schedule(s) on {}",
			orders.len(),
			plan.len(),
			date
		);

		// Subscribes before the first start.
		let coordinator = RoutingOperationCoordinator::new(
			self.gateway.clone(),
			self.project.clone(),
			self.storage.clone(),
			self.bus.clone(),
			self.policy,
		);

		while let Some(entry) = plan.current().cloned() {
			match self.unassign(&coordinator, &entry).await {
				Ok(()) => {
					debug!("Unassigned orders from schedule {}", entry.schedule_id);
					plan.advance();
				}
				Err(reason) => {
					let processed = plan.processed();
					for id in &processed {
						if let Err(e) = coordinator.refresh_schedule(id).await {
							error!("Failed to refresh schedule {} after halt: {}", id, e);
						}
					}
					if matches!(reason, CoordinatorError::Fatal(_)) {
						return Err(reason);
					}

					warn!(
						"Unassign halted at schedule {} ({} of {}): {}",
						entry.schedule_id,
						plan.cursor() + 1,
						plan.len(),
						reason
					);
					return Ok(WorkflowOutcome::Halted {
						failed_at: plan.cursor(),
						schedule_id: entry.schedule_id,
						processed,
						skipped: plan.remaining_after_current(),
						reason,
					});
				}
			}
		}

		follow_up.process_orders(orders, date).await?;
		Ok(WorkflowOutcome::Completed {
			processed: plan.processed(),
		})
	}

	async fn unassign(
		&self,
		coordinator: &RoutingOperationCoordinator,
		entry: &UnassignScheduleInfo,
	) -> Result<(), CoordinatorError> {
		let routes = self.routes_holding(&entry.schedule_id, &entry.orders_to_unassign).await?;
		let command = RoutingCommand::new(OperationKind::UnassignOrders, entry.schedule_id.clone())
			.with_orders(entry.orders_to_unassign.clone())
			.with_routes(routes);

		let id = coordinator.start(command).await?;
		coordinator.wait_for(&id).await?.into_result()?;
		Ok(())
	}

	async fn routes_holding(
		&self,
		schedule_id: &ScheduleId,
		orders: &[OrderId],
	) -> Result<Vec<RouteId>, CoordinatorError> {
		let schedule = self
			.project
			.schedule(schedule_id)
			.await
			.ok_or_else(|| CoordinatorError::UnknownSchedule(schedule_id.clone()))?;
		Ok(schedule
			.routes
			.iter()
			.filter(|r| orders.iter().any(|o| r.stop_for(o).is_some()))
			.map(|r| r.id.clone())
			.collect())
	}
}
