// routing-core/src/error.rs

use chrono::NaiveDate;
use routing_gateway::GatewayError;
use routing_storage::StorageError;
use routing_types::{OperationId, ScheduleId};
use thiserror::Error;

use crate::validation::ValidationReport;
use crate::workflow::LockReport;

#[derive(Error, Debug)]
pub enum CoordinatorError {
	#[error("Validation failed for {} object(s)", .0.invalid.len())]
	ValidationFailed(ValidationReport),

	#[error("Orders are locked on {} schedule(s)", .0.schedules.len())]
	LockedObjects(LockReport),

	#[error("Solve failed on schedule {0}")]
	SolveFailed(ScheduleId),

	#[error("Solve cancelled on schedule {0}")]
	SolveCancelled(ScheduleId),

	#[error("Solving service unavailable: {0}")]
	Transport(GatewayError),

	#[error("Fatal solver error: {0}")]
	Fatal(GatewayError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Unknown schedule: {0}")]
	UnknownSchedule(ScheduleId),

	#[error("Unknown operation: {0}")]
	UnknownOperation(OperationId),

	#[error("Another workflow is already running on {0}")]
	DateBusy(NaiveDate),

	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Lifecycle error: {0}")]
	Lifecycle(String),

	#[error("Channel error: {0}")]
	Channel(String),
}
