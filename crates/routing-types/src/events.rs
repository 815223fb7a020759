//! Events published by the orchestrator to whoever renders outcomes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{MessageDetail, MessageKey, ObjectRef, OperationId, OperationKind, ScheduleId, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoutingEvent {
	/// A solve request was accepted by the gateway.
	OperationStarted {
		operation_id: OperationId,
		schedule_id: ScheduleId,
		kind: OperationKind,
	},
	/// Views of the schedule must be refreshed. Published exactly once per
	/// completed operation, whatever its outcome.
	ScheduleRefreshed {
		operation_id: Option<OperationId>,
		schedule_id: ScheduleId,
		planned_date: NaiveDate,
	},
	/// A terminal outcome to show to the planner.
	Outcome(Notification),
}

/// Top-level message plus its detail rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub severity: Severity,
	pub key: MessageKey,
	pub objects: Vec<ObjectRef>,
	pub planned_date: Option<NaiveDate>,
	pub details: Vec<MessageDetail>,
}

impl Notification {
	pub fn new(severity: Severity, key: MessageKey) -> Self {
		Self {
			severity,
			key,
			objects: Vec::new(),
			planned_date: None,
			details: Vec::new(),
		}
	}

	pub fn on_date(mut self, planned_date: NaiveDate) -> Self {
		self.planned_date = Some(planned_date);
		self
	}

	pub fn with_objects(mut self, objects: Vec<ObjectRef>) -> Self {
		self.objects = objects;
		self
	}

	pub fn with_details(mut self, details: Vec<MessageDetail>) -> Self {
		self.details = details;
		self
	}
}
