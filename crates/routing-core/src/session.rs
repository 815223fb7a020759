//! Outstanding solve requests owned by a coordinator.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use routing_types::{OperationId, OperationKind, OrderId, ScheduleId, SolveRequest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one solve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
	Created,
	Started,
	CompletedSuccess,
	CompletedFailed,
	CompletedError,
	Cancelled,
}

impl SessionState {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, Self::Created | Self::Started)
	}

	fn can_become(&self, next: SessionState) -> bool {
		use SessionState::*;

		match (self, next) {
			(Created, Started) => true,
			(Started, CompletedSuccess | CompletedFailed | CompletedError | Cancelled) => true,
			_ => false,
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Created => write!(f, "Created"),
			Self::Started => write!(f, "Started"),
			Self::CompletedSuccess => write!(f, "CompletedSuccess"),
			Self::CompletedFailed => write!(f, "CompletedFailed"),
			Self::CompletedError => write!(f, "CompletedError"),
			Self::Cancelled => write!(f, "Cancelled"),
		}
	}
}

/// One request issued to the solver, with the inputs it was issued with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveSession {
	pub operation_id: Option<OperationId>,
	pub request: SolveRequest,
	pub state: SessionState,
	pub created_at: DateTime<Utc>,
}

impl SolveSession {
	pub fn new(request: SolveRequest) -> Self {
		Self {
			operation_id: None,
			request,
			state: SessionState::Created,
			created_at: Utc::now(),
		}
	}

	pub fn kind(&self) -> OperationKind {
		self.request.kind
	}

	pub fn schedule_id(&self) -> &ScheduleId {
		&self.request.schedule_id
	}

	pub fn planned_date(&self) -> NaiveDate {
		self.request.planned_date
	}

	pub fn order_ids(&self) -> Vec<OrderId> {
		self.request.orders.iter().map(|o| o.id.clone()).collect()
	}

	/// Records the id assigned by the gateway.
	pub fn started(mut self, id: OperationId) -> Self {
		self.operation_id = Some(id);
		self.transition(SessionState::Started);
		self
	}

	/// Moves to `next` if the transition is legal; illegal transitions are
	/// ignored and reported as false.
	pub fn transition(&mut self, next: SessionState) -> bool {
		if self.state.can_become(next) {
			self.state = next;
			true
		} else {
			false
		}
	}
}

/// Sessions a single coordinator started and has not finished processing.
#[derive(Default)]
pub struct SessionRegistry {
	sessions: DashMap<OperationId, SolveSession>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, id: OperationId, session: SolveSession) {
		self.sessions.insert(id, session);
	}

	pub fn owns(&self, id: &OperationId) -> bool {
		self.sessions.contains_key(id)
	}

	/// Takes the session out of the active set.
	pub fn take(&self, id: &OperationId) -> Option<SolveSession> {
		self.sessions.remove(id).map(|(_, session)| session)
	}

	pub fn ids(&self) -> Vec<OperationId> {
		self.sessions.iter().map(|entry| *entry.key()).collect()
	}

	pub fn ids_on(&self, date: NaiveDate) -> Vec<OperationId> {
		self.sessions
			.iter()
			.filter(|entry| entry.value().planned_date() == date)
			.map(|entry| *entry.key())
			.collect()
	}

	pub fn snapshot(&self) -> Vec<SolveSession> {
		self.sessions.iter().map(|e| e.value().clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}
}
