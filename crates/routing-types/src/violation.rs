//! Violations reported by the solver and text-free message records.
//!
//! Nothing here holds user-facing text. A [`MessageDetail`] is a format key
//! plus references to the domain objects a renderer substitutes names for.

use serde::{Deserialize, Serialize};

use crate::{OperationKind, OrderId, RouteId, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
	Error,
	Warning,
	Information,
}

/// Reference to a domain object (or raw datum) a message talks about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
	Order(OrderId),
	Route(RouteId),
	Stop { route_id: RouteId, order_id: OrderId },
	Schedule(ScheduleId),
	/// Raw text coming from an external system, passed through verbatim.
	Text(String),
	Count(usize),
}

/// Constraint category of a solver violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
	CapacityExceeded,
	TimeWindowViolated,
	MaxTravelTimeExceeded,
	MaxOrdersExceeded,
	SpecialtyMismatch,
	ZoneViolated,
	Unreachable,
	NotEnoughRoutes,
	Unlocated,
	Other,
}

impl ViolationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::CapacityExceeded => "capacity_exceeded",
			Self::TimeWindowViolated => "time_window_violated",
			Self::MaxTravelTimeExceeded => "max_travel_time_exceeded",
			Self::MaxOrdersExceeded => "max_orders_exceeded",
			Self::SpecialtyMismatch => "specialty_mismatch",
			Self::ZoneViolated => "zone_violated",
			Self::Unreachable => "unreachable",
			Self::NotEnoughRoutes => "not_enough_routes",
			Self::Unlocated => "unlocated",
			Self::Other => "other",
		}
	}
}

/// A constraint the solver could not honour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
	pub kind: ViolationKind,
	pub severity: Severity,
	pub objects: Vec<ObjectRef>,
}

impl Violation {
	pub fn new(kind: ViolationKind, severity: Severity, objects: Vec<ObjectRef>) -> Self {
		Self {
			kind,
			severity,
			objects,
		}
	}

	pub fn for_order(kind: ViolationKind, order_id: OrderId) -> Self {
		Self::new(kind, Severity::Error, vec![ObjectRef::Order(order_id)])
	}
}

/// Why an input object failed validation before a solve was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidReason {
	MissingLocation,
	MissingDepot,
	NoOrders,
	NoRoutes,
	UnknownObject,
	/// Named by the solver in a validation error.
	RejectedBySolver,
}

impl InvalidReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::MissingLocation => "missing_location",
			Self::MissingDepot => "missing_depot",
			Self::NoOrders => "no_orders",
			Self::NoRoutes => "no_routes",
			Self::UnknownObject => "unknown_object",
			Self::RejectedBySolver => "rejected_by_solver",
		}
	}
}

/// Format key of a message; the renderer maps it to localized text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKey {
	OperationCompleted(OperationKind),
	OperationPartiallyCompleted(OperationKind),
	OperationFailed(OperationKind),
	OperationCancelled(OperationKind),
	ValidationFailed(OperationKind),
	ServiceUnavailable,
	OrdersLocked,
	Violation(ViolationKind),
	InvalidObject(InvalidReason),
	SolverError,
	OrderAssigned,
	OrderLocked,
}

impl MessageKey {
	/// Stable dotted key, e.g. `operation.failed.UnassignOrders`.
	pub fn as_key(&self) -> String {
		match self {
			Self::OperationCompleted(kind) => format!("operation.completed.{}", kind),
			Self::OperationPartiallyCompleted(kind) => format!("operation.partial.{}", kind),
			Self::OperationFailed(kind) => format!("operation.failed.{}", kind),
			Self::OperationCancelled(kind) => format!("operation.cancelled.{}", kind),
			Self::ValidationFailed(kind) => format!("operation.invalid.{}", kind),
			Self::ServiceUnavailable => "service.unavailable".to_string(),
			Self::OrdersLocked => "orders.locked".to_string(),
			Self::Violation(kind) => format!("violation.{}", kind.as_str()),
			Self::InvalidObject(reason) => format!("validation.{}", reason.as_str()),
			Self::SolverError => "solver.error".to_string(),
			Self::OrderAssigned => "order.assigned".to_string(),
			Self::OrderLocked => "order.locked".to_string(),
		}
	}
}

/// One structured detail row under a top-level message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
	pub severity: Severity,
	pub key: MessageKey,
	pub objects: Vec<ObjectRef>,
}

impl MessageDetail {
	pub fn new(severity: Severity, key: MessageKey, objects: Vec<ObjectRef>) -> Self {
		Self {
			severity,
			key,
			objects,
		}
	}
}
