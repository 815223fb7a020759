//! Solve operation identity, requests and results.
//!
//! An operation is one asynchronous request to the external solving
//! service. Its id is assigned by the gateway at start time and is the only
//! handle the orchestrator keeps while the solve is in flight.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Order, Route, RouteId, ScheduleId, Violation};

/// Opaque identifier of an in-flight solve operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for OperationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for OperationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// The kind of work requested from the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
	BuildRoutes,
	AssignOrders,
	UnassignOrders,
	SequenceRoutes,
	GenerateShapes,
}

impl OperationKind {
	/// Kinds that cannot run without at least one order and one route.
	pub fn requires_orders_and_routes(&self) -> bool {
		matches!(
			self,
			Self::BuildRoutes | Self::AssignOrders | Self::UnassignOrders | Self::SequenceRoutes
		)
	}
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::BuildRoutes => write!(f, "BuildRoutes"),
			Self::AssignOrders => write!(f, "AssignOrders"),
			Self::UnassignOrders => write!(f, "UnassignOrders"),
			Self::SequenceRoutes => write!(f, "SequenceRoutes"),
			Self::GenerateShapes => write!(f, "GenerateShapes"),
		}
	}
}

/// Knobs passed through to the solver untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
	/// Preferred 1-based insertion position for assigned orders.
	pub sequence_hint: Option<u32>,
	/// Keep orders on the route they already belong to when re-solving.
	pub keep_route_assignment: bool,
	/// Ask the solver to produce route shapes along with the result.
	pub generate_shapes: bool,
}

/// Everything the solver needs for one operation.
///
/// Orders and routes are snapshots taken when the request is issued; they
/// do not change while the operation is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
	pub schedule_id: ScheduleId,
	pub planned_date: NaiveDate,
	pub kind: OperationKind,
	pub orders: Vec<Order>,
	pub routes: Vec<Route>,
	pub options: SolveOptions,
}

impl SolveRequest {
	pub fn route_ids(&self) -> Vec<RouteId> {
		self.routes.iter().map(|r| r.id.clone()).collect()
	}
}

/// What the gateway reports about an operation it knows of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
	pub id: OperationId,
	pub request: SolveRequest,
}

/// Result delivered by the solver when an operation ran to the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
	/// The solver could not produce a usable plan.
	pub is_failed: bool,
	/// Raw error text reported alongside a failure.
	pub error_text: Option<String>,
	/// Constraint violations; may be present on success too.
	pub violations: Vec<Violation>,
	/// Routes as computed by the solver. Routes not listed are unchanged.
	pub routes: Vec<Route>,
}

impl SolveResult {
	pub fn succeeded(routes: Vec<Route>) -> Self {
		Self {
			routes,
			..Default::default()
		}
	}

	pub fn failed(error_text: impl Into<String>, violations: Vec<Violation>) -> Self {
		Self {
			is_failed: true,
			error_text: Some(error_text.into()),
			violations,
			routes: Vec::new(),
		}
	}

	pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
		self.violations = violations;
		self
	}
}
