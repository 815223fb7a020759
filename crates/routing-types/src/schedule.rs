//! Schedules: one version of the routing plan for a single date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{Order, OrderId, Route, RouteId};

/// Identifier of a schedule version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub String);

impl fmt::Display for ScheduleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for ScheduleId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// Which version of the day's plan a schedule represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScheduleType {
	/// The plan being edited.
	Current,
	/// Copy of the plan taken right after the last successful build.
	BuildRoutesSnapshot,
	/// Any other saved version.
	Version,
}

impl ScheduleType {
	/// Processing rank used when several versions of a date are touched.
	pub fn rank(&self) -> u8 {
		match self {
			Self::Current => 0,
			Self::BuildRoutesSnapshot => 1,
			Self::Version => 2,
		}
	}
}

impl fmt::Display for ScheduleType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Current => write!(f, "Current"),
			Self::BuildRoutesSnapshot => write!(f, "BuildRoutesSnapshot"),
			Self::Version => write!(f, "Version"),
		}
	}
}

/// One version of the routing plan for a planned date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
	pub id: ScheduleId,
	pub name: String,
	pub planned_date: NaiveDate,
	pub schedule_type: ScheduleType,
	pub routes: Vec<Route>,
	/// Orders of the planned date that no route of this schedule serves.
	///
	/// Derived data: rebuilt by [`Schedule::recompute_unassigned`] after each
	/// committed mutation, never edited in place.
	pub unassigned_orders: Vec<OrderId>,
}

impl Schedule {
	pub fn new(
		id: impl Into<String>,
		planned_date: NaiveDate,
		schedule_type: ScheduleType,
	) -> Self {
		let id = id.into();
		Self {
			name: id.clone(),
			id: ScheduleId(id),
			planned_date,
			schedule_type,
			routes: Vec::new(),
			unassigned_orders: Vec::new(),
		}
	}

	pub fn with_route(mut self, route: Route) -> Self {
		self.routes.push(route);
		self
	}

	pub fn route(&self, route_id: &RouteId) -> Option<&Route> {
		self.routes.iter().find(|r| &r.id == route_id)
	}

	/// Route currently serving `order_id`, if any.
	pub fn route_for_order(&self, order_id: &OrderId) -> Option<&Route> {
		self.routes
			.iter()
			.find(|r| r.stops.iter().any(|s| &s.order_id == order_id))
	}

	pub fn is_assigned(&self, order_id: &OrderId) -> bool {
		self.route_for_order(order_id).is_some()
	}

	/// Every order bound to a stop in this schedule.
	pub fn assigned_orders(&self) -> BTreeSet<OrderId> {
		self.routes.iter().flat_map(|r| r.order_ids()).collect()
	}

	/// Subset of `orders` bound to a stop in this schedule, in input order.
	pub fn assigned_subset(&self, orders: &[OrderId]) -> Vec<OrderId> {
		orders
			.iter()
			.filter(|id| self.is_assigned(id))
			.cloned()
			.collect()
	}

	/// Subset of `orders` bound to a stop that is locked, directly or
	/// through its route.
	pub fn locked_subset(&self, orders: &[OrderId]) -> Vec<OrderId> {
		orders
			.iter()
			.filter(|id| {
				self.route_for_order(id)
					.map(|r| r.is_order_locked(id))
					.unwrap_or(false)
			})
			.cloned()
			.collect()
	}

	/// Replaces routes with the same id by the given ones; unknown routes are
	/// appended.
	pub fn apply_routes(&mut self, routes: &[Route]) {
		for route in routes {
			match self.routes.iter_mut().find(|r| r.id == route.id) {
				Some(existing) => *existing = route.clone(),
				None => self.routes.push(route.clone()),
			}
		}
	}

	/// Rebuilds the unassigned-orders view from the project's orders.
	///
	/// The view holds every order of this schedule's date that no route
	/// serves, sorted by id so repeated recomputation is stable.
	pub fn recompute_unassigned<'a>(&mut self, orders: impl IntoIterator<Item = &'a Order>) {
		let assigned = self.assigned_orders();
		let mut unassigned: Vec<OrderId> = orders
			.into_iter()
			.filter(|o| o.planned_date == self.planned_date && !assigned.contains(&o.id))
			.map(|o| o.id.clone())
			.collect();
		unassigned.sort();
		unassigned.dedup();
		self.unassigned_orders = unassigned;
	}

	/// Stop membership per route, used to compare plans regardless of
	/// sequence numbers.
	pub fn membership(&self) -> BTreeMap<RouteId, BTreeSet<OrderId>> {
		self.routes
			.iter()
			.map(|r| (r.id.clone(), r.order_ids()))
			.collect()
	}
}
