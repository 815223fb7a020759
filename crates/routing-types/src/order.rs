//! Orders, routes and stops.
//!
//! These types describe what the planner sees: orders waiting to be served,
//! routes of vehicles, and stops binding an order to a route at a position.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of an order in the project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

/// Identifier of a route within a schedule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteId(pub String);

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl fmt::Display for RouteId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for OrderId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<&str> for RouteId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// Geographic position in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
	pub latitude: f64,
	pub longitude: f64,
}

impl GeoPoint {
	pub fn new(latitude: f64, longitude: f64) -> Self {
		Self {
			latitude,
			longitude,
		}
	}

	/// Whether the coordinates are finite and inside WGS84 bounds.
	pub fn is_valid(&self) -> bool {
		self.latitude.is_finite()
			&& self.longitude.is_finite()
			&& (-90.0..=90.0).contains(&self.latitude)
			&& (-180.0..=180.0).contains(&self.longitude)
	}
}

/// A delivery or pickup request planned for a single date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	pub id: OrderId,
	pub name: String,
	pub planned_date: NaiveDate,
	/// Geocoded location; `None` until the geocoder has matched the address.
	pub location: Option<GeoPoint>,
}

impl Order {
	pub fn new(id: impl Into<String>, name: impl Into<String>, planned_date: NaiveDate) -> Self {
		Self {
			id: OrderId(id.into()),
			name: name.into(),
			planned_date,
			location: None,
		}
	}

	pub fn with_location(mut self, location: GeoPoint) -> Self {
		self.location = Some(location);
		self
	}

	pub fn is_geocoded(&self) -> bool {
		self.location.map(|p| p.is_valid()).unwrap_or(false)
	}
}

/// Binding of an order to a position on a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
	pub order_id: OrderId,
	/// 1-based position on the route.
	pub sequence: u32,
	pub locked: bool,
}

/// A vehicle route inside a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
	pub id: RouteId,
	pub name: String,
	pub depot: Option<GeoPoint>,
	pub locked: bool,
	pub stops: Vec<Stop>,
}

impl Route {
	pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			id: RouteId(id.into()),
			name: name.into(),
			depot: None,
			locked: false,
			stops: Vec::new(),
		}
	}

	pub fn with_depot(mut self, depot: GeoPoint) -> Self {
		self.depot = Some(depot);
		self
	}

	pub fn locked(mut self) -> Self {
		self.locked = true;
		self
	}

	/// Appends a stop for `order_id` at the end of the route.
	pub fn push_stop(&mut self, order_id: OrderId) {
		let sequence = self.stops.len() as u32 + 1;
		self.stops.push(Stop {
			order_id,
			sequence,
			locked: false,
		});
	}

	pub fn stop_for(&self, order_id: &OrderId) -> Option<&Stop> {
		self.stops.iter().find(|s| &s.order_id == order_id)
	}

	/// Whether the stop bound to `order_id` cannot be moved, either because
	/// the stop itself or the whole route is locked.
	pub fn is_order_locked(&self, order_id: &OrderId) -> bool {
		self.stop_for(order_id)
			.map(|s| s.locked || self.locked)
			.unwrap_or(false)
	}

	/// Renumbers stop sequences 1..n in their current order.
	pub fn resequence(&mut self) {
		for (index, stop) in self.stops.iter_mut().enumerate() {
			stop.sequence = index as u32 + 1;
		}
	}

	pub fn order_ids(&self) -> BTreeSet<OrderId> {
		self.stops.iter().map(|s| s.order_id.clone()).collect()
	}
}

/// Something the planner selected in a view.
///
/// Commands receive selections instead of bare orders; each variant carries
/// exactly what is needed to resolve it to the orders it denotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectedItem {
	Order(OrderId),
	Stop { route_id: RouteId, order_id: OrderId },
	Route(RouteId),
}
