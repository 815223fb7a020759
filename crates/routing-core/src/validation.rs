//! Input checks run before anything is sent to the solver.

use routing_config::CoordinatorConfig;
use routing_types::{InvalidReason, ObjectRef, OperationKind, Order, OrderId, Route, RouteId};
use serde::{Deserialize, Serialize};

/// One object that failed validation, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidObject {
	pub object: ObjectRef,
	pub reason: InvalidReason,
}

/// Everything wrong with a request, collected in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
	pub kind: OperationKind,
	pub invalid: Vec<InvalidObject>,
}

impl ValidationReport {
	/// Report for objects the solver itself refused.
	pub fn rejected_by_solver(kind: OperationKind, objects: &[ObjectRef]) -> Self {
		Self {
			kind,
			invalid: objects
				.iter()
				.map(|object| InvalidObject {
					object: object.clone(),
					reason: InvalidReason::RejectedBySolver,
				})
				.collect(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.invalid.is_empty()
	}
}

/// Which structural checks apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
	pub require_geocoded_orders: bool,
	pub require_route_depots: bool,
}

impl Default for ValidationPolicy {
	fn default() -> Self {
		Self {
			require_geocoded_orders: true,
			require_route_depots: true,
		}
	}
}

impl From<&CoordinatorConfig> for ValidationPolicy {
	fn from(config: &CoordinatorConfig) -> Self {
		Self {
			require_geocoded_orders: config.require_geocoded_orders,
			require_route_depots: config.require_route_depots,
		}
	}
}

impl ValidationPolicy {
	/// Validates resolved inputs of a request.
	///
	/// `missing_orders` and `missing_routes` are ids that could not be
	/// resolved in the project; they are reported as unknown objects.
	pub fn validate(
		&self,
		kind: OperationKind,
		orders: &[Order],
		routes: &[Route],
		missing_orders: &[OrderId],
		missing_routes: &[RouteId],
	) -> Result<(), ValidationReport> {
		let mut invalid = Vec::new();

		if kind.requires_orders_and_routes() && orders.is_empty() {
			invalid.push(InvalidObject {
				object: ObjectRef::Count(0),
				reason: InvalidReason::NoOrders,
			});
		}
		if routes.is_empty() {
			invalid.push(InvalidObject {
				object: ObjectRef::Count(0),
				reason: InvalidReason::NoRoutes,
			});
		}

		invalid.extend(missing_orders.iter().map(|id| InvalidObject {
			object: ObjectRef::Order(id.clone()),
			reason: InvalidReason::UnknownObject,
		}));
		invalid.extend(missing_routes.iter().map(|id| InvalidObject {
			object: ObjectRef::Route(id.clone()),
			reason: InvalidReason::UnknownObject,
		}));

		if self.require_geocoded_orders {
			invalid.extend(
				orders
					.iter()
					.filter(|o| !o.is_geocoded())
					.map(|o| InvalidObject {
						object: ObjectRef::Order(o.id.clone()),
						reason: InvalidReason::MissingLocation,
					}),
			);
		}
		if self.require_route_depots {
			invalid.extend(
				routes
					.iter()
					.filter(|r| !r.depot.map(|p| p.is_valid()).unwrap_or(false))
					.map(|r| InvalidObject {
						object: ObjectRef::Route(r.id.clone()),
						reason: InvalidReason::MissingDepot,
					}),
			);
		}

		if invalid.is_empty() {
			Ok(())
		} else {
			Err(ValidationReport { kind, invalid })
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::NaiveDate;
	use routing_types::GeoPoint;

	fn date() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
	}

	fn route() -> Route {
		Route::new("r1", "Truck 1").with_depot(GeoPoint::new(0.0, 0.0))
	}

	#[test]
	fn test_build_without_orders_is_rejected() {
		let report = ValidationPolicy::default()
			.validate(OperationKind::BuildRoutes, &[], &[route()], &[], &[])
			.unwrap_err();
		assert_eq!(report.kind, OperationKind::BuildRoutes);
		assert_eq!(report.invalid.len(), 1);
		assert_eq!(report.invalid[0].reason, InvalidReason::NoOrders);
	}

	#[test]
	fn test_missing_geolocation_is_reported_per_object() {
		let orders = vec![
			Order::new("o1", "Located", date()).with_location(GeoPoint::new(1.0, 1.0)),
			Order::new("o2", "Not located", date()),
		];
		let report = ValidationPolicy::default()
			.validate(
				OperationKind::AssignOrders,
				&orders,
				&[Route::new("r2", "No depot")],
				&[],
				&[],
			)
			.unwrap_err();
		assert_eq!(
			report.invalid,
			vec![
				InvalidObject {
					object: ObjectRef::Order(OrderId::from("o2")),
					reason: InvalidReason::MissingLocation,
				},
				InvalidObject {
					object: ObjectRef::Route(RouteId::from("r2")),
					reason: InvalidReason::MissingDepot,
				},
			]
		);
	}

	#[test]
	fn test_shapes_only_need_routes() {
		let policy = ValidationPolicy::default();
		assert!(policy
			.validate(OperationKind::GenerateShapes, &[], &[route()], &[], &[])
			.is_ok());
		assert!(policy
			.validate(OperationKind::GenerateShapes, &[], &[], &[], &[])
			.is_err());
	}
}
