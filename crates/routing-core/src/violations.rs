//! Structured diagnostics for solver outcomes.
//!
//! The reporter only produces [`MessageDetail`] rows. Turning them into
//! text is left to whoever consumes the notification bus.

use routing_types::{
	MessageDetail, MessageKey, ObjectRef, OperationKind, OrderId, RouteId, Schedule, Severity,
	SolveRequest, Violation,
};
use std::collections::{BTreeMap, BTreeSet};

use crate::validation::ValidationReport;
use crate::workflow::LockReport;

pub struct ViolationReporter;

impl ViolationReporter {
	/// Details for a completed solve: one row per violation, then, for
	/// operations spreading orders over several routes, one row per order
	/// that ended up on a route.
	///
	/// Returns an empty list when there is nothing to report.
	pub fn build_details(
		schedule: &Schedule,
		request: &SolveRequest,
		violations: &[Violation],
	) -> Vec<MessageDetail> {
		let mut details = Self::violation_details(violations);

		if reports_assignments(request) {
			for (route_id, orders) in Self::assigned_by_route(schedule, request, violations) {
				details.extend(orders.into_iter().map(|order_id| {
					MessageDetail::new(
						Severity::Information,
						MessageKey::OrderAssigned,
						vec![ObjectRef::Stop {
							route_id: route_id.clone(),
							order_id,
						}],
					)
				}));
			}
		}

		details
	}

	pub fn violation_details(violations: &[Violation]) -> Vec<MessageDetail> {
		violations
			.iter()
			.map(|v| MessageDetail::new(v.severity, MessageKey::Violation(v.kind), v.objects.clone()))
			.collect()
	}

	/// Orders of the request now bound to a stop in `schedule`, grouped by
	/// route. Orders named by a violation are left out.
	pub fn assigned_by_route(
		schedule: &Schedule,
		request: &SolveRequest,
		violations: &[Violation],
	) -> BTreeMap<RouteId, Vec<OrderId>> {
		let violated: BTreeSet<&OrderId> = violations
			.iter()
			.flat_map(|v| v.objects.iter())
			.filter_map(|object| match object {
				ObjectRef::Order(id) | ObjectRef::Stop { order_id: id, .. } => Some(id),
				_ => None,
			})
			.collect();

		let mut grouped: BTreeMap<RouteId, Vec<OrderId>> = BTreeMap::new();
		for order in &request.orders {
			if violated.contains(&order.id) {
				continue;
			}
			if let Some(route) = schedule.route_for_order(&order.id) {
				grouped
					.entry(route.id.clone())
					.or_default()
					.push(order.id.clone());
			}
		}
		grouped
	}

	/// One row per object rejected before or by the solver.
	pub fn validation_details(report: &ValidationReport) -> Vec<MessageDetail> {
		report
			.invalid
			.iter()
			.map(|invalid| {
				MessageDetail::new(
					Severity::Error,
					MessageKey::InvalidObject(invalid.reason),
					vec![invalid.object.clone()],
				)
			})
			.collect()
	}

	/// Raw solver error text, passed through untouched.
	pub fn error_details(text: &str) -> Vec<MessageDetail> {
		if text.trim().is_empty() {
			return Vec::new();
		}
		vec![MessageDetail::new(
			Severity::Error,
			MessageKey::SolverError,
			vec![ObjectRef::Text(text.to_string())],
		)]
	}

	/// One row per locked order, naming the schedule it is locked in.
	pub fn locked_details(report: &LockReport) -> Vec<MessageDetail> {
		report
			.schedules
			.iter()
			.flat_map(|(schedule_id, orders)| {
				orders.iter().map(move |order_id| {
					MessageDetail::new(
						Severity::Error,
						MessageKey::OrderLocked,
						vec![
							ObjectRef::Schedule(schedule_id.clone()),
							ObjectRef::Order(order_id.clone()),
						],
					)
				})
			})
			.collect()
	}
}

fn reports_assignments(request: &SolveRequest) -> bool {
	match request.kind {
		OperationKind::BuildRoutes => true,
		OperationKind::AssignOrders => request.routes.len() > 1,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::NaiveDate;
	use routing_types::{
		InvalidReason, Order, Route, ScheduleId, ScheduleType, SolveOptions, ViolationKind,
	};

	use crate::validation::InvalidObject;

	fn date() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
	}

	fn schedule() -> Schedule {
		let mut r1 = Route::new("r1", "Truck 1");
		r1.push_stop(OrderId::from("o1"));
		let mut r2 = Route::new("r2", "Truck 2");
		r2.push_stop(OrderId::from("o2"));
		Schedule::new("current", date(), ScheduleType::Current)
			.with_route(r1)
			.with_route(r2)
	}

	fn request(kind: OperationKind, routes: usize) -> SolveRequest {
		SolveRequest {
			schedule_id: ScheduleId::from("current"),
			planned_date: date(),
			kind,
			orders: ["o1", "o2", "o3"]
				.iter()
				.map(|id| Order::new(*id, *id, date()))
				.collect(),
			routes: schedule().routes.into_iter().take(routes).collect(),
			options: SolveOptions::default(),
		}
	}

	#[test]
	fn test_violations_come_before_assignments() {
		let violations = vec![Violation::for_order(
			ViolationKind::CapacityExceeded,
			OrderId::from("o3"),
		)];
		let details = ViolationReporter::build_details(
			&schedule(),
			&request(OperationKind::BuildRoutes, 2),
			&violations,
		);

		assert_eq!(details.len(), 3);
		assert_eq!(
			details[0].key,
			MessageKey::Violation(ViolationKind::CapacityExceeded)
		);
		assert_eq!(details[1].key, MessageKey::OrderAssigned);
		assert_eq!(
			details[1].objects,
			vec![ObjectRef::Stop {
				route_id: RouteId::from("r1"),
				order_id: OrderId::from("o1"),
			}]
		);
		assert_eq!(
			details[2].objects,
			vec![ObjectRef::Stop {
				route_id: RouteId::from("r2"),
				order_id: OrderId::from("o2"),
			}]
		);
	}

	#[test]
	fn test_single_route_assign_reports_violations_only() {
		let violations = vec![Violation::for_order(
			ViolationKind::TimeWindowViolated,
			OrderId::from("o3"),
		)];
		let details = ViolationReporter::build_details(
			&schedule(),
			&request(OperationKind::AssignOrders, 1),
			&violations,
		);
		assert_eq!(details.len(), 1);

		let details = ViolationReporter::build_details(
			&schedule(),
			&request(OperationKind::UnassignOrders, 2),
			&[],
		);
		assert!(details.is_empty());
	}

	#[test]
	fn test_validation_and_error_details() {
		let report = ValidationReport {
			kind: OperationKind::AssignOrders,
			invalid: vec![InvalidObject {
				object: ObjectRef::Order(OrderId::from("o9")),
				reason: InvalidReason::MissingLocation,
			}],
		};
		let details = ViolationReporter::validation_details(&report);
		assert_eq!(
			details[0].key,
			MessageKey::InvalidObject(InvalidReason::MissingLocation)
		);

		assert!(ViolationReporter::error_details("  ").is_empty());
		assert_eq!(
			ViolationReporter::error_details("no feasible plan")[0].objects,
			vec![ObjectRef::Text("no feasible plan".to_string())]
		);
	}

	#[test]
	fn test_locked_details_name_the_schedule() {
		let report = LockReport {
			schedules: vec![(
				ScheduleId::from("current"),
				vec![OrderId::from("o1"), OrderId::from("o2")],
			)],
		};
		let details = ViolationReporter::locked_details(&report);
		assert_eq!(details.len(), 2);
		assert_eq!(
			details[1].objects,
			vec![
				ObjectRef::Schedule(ScheduleId::from("current")),
				ObjectRef::Order(OrderId::from("o2")),
			]
		);
	}
}
