//! In-memory project model: the orders and schedules the planner edits.
//!
//! The orchestrator references schedules by id and mutates them only
//! through [`Project::commit_solution`] after a confirmed successful solve.

use chrono::NaiveDate;
use routing_types::{
	Order, OrderId, Route, RouteId, Schedule, ScheduleId, ScheduleType, SelectedItem,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CoordinatorError;

#[derive(Default)]
struct ProjectState {
	orders: BTreeMap<OrderId, Order>,
	schedules: BTreeMap<ScheduleId, Schedule>,
}

impl ProjectState {
	fn refresh_date(&mut self, date: NaiveDate) -> Vec<ScheduleId> {
		let orders = &self.orders;
		self.schedules
			.values_mut()
			.filter(|s| s.planned_date == date)
			.map(|s| {
				s.recompute_unassigned(orders.values());
				s.id.clone()
			})
			.collect()
	}
}

/// What a committed solve changed.
#[derive(Debug, Clone)]
pub struct CommitSummary {
	/// The schedule after the solver's routes were applied.
	pub schedule: Schedule,
	/// Snapshot taken after a build, if one was taken.
	pub snapshot: Option<Schedule>,
	/// Snapshots replaced by the new one.
	pub dropped: Vec<ScheduleId>,
}

#[derive(Default)]
pub struct Project {
	state: RwLock<ProjectState>,
}

impl Project {
	pub fn new(orders: Vec<Order>, schedules: Vec<Schedule>) -> Self {
		let mut state = ProjectState {
			orders: orders.into_iter().map(|o| (o.id.clone(), o)).collect(),
			schedules: BTreeMap::new(),
		};
		for mut schedule in schedules {
			schedule.recompute_unassigned(state.orders.values());
			state.schedules.insert(schedule.id.clone(), schedule);
		}
		Self {
			state: RwLock::new(state),
		}
	}

	pub async fn add_order(&self, order: Order) {
		let mut state = self.state.write().await;
		let date = order.planned_date;
		state.orders.insert(order.id.clone(), order);
		state.refresh_date(date);
	}

	pub async fn insert_schedule(&self, mut schedule: Schedule) {
		let mut state = self.state.write().await;
		schedule.recompute_unassigned(state.orders.values());
		state.schedules.insert(schedule.id.clone(), schedule);
	}

	pub async fn order(&self, id: &OrderId) -> Option<Order> {
		self.state.read().await.orders.get(id).cloned()
	}

	/// Looks up orders by id; the second list holds ids not in the project.
	pub async fn orders(&self, ids: &[OrderId]) -> (Vec<Order>, Vec<OrderId>) {
		let state = self.state.read().await;
		let mut found = Vec::with_capacity(ids.len());
		let mut missing = Vec::new();
		for id in ids {
			match state.orders.get(id) {
				Some(order) => found.push(order.clone()),
				None => missing.push(id.clone()),
			}
		}
		(found, missing)
	}

	pub async fn contains_order(&self, id: &OrderId) -> bool {
		self.state.read().await.orders.contains_key(id)
	}

	pub async fn schedule(&self, id: &ScheduleId) -> Option<Schedule> {
		self.state.read().await.schedules.get(id).cloned()
	}

	/// Schedules of a date, current version first, then snapshots, then
	/// other versions; ties broken by id.
	pub async fn schedules_on(&self, date: NaiveDate) -> Vec<Schedule> {
		let state = self.state.read().await;
		let mut schedules: Vec<Schedule> = state
			.schedules
			.values()
			.filter(|s| s.planned_date == date)
			.cloned()
			.collect();
		schedules.sort_by(|a, b| {
			(a.schedule_type.rank(), &a.id).cmp(&(b.schedule_type.rank(), &b.id))
		});
		schedules
	}

	/// Routes of a schedule by id; the second list holds unknown ids.
	pub async fn routes(
		&self,
		schedule_id: &ScheduleId,
		ids: &[RouteId],
	) -> Result<(Vec<Route>, Vec<RouteId>), CoordinatorError> {
		let state = self.state.read().await;
		let schedule = state
			.schedules
			.get(schedule_id)
			.ok_or_else(|| CoordinatorError::UnknownSchedule(schedule_id.clone()))?;
		let mut found = Vec::with_capacity(ids.len());
		let mut missing = Vec::new();
		for id in ids {
			match schedule.route(id) {
				Some(route) => found.push(route.clone()),
				None => missing.push(id.clone()),
			}
		}
		Ok((found, missing))
	}

	/// Applies solver routes to a schedule and rebuilds its unassigned view.
	///
	/// With `take_snapshot`, the date's build snapshot is replaced by a copy
	/// of the updated schedule so that at most one snapshot exists per date.
	pub async fn commit_solution(
		&self,
		schedule_id: &ScheduleId,
		routes: &[Route],
		take_snapshot: bool,
	) -> Result<CommitSummary, CoordinatorError> {
		let mut state = self.state.write().await;
		let ProjectState { orders, schedules } = &mut *state;

		let schedule = schedules
			.get_mut(schedule_id)
			.ok_or_else(|| CoordinatorError::UnknownSchedule(schedule_id.clone()))?;
		schedule.apply_routes(routes);
		schedule.recompute_unassigned(orders.values());
		let schedule = schedule.clone();

		let mut snapshot = None;
		let mut dropped = Vec::new();
		if take_snapshot && schedule.schedule_type != ScheduleType::BuildRoutesSnapshot {
			dropped = schedules
				.values()
				.filter(|s| {
					s.planned_date == schedule.planned_date
						&& s.schedule_type == ScheduleType::BuildRoutesSnapshot
				})
				.map(|s| s.id.clone())
				.collect();
			for id in &dropped {
				schedules.remove(id);
			}

			let mut copy = schedule.clone();
			copy.id = snapshot_id(schedule.planned_date);
			copy.name = format!("{} (build snapshot)", schedule.name);
			copy.schedule_type = ScheduleType::BuildRoutesSnapshot;
			dropped.retain(|id| id != &copy.id);
			info!(
				"Replaced build snapshot for {} with {}",
				schedule.planned_date, copy.id
			);
			schedules.insert(copy.id.clone(), copy.clone());
			snapshot = Some(copy);
		}

		Ok(CommitSummary {
			schedule,
			snapshot,
			dropped,
		})
	}

	/// Rebuilds the unassigned view of one schedule.
	pub async fn refresh(&self, schedule_id: &ScheduleId) -> Option<Schedule> {
		let mut state = self.state.write().await;
		let ProjectState { orders, schedules } = &mut *state;
		let schedule = schedules.get_mut(schedule_id)?;
		schedule.recompute_unassigned(orders.values());
		Some(schedule.clone())
	}

	/// Removes orders from the project. Stops still bound to them are left
	/// alone; callers unassign first.
	pub async fn remove_orders(&self, ids: &[OrderId]) -> Vec<Order> {
		let mut state = self.state.write().await;
		let removed: Vec<Order> = ids.iter().filter_map(|id| state.orders.remove(id)).collect();
		let dates: BTreeSet<NaiveDate> = removed.iter().map(|o| o.planned_date).collect();
		for date in dates {
			state.refresh_date(date);
		}
		debug!("Removed {} order(s) from the project", removed.len());
		removed
	}

	/// Re-dates orders and refreshes the views of both dates.
	pub async fn move_orders(&self, ids: &[OrderId], to: NaiveDate) -> Vec<ScheduleId> {
		let mut state = self.state.write().await;
		let mut dates = BTreeSet::from([to]);
		for id in ids {
			if let Some(order) = state.orders.get_mut(id) {
				dates.insert(order.planned_date);
				order.planned_date = to;
			}
		}
		dates
			.into_iter()
			.flat_map(|date| state.refresh_date(date))
			.collect()
	}

	/// Resolves a selection made in a view of `schedule_id` to order ids,
	/// without duplicates and in selection order.
	pub async fn resolve_selection(
		&self,
		schedule_id: &ScheduleId,
		items: &[SelectedItem],
	) -> Vec<OrderId> {
		let state = self.state.read().await;
		let schedule = state.schedules.get(schedule_id);
		let mut seen = BTreeSet::new();
		let mut resolved = Vec::new();
		let mut push = |id: &OrderId| {
			if seen.insert(id.clone()) {
				resolved.push(id.clone());
			}
		};

		for item in items {
			match item {
				SelectedItem::Order(order_id) => push(order_id),
				SelectedItem::Stop { order_id, .. } => push(order_id),
				SelectedItem::Route(route_id) => {
					if let Some(route) = schedule.and_then(|s| s.route(route_id)) {
						route.stops.iter().for_each(|stop| push(&stop.order_id));
					}
				}
			}
		}
		resolved
	}
}

fn snapshot_id(date: NaiveDate) -> ScheduleId {
	ScheduleId(format!("{}/build-snapshot", date))
}

#[cfg(test)]
mod tests {
	use super::*;
	use routing_types::GeoPoint;

	fn date() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
	}

	fn project() -> Project {
		let orders = vec![
			Order::new("o1", "First", date()).with_location(GeoPoint::new(1.0, 1.0)),
			Order::new("o2", "Second", date()).with_location(GeoPoint::new(2.0, 2.0)),
		];
		let mut route = Route::new("r1", "Truck 1");
		route.push_stop(OrderId::from("o1"));
		let current = Schedule::new("current", date(), ScheduleType::Current).with_route(route);
		Project::new(orders, vec![current])
	}

	#[tokio::test]
	async fn test_build_keeps_a_single_snapshot() {
		let project = project();
		let id = ScheduleId::from("current");
		let mut route = Route::new("r1", "Truck 1");
		route.push_stop(OrderId::from("o1"));
		route.push_stop(OrderId::from("o2"));

		let first = project
			.commit_solution(&id, &[route.clone()], true)
			.await
			.unwrap();
		assert!(first.snapshot.is_some());
		assert!(first.dropped.is_empty());
		assert!(first.schedule.unassigned_orders.is_empty());

		project.commit_solution(&id, &[route], true).await.unwrap();
		let snapshots: Vec<_> = project
			.schedules_on(date())
			.await
			.into_iter()
			.filter(|s| s.schedule_type == ScheduleType::BuildRoutesSnapshot)
			.collect();
		assert_eq!(snapshots.len(), 1);
	}

	#[tokio::test]
	async fn test_resolve_selection_deduplicates() {
		let project = project();
		let items = vec![
			SelectedItem::Route(RouteId::from("r1")),
			SelectedItem::Stop {
				route_id: RouteId::from("r1"),
				order_id: OrderId::from("o1"),
			},
			SelectedItem::Order(OrderId::from("o2")),
		];
		let resolved = project
			.resolve_selection(&ScheduleId::from("current"), &items)
			.await;
		assert_eq!(resolved, vec![OrderId::from("o1"), OrderId::from("o2")]);
	}

	#[tokio::test]
	async fn test_remove_orders_refreshes_views() {
		let project = project();
		let schedule = project.schedule(&ScheduleId::from("current")).await.unwrap();
		assert_eq!(schedule.unassigned_orders, vec![OrderId::from("o2")]);

		project.remove_orders(&[OrderId::from("o2")]).await;
		let schedule = project.schedule(&ScheduleId::from("current")).await.unwrap();
		assert!(schedule.unassigned_orders.is_empty());
	}
}
