//! In-process solver gateway.
//!
//! Runs operations on background tasks and answers with a simple greedy
//! plan. Completions are either emitted automatically after a configurable
//! latency or held until the caller completes them by hand, which makes the
//! ordering of operations observable from tests.

use crate::{GatewayError, GatewayEvent, SolveOutcome, SolverGateway};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use routing_types::{
	GeoPoint, OperationId, OperationInfo, OperationKind, OrderId, Route, ScheduleId,
	SolveRequest, SolveResult,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// When operations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
	/// Complete on a background task after the given latency.
	Automatic { latency: Duration },
	/// Hold every operation until [`InMemoryGateway::complete`] is called.
	Manual,
}

/// One line of the gateway's activity log.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayLogEntry {
	Started {
		id: OperationId,
		schedule_id: ScheduleId,
		kind: OperationKind,
	},
	Completed {
		id: OperationId,
		schedule_id: ScheduleId,
		cancelled: bool,
	},
}

struct Inner {
	mode: CompletionMode,
	sender: broadcast::Sender<GatewayEvent>,
	pending: DashMap<OperationId, SolveRequest>,
	scripted: DashMap<ScheduleId, VecDeque<SolveOutcome>>,
	refused: DashMap<ScheduleId, GatewayError>,
	log: Mutex<Vec<GatewayLogEntry>>,
}

/// Solver gateway living in the same process.
#[derive(Clone)]
pub struct InMemoryGateway {
	inner: Arc<Inner>,
}

impl InMemoryGateway {
	/// Creates a gateway whose event channel buffers `capacity` events.
	pub fn new(mode: CompletionMode, capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self {
			inner: Arc::new(Inner {
				mode,
				sender,
				pending: DashMap::new(),
				scripted: DashMap::new(),
				refused: DashMap::new(),
				log: Mutex::new(Vec::new()),
			}),
		}
	}

	pub fn automatic(latency: Duration) -> Self {
		Self::new(CompletionMode::Automatic { latency }, 1024)
	}

	pub fn manual() -> Self {
		Self::new(CompletionMode::Manual, 1024)
	}

	/// Queues the outcome of the next operation completing on `schedule_id`
	/// instead of the computed plan.
	pub fn script(&self, schedule_id: &ScheduleId, outcome: SolveOutcome) {
		self.inner
			.scripted
			.entry(schedule_id.clone())
			.or_default()
			.push_back(outcome);
	}

	/// Makes every start against `schedule_id` fail with `error`.
	pub fn refuse(&self, schedule_id: &ScheduleId, error: GatewayError) {
		self.inner.refused.insert(schedule_id.clone(), error);
	}

	/// Ids of operations started but not completed yet.
	pub fn pending(&self) -> Vec<OperationId> {
		self.inner.pending.iter().map(|e| *e.key()).collect()
	}

	pub async fn log(&self) -> Vec<GatewayLogEntry> {
		self.inner.log.lock().await.clone()
	}

	/// Number of operations ever started.
	pub async fn started_count(&self) -> usize {
		self.inner
			.log
			.lock()
			.await
			.iter()
			.filter(|e| matches!(e, GatewayLogEntry::Started { .. }))
			.count()
	}

	/// Completes a held operation with its scripted or computed outcome.
	/// Returns false if the operation is not pending.
	pub async fn complete(&self, id: &OperationId) -> bool {
		self.inner.finish(id, None).await
	}

	/// Completes a held operation with the given outcome.
	pub async fn complete_with(&self, id: &OperationId, outcome: SolveOutcome) -> bool {
		self.inner.finish(id, Some(outcome)).await
	}
}

impl Inner {
	async fn finish(&self, id: &OperationId, outcome: Option<SolveOutcome>) -> bool {
		let Some((_, request)) = self.pending.remove(id) else {
			return false;
		};

		let outcome = outcome
			.or_else(|| {
				self.scripted
					.get_mut(&request.schedule_id)
					.and_then(|mut queue| queue.pop_front())
			})
			.unwrap_or_else(|| SolveOutcome::Solved(simulate(&request)));

		self.log.lock().await.push(GatewayLogEntry::Completed {
			id: *id,
			schedule_id: request.schedule_id.clone(),
			cancelled: matches!(outcome, SolveOutcome::Cancelled),
		});

		debug!("Operation {} completed", id);
		self.sender
			.send(GatewayEvent::Completed { id: *id, outcome })
			.ok();
		true
	}
}

#[async_trait]
impl SolverGateway for InMemoryGateway {
	async fn start(&self, request: SolveRequest) -> Result<OperationId, GatewayError> {
		if let Some(error) = self.inner.refused.get(&request.schedule_id) {
			return Err(error.value().clone());
		}

		let id = OperationId::new();
		self.inner.log.lock().await.push(GatewayLogEntry::Started {
			id,
			schedule_id: request.schedule_id.clone(),
			kind: request.kind,
		});
		self.inner.pending.insert(id, request);
		self.inner.sender.send(GatewayEvent::Started { id }).ok();

		if let CompletionMode::Automatic { latency } = self.inner.mode {
			let inner = self.inner.clone();
			tokio::spawn(async move {
				tokio::time::sleep(latency).await;
				inner.finish(&id, None).await;
			});
		}

		Ok(id)
	}

	fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
		self.inner.sender.subscribe()
	}

	async fn operation_info(&self, id: &OperationId) -> Option<OperationInfo> {
		self.inner.pending.get(id).map(|request| OperationInfo {
			id: *id,
			request: request.clone(),
		})
	}

	async fn operations_for_date(&self, date: NaiveDate) -> Vec<OperationInfo> {
		self.inner
			.pending
			.iter()
			.filter(|entry| entry.value().planned_date == date)
			.map(|entry| OperationInfo {
				id: *entry.key(),
				request: entry.value().clone(),
			})
			.collect()
	}

	async fn cancel(&self, id: &OperationId) -> bool {
		let accepted = self.inner.finish(id, Some(SolveOutcome::Cancelled)).await;
		if accepted {
			info!("Operation {} cancelled", id);
		}
		accepted
	}
}

/// Greedy stand-in for the real solver.
///
/// Returns only the routes named in the request, modified according to the
/// operation kind.
pub fn simulate(request: &SolveRequest) -> SolveResult {
	let mut routes = request.routes.clone();
	let requested: HashSet<&OrderId> = request.orders.iter().map(|o| &o.id).collect();

	match request.kind {
		OperationKind::UnassignOrders => {
			for route in routes.iter_mut() {
				route.stops.retain(|s| !requested.contains(&s.order_id));
				route.resequence();
			}
		}
		OperationKind::AssignOrders => {
			for order in &request.orders {
				let already_placed = routes.iter().any(|r| r.stop_for(&order.id).is_some());
				if request.options.keep_route_assignment && already_placed {
					continue;
				}
				for route in routes.iter_mut() {
					route.stops.retain(|s| s.order_id != order.id);
				}
				insert_on_lightest(&mut routes, order.id.clone(), request.options.sequence_hint);
			}
			routes.iter_mut().for_each(Route::resequence);
		}
		OperationKind::BuildRoutes => {
			for route in routes.iter_mut() {
				let locked = route.locked;
				route.stops.retain(|s| s.locked || locked);
			}
			for order in &request.orders {
				if routes.iter().any(|r| r.stop_for(&order.id).is_some()) {
					continue;
				}
				insert_on_lightest(&mut routes, order.id.clone(), None);
			}
			routes.iter_mut().for_each(Route::resequence);
		}
		OperationKind::SequenceRoutes => {
			let locations: HashMap<&OrderId, GeoPoint> = request
				.orders
				.iter()
				.filter_map(|o| o.location.map(|p| (&o.id, p)))
				.collect();
			for route in routes.iter_mut().filter(|r| !r.locked) {
				nearest_neighbour(route, &locations);
			}
		}
		OperationKind::GenerateShapes => {}
	}

	SolveResult::succeeded(routes)
}

fn insert_on_lightest(routes: &mut [Route], order_id: OrderId, position: Option<u32>) {
	let Some(route) = routes
		.iter_mut()
		.filter(|r| !r.locked)
		.min_by_key(|r| r.stops.len())
	else {
		return;
	};
	route.push_stop(order_id);
	if let Some(position) = position {
		let index = (position.max(1) as usize - 1).min(route.stops.len() - 1);
		if let Some(stop) = route.stops.pop() {
			route.stops.insert(index, stop);
		}
	}
}

fn nearest_neighbour(route: &mut Route, locations: &HashMap<&OrderId, GeoPoint>) {
	let Some(mut current) = route.depot else {
		return;
	};
	let mut remaining = std::mem::take(&mut route.stops);
	while !remaining.is_empty() {
		let next = remaining
			.iter()
			.enumerate()
			.map(|(i, s)| {
				let distance = locations
					.get(&s.order_id)
					.map(|p| squared_distance(&current, p))
					.unwrap_or(f64::MAX);
				(i, distance)
			})
			.min_by(|a, b| a.1.total_cmp(&b.1))
			.map(|(i, _)| i)
			.unwrap_or(0);
		let stop = remaining.remove(next);
		if let Some(p) = locations.get(&stop.order_id) {
			current = *p;
		}
		route.stops.push(stop);
	}
	route.resequence();
}

fn squared_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
	let dx = a.latitude - b.latitude;
	let dy = a.longitude - b.longitude;
	dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
	use super::*;
	use routing_types::{Order, SolveOptions, Stop};

	fn date() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
	}

	fn route_with(id: &str, orders: &[&str]) -> Route {
		let mut route = Route::new(id, id).with_depot(GeoPoint::new(0.0, 0.0));
		for order in orders {
			route.push_stop(OrderId::from(*order));
		}
		route
	}

	fn request(kind: OperationKind, orders: &[&str], routes: Vec<Route>) -> SolveRequest {
		SolveRequest {
			schedule_id: ScheduleId::from("current"),
			planned_date: date(),
			kind,
			orders: orders
				.iter()
				.map(|id| Order::new(*id, *id, date()).with_location(GeoPoint::new(1.0, 1.0)))
				.collect(),
			routes,
			options: SolveOptions::default(),
		}
	}

	#[test]
	fn test_simulate_unassign_removes_stops() {
		let req = request(
			OperationKind::UnassignOrders,
			&["o1"],
			vec![route_with("r1", &["o1", "o2"])],
		);
		let result = simulate(&req);
		assert!(!result.is_failed);
		assert_eq!(
			result.routes[0].stops,
			vec![Stop {
				order_id: OrderId::from("o2"),
				sequence: 1,
				locked: false
			}]
		);
	}

	#[test]
	fn test_simulate_assign_balances_routes() {
		let req = request(
			OperationKind::AssignOrders,
			&["o3", "o4"],
			vec![route_with("r1", &["o1"]), route_with("r2", &[])],
		);
		let result = simulate(&req);
		assert_eq!(result.routes[0].order_ids().len(), 2);
		assert!(result.routes[1].stop_for(&OrderId::from("o3")).is_some());
		assert_eq!(result.routes[1].stops.len(), 1);
	}

	#[tokio::test]
	async fn test_manual_gateway_emits_one_completion() {
		let gateway = InMemoryGateway::manual();
		let mut events = gateway.subscribe();
		let id = gateway
			.start(request(OperationKind::GenerateShapes, &[], vec![route_with("r1", &[])]))
			.await
			.unwrap();

		assert!(matches!(events.recv().await.unwrap(), GatewayEvent::Started { .. }));
		assert_eq!(gateway.operations_for_date(date()).await.len(), 1);

		assert!(gateway.cancel(&id).await);
		assert!(!gateway.complete(&id).await);
		match events.recv().await.unwrap() {
			GatewayEvent::Completed { id: done, outcome } => {
				assert_eq!(done, id);
				assert_eq!(outcome, SolveOutcome::Cancelled);
			}
			other => panic!("unexpected event {:?}", other),
		}
		assert!(gateway.operation_info(&id).await.is_none());
	}

	#[tokio::test]
	async fn test_automatic_gateway_completes() {
		let gateway = InMemoryGateway::automatic(Duration::from_millis(5));
		let mut events = gateway.subscribe();
		let id = gateway
			.start(request(
				OperationKind::UnassignOrders,
				&["o1"],
				vec![route_with("r1", &["o1"])],
			))
			.await
			.unwrap();

		loop {
			if let GatewayEvent::Completed { id: done, outcome } = events.recv().await.unwrap() {
				assert_eq!(done, id);
				assert!(matches!(outcome, SolveOutcome::Solved(_)));
				break;
			}
		}
	}
}
