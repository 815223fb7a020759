use async_trait::async_trait;
use chrono::NaiveDate;
use routing_core::{
	CoordinatorError, DeleteOrders, FollowUp, MultiScheduleUnassignWorkflow, NotificationBus,
	OperationOutcome, Project, RoutingCommand, RoutingOperationCoordinator, ValidationPolicy,
	WorkflowOutcome,
};
use routing_gateway::implementations::memory::{GatewayLogEntry, InMemoryGateway};
use routing_gateway::{SolveOutcome, SolverGateway};
use routing_storage::implementations::memory::MemoryStorage;
use routing_storage::{StorageError, StorageInterface, StorageService};
use routing_types::{
	GeoPoint, InvalidReason, MessageKey, OperationId, OperationKind, Order, OrderId, Route,
	RouteId, RoutingEvent, Schedule, ScheduleId, ScheduleType, SolveResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

const CURRENT: &str = "2024-01-10/current";
const SNAPSHOT: &str = "2024-01-10/snapshot";
const VERSION: &str = "2024-01-10/v2";

fn date() -> NaiveDate {
	NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
}

fn route(id: &str, orders: &[&str]) -> Route {
	let mut route = Route::new(id, id).with_depot(GeoPoint::new(52.0, 4.0));
	for order in orders {
		route.push_stop(OrderId::from(*order));
	}
	route
}

fn orders() -> Vec<Order> {
	["O1", "O2", "O3"]
		.iter()
		.enumerate()
		.map(|(i, id)| {
			Order::new(*id, format!("Order {}", id), date())
				.with_location(GeoPoint::new(52.0 + i as f64 / 100.0, 4.0))
		})
		.collect()
}

fn ids(values: &[&str]) -> Vec<OrderId> {
	values.iter().map(|v| OrderId::from(*v)).collect()
}

struct Fixture {
	gateway: InMemoryGateway,
	project: Arc<Project>,
	storage: StorageService,
	bus: NotificationBus,
	events: broadcast::Receiver<RoutingEvent>,
}

impl Fixture {
	fn new(schedules: Vec<Schedule>) -> Self {
		Self::with_backend(schedules, Arc::new(MemoryStorage::new()))
	}

	fn with_backend(schedules: Vec<Schedule>, backend: Arc<dyn StorageInterface>) -> Self {
		let bus = NotificationBus::new(256);
		Self {
			gateway: InMemoryGateway::manual(),
			project: Arc::new(Project::new(orders(), schedules)),
			storage: StorageService::new(backend),
			events: bus.subscribe(),
			bus,
		}
	}

	/// Current and snapshot both routing O1 and O2.
	fn current_and_snapshot() -> Self {
		Self::new(vec![
			Schedule::new(CURRENT, date(), ScheduleType::Current)
				.with_route(route("c-r1", &["O1", "O2"])),
			Schedule::new(SNAPSHOT, date(), ScheduleType::BuildRoutesSnapshot)
				.with_route(route("s-r1", &["O1"]))
				.with_route(route("s-r2", &["O2", "O3"])),
		])
	}

	fn workflow(&self) -> Arc<MultiScheduleUnassignWorkflow> {
		Arc::new(MultiScheduleUnassignWorkflow::new(
			Arc::new(self.gateway.clone()),
			self.project.clone(),
			self.storage.clone(),
			self.bus.clone(),
			ValidationPolicy::default(),
		))
	}

	fn coordinator(&self) -> RoutingOperationCoordinator {
		RoutingOperationCoordinator::new(
			Arc::new(self.gateway.clone()),
			self.project.clone(),
			self.storage.clone(),
			self.bus.clone(),
			ValidationPolicy::default(),
		)
	}

	async fn schedule(&self, id: &str) -> Schedule {
		self.project.schedule(&ScheduleId::from(id)).await.unwrap()
	}

	fn drain(&mut self) -> Vec<RoutingEvent> {
		let mut events = Vec::new();
		while let Ok(event) = self.events.try_recv() {
			events.push(event);
		}
		events
	}
}

/// Accepts a fixed number of writes, then fails every later one.
struct WriteLimitedStorage {
	inner: MemoryStorage,
	writes_left: AtomicUsize,
}

impl WriteLimitedStorage {
	fn new(writes: usize) -> Self {
		Self {
			inner: MemoryStorage::new(),
			writes_left: AtomicUsize::new(writes),
		}
	}
}

#[async_trait]
impl StorageInterface for WriteLimitedStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.inner.get_bytes(key).await
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let allowed = self
			.writes_left
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if !allowed {
			return Err(StorageError::Backend("read-only volume".to_string()));
		}
		self.inner.set_bytes(key, value).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.inner.delete(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.inner.exists(key).await
	}
}

#[derive(Default)]
struct RecordingFollowUp {
	calls: Mutex<Vec<(Vec<OrderId>, NaiveDate)>>,
}

#[async_trait]
impl FollowUp for RecordingFollowUp {
	async fn process_orders(&self, orders: &[OrderId], date: NaiveDate) -> Result<(), CoordinatorError> {
		self.calls.lock().await.push((orders.to_vec(), date));
		Ok(())
	}
}

/// Waits for exactly one pending operation and returns it.
async fn single_pending(gateway: &InMemoryGateway) -> OperationId {
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			let pending = gateway.pending();
			assert!(pending.len() <= 1, "more than one solve in flight");
			if let Some(id) = pending.first() {
				return *id;
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.expect("no operation started")
}

fn started_on(log: &[GatewayLogEntry]) -> Vec<ScheduleId> {
	log.iter()
		.filter_map(|entry| match entry {
			GatewayLogEntry::Started { schedule_id, .. } => Some(schedule_id.clone()),
			_ => None,
		})
		.collect()
}

fn outcome_keys(events: &[RoutingEvent]) -> Vec<MessageKey> {
	events
		.iter()
		.filter_map(|event| match event {
			RoutingEvent::Outcome(notification) => Some(notification.key.clone()),
			_ => None,
		})
		.collect()
}

#[tokio::test]
async fn test_coordinators_ignore_each_others_operations() {
	let fixture = Fixture::current_and_snapshot();
	let first = fixture.coordinator();
	let second = fixture.coordinator();
	let before = fixture.schedule(CURRENT).await;

	let unassign = |schedule: &str, route: &str| {
		RoutingCommand::new(OperationKind::UnassignOrders, ScheduleId::from(schedule))
			.with_orders(ids(&["O1"]))
			.with_routes(vec![RouteId::from(route)])
	};
	let a = first.start(unassign(CURRENT, "c-r1")).await.unwrap();
	let b = second.start(unassign(SNAPSHOT, "s-r1")).await.unwrap();

	let foreign = first
		.on_completed(&b, SolveOutcome::Solved(SolveResult::succeeded(Vec::new())))
		.await
		.unwrap();
	assert!(foreign.is_none());
	assert_eq!(fixture.schedule(CURRENT).await, before);
	assert!(first.owns(&a));
	assert!(!first.owns(&b));

	fixture.gateway.complete(&b).await;
	fixture.gateway.complete(&a).await;
	let (ra, rb) = futures::future::join(first.wait_for(&a), second.wait_for(&b)).await;
	assert_eq!(ra.unwrap().schedule_id, ScheduleId::from(CURRENT));
	assert_eq!(rb.unwrap().schedule_id, ScheduleId::from(SNAPSHOT));
	assert!(first.active_operations().is_empty());
	assert!(second.active_operations().is_empty());
}

#[tokio::test]
async fn test_delete_unassigns_current_then_snapshot_then_deletes() {
	let mut fixture = Fixture::current_and_snapshot();
	let workflow = fixture.workflow();
	let follow_up = Arc::new(DeleteOrders::new(
		fixture.project.clone(),
		fixture.storage.clone(),
	));

	let run = {
		let follow_up = follow_up.clone();
		tokio::spawn(async move {
			workflow
				.run(&ids(&["O1", "O2"]), date(), follow_up.as_ref())
				.await
		})
	};

	let first = single_pending(&fixture.gateway).await;
	let info = fixture.gateway.log().await;
	assert_eq!(started_on(&info), vec![ScheduleId::from(CURRENT)]);
	assert!(fixture.project.contains_order(&OrderId::from("O1")).await);
	fixture.gateway.complete(&first).await;

	let second = single_pending(&fixture.gateway).await;
	assert_ne!(first, second);
	let log = fixture.gateway.log().await;
	assert_eq!(
		log[..3],
		[
			GatewayLogEntry::Started {
				id: first,
				schedule_id: ScheduleId::from(CURRENT),
				kind: OperationKind::UnassignOrders,
			},
			GatewayLogEntry::Completed {
				id: first,
				schedule_id: ScheduleId::from(CURRENT),
				cancelled: false,
			},
			GatewayLogEntry::Started {
				id: second,
				schedule_id: ScheduleId::from(SNAPSHOT),
				kind: OperationKind::UnassignOrders,
			},
		]
	);
	assert!(fixture.project.contains_order(&OrderId::from("O1")).await);
	fixture.gateway.complete(&second).await;

	let outcome = run.await.unwrap().unwrap();
	match outcome {
		WorkflowOutcome::Completed { processed } => assert_eq!(
			processed,
			vec![ScheduleId::from(CURRENT), ScheduleId::from(SNAPSHOT)]
		),
		other => panic!("unexpected outcome {:?}", other),
	}

	assert!(!fixture.project.contains_order(&OrderId::from("O1")).await);
	assert!(!fixture.project.contains_order(&OrderId::from("O2")).await);
	let snapshot = fixture.schedule(SNAPSHOT).await;
	assert_eq!(snapshot.assigned_orders().len(), 1);
	assert!(snapshot.unassigned_orders.is_empty());
	assert_eq!(
		outcome_keys(&fixture.drain()),
		vec![
			MessageKey::OperationCompleted(OperationKind::UnassignOrders),
			MessageKey::OperationCompleted(OperationKind::UnassignOrders),
		]
	);
}

#[tokio::test]
async fn test_locked_order_aborts_before_any_solve() {
	let mut snapshot = Schedule::new(SNAPSHOT, date(), ScheduleType::BuildRoutesSnapshot)
		.with_route(route("s-r1", &["O1", "O2"]));
	snapshot.routes[0].stops[1].locked = true;
	let mut fixture = Fixture::new(vec![
		Schedule::new(CURRENT, date(), ScheduleType::Current)
			.with_route(route("c-r1", &["O1"]).locked()),
		snapshot,
	]);
	let follow_up = RecordingFollowUp::default();

	let outcome = fixture
		.workflow()
		.run(&ids(&["O1", "O2"]), date(), &follow_up)
		.await
		.unwrap();

	match &outcome {
		WorkflowOutcome::Locked(report) => assert_eq!(
			report.schedules,
			vec![
				(ScheduleId::from(CURRENT), ids(&["O1"])),
				(ScheduleId::from(SNAPSHOT), ids(&["O2"])),
			]
		),
		other => panic!("unexpected outcome {:?}", other),
	}
	assert_eq!(fixture.gateway.started_count().await, 0);
	assert!(follow_up.calls.lock().await.is_empty());

	let events = fixture.drain();
	assert_eq!(outcome_keys(&events), vec![MessageKey::OrdersLocked]);
	match &events[0] {
		RoutingEvent::Outcome(notification) => {
			assert_eq!(notification.planned_date, Some(date()));
			assert_eq!(notification.details.len(), 2);
		}
		other => panic!("unexpected event {:?}", other),
	}
	assert!(matches!(
		outcome.into_result(),
		Err(CoordinatorError::LockedObjects(_))
	));
}

#[tokio::test]
async fn test_failure_halts_and_keeps_earlier_schedules_committed() {
	let fixture = Fixture::new(vec![
		Schedule::new(CURRENT, date(), ScheduleType::Current).with_route(route("c-r1", &["O1"])),
		Schedule::new(SNAPSHOT, date(), ScheduleType::BuildRoutesSnapshot)
			.with_route(route("s-r1", &["O1"])),
		Schedule::new(VERSION, date(), ScheduleType::Version).with_route(route("v-r1", &["O1"])),
	]);
	fixture.gateway.script(
		&ScheduleId::from(SNAPSHOT),
		SolveOutcome::Solved(SolveResult::failed("route is infeasible", Vec::new())),
	);
	let workflow = fixture.workflow();
	let follow_up = Arc::new(RecordingFollowUp::default());

	let run = {
		let follow_up = follow_up.clone();
		tokio::spawn(async move { workflow.run(&ids(&["O1"]), date(), follow_up.as_ref()).await })
	};
	for _ in 0..2 {
		let id = single_pending(&fixture.gateway).await;
		fixture.gateway.complete(&id).await;
	}

	match run.await.unwrap().unwrap() {
		WorkflowOutcome::Halted {
			failed_at,
			schedule_id,
			processed,
			skipped,
			reason,
		} => {
			assert_eq!(failed_at, 1);
			assert_eq!(schedule_id, ScheduleId::from(SNAPSHOT));
			assert_eq!(processed, vec![ScheduleId::from(CURRENT)]);
			assert_eq!(skipped, vec![ScheduleId::from(VERSION)]);
			assert!(matches!(reason, CoordinatorError::SolveFailed(_)));
		}
		other => panic!("unexpected outcome {:?}", other),
	}

	let current = fixture.schedule(CURRENT).await;
	assert_eq!(current.unassigned_orders, ids(&["O1", "O2", "O3"]));
	let refreshed = fixture
		.project
		.refresh(&ScheduleId::from(CURRENT))
		.await
		.unwrap();
	assert_eq!(refreshed, current);
	let persisted: Schedule = fixture
		.storage
		.retrieve("schedules", CURRENT)
		.await
		.unwrap();
	assert_eq!(persisted, current);

	assert!(fixture.schedule(SNAPSHOT).await.is_assigned(&OrderId::from("O1")));
	assert!(!started_on(&fixture.gateway.log().await).contains(&ScheduleId::from(VERSION)));
	assert!(follow_up.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_halt_reason_survives_failed_refresh() {
	// One write: the commit on the current schedule. The refresh after the
	// halt cannot be saved.
	let fixture = Fixture::with_backend(
		vec![
			Schedule::new(CURRENT, date(), ScheduleType::Current).with_route(route("c-r1", &["O1"])),
			Schedule::new(SNAPSHOT, date(), ScheduleType::BuildRoutesSnapshot)
				.with_route(route("s-r1", &["O1"])),
		],
		Arc::new(WriteLimitedStorage::new(1)),
	);
	fixture.gateway.script(
		&ScheduleId::from(SNAPSHOT),
		SolveOutcome::Solved(SolveResult::failed("route is infeasible", Vec::new())),
	);
	let workflow = fixture.workflow();
	let follow_up = Arc::new(RecordingFollowUp::default());

	let run = {
		let workflow = workflow.clone();
		let follow_up = follow_up.clone();
		tokio::spawn(async move { workflow.run(&ids(&["O1"]), date(), follow_up.as_ref()).await })
	};
	for _ in 0..2 {
		let id = single_pending(&fixture.gateway).await;
		fixture.gateway.complete(&id).await;
	}

	match run.await.unwrap().unwrap() {
		WorkflowOutcome::Halted {
			schedule_id,
			processed,
			reason,
			..
		} => {
			assert_eq!(schedule_id, ScheduleId::from(SNAPSHOT));
			assert_eq!(processed, vec![ScheduleId::from(CURRENT)]);
			assert!(matches!(reason, CoordinatorError::SolveFailed(_)));
		}
		other => panic!("unexpected outcome {:?}", other),
	}
	assert!(follow_up.calls.lock().await.is_empty());

	// The date is free again.
	let again = workflow
		.run(&ids(&["O9"]), date(), follow_up.as_ref())
		.await
		.unwrap();
	assert!(again.is_completed());
}

#[tokio::test]
async fn test_unassign_then_reassign_restores_membership() {
	let fixture = Fixture::current_and_snapshot();
	let coordinator = fixture.coordinator();
	let before = fixture.schedule(SNAPSHOT).await.membership();

	let unassign = RoutingCommand::new(OperationKind::UnassignOrders, ScheduleId::from(SNAPSHOT))
		.with_orders(ids(&["O3"]))
		.with_routes(vec![RouteId::from("s-r2")]);
	let id = coordinator.start(unassign).await.unwrap();
	fixture.gateway.complete(&id).await;
	coordinator.wait_for(&id).await.unwrap().into_result().unwrap();
	assert!(!fixture.schedule(SNAPSHOT).await.is_assigned(&OrderId::from("O3")));

	let assign = RoutingCommand::new(OperationKind::AssignOrders, ScheduleId::from(SNAPSHOT))
		.with_orders(ids(&["O3"]))
		.with_routes(vec![RouteId::from("s-r2")]);
	let id = coordinator.start(assign).await.unwrap();
	fixture.gateway.complete(&id).await;
	let report = coordinator.wait_for(&id).await.unwrap();
	assert_eq!(report.outcome, OperationOutcome::Succeeded);

	assert_eq!(fixture.schedule(SNAPSHOT).await.membership(), before);
}

#[tokio::test]
async fn test_build_without_orders_never_reaches_the_solver() {
	let mut fixture = Fixture::current_and_snapshot();
	let coordinator = fixture.coordinator();

	let command = RoutingCommand::new(OperationKind::BuildRoutes, ScheduleId::from(CURRENT))
		.with_routes(vec![RouteId::from("c-r1")]);
	match coordinator.start(command).await {
		Err(CoordinatorError::ValidationFailed(report)) => {
			assert_eq!(report.invalid.len(), 1);
			assert_eq!(report.invalid[0].reason, InvalidReason::NoOrders);
		}
		other => panic!("unexpected result {:?}", other),
	}
	assert_eq!(fixture.gateway.started_count().await, 0);
	assert_eq!(
		outcome_keys(&fixture.drain()),
		vec![MessageKey::ValidationFailed(OperationKind::BuildRoutes)]
	);
}

#[tokio::test]
async fn test_cancelled_unassign_reports_once_and_changes_nothing() {
	let mut fixture = Fixture::current_and_snapshot();
	let before = fixture.schedule(CURRENT).await;
	let workflow = fixture.workflow();
	let follow_up = Arc::new(RecordingFollowUp::default());

	let run = {
		let follow_up = follow_up.clone();
		tokio::spawn(async move { workflow.run(&ids(&["O1"]), date(), follow_up.as_ref()).await })
	};
	let id = single_pending(&fixture.gateway).await;
	assert!(fixture.gateway.cancel(&id).await);

	match run.await.unwrap().unwrap() {
		WorkflowOutcome::Halted {
			failed_at, reason, ..
		} => {
			assert_eq!(failed_at, 0);
			assert!(matches!(reason, CoordinatorError::SolveCancelled(_)));
		}
		other => panic!("unexpected outcome {:?}", other),
	}

	let events = fixture.drain();
	let cancelled: Vec<_> = events
		.iter()
		.filter_map(|event| match event {
			RoutingEvent::Outcome(n)
				if n.key == MessageKey::OperationCancelled(OperationKind::UnassignOrders) =>
			{
				Some(n)
			}
			_ => None,
		})
		.collect();
	assert_eq!(cancelled.len(), 1);
	assert_eq!(cancelled[0].planned_date, Some(date()));
	let refreshed = events
		.iter()
		.filter(|event| matches!(event, RoutingEvent::ScheduleRefreshed { .. }))
		.count();
	assert_eq!(refreshed, 1);

	assert_eq!(fixture.schedule(CURRENT).await.membership(), before.membership());
	assert_eq!(fixture.gateway.started_count().await, 1);
	assert!(follow_up.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_empty_plan_runs_follow_up_directly() {
	let fixture = Fixture::current_and_snapshot();
	let follow_up = RecordingFollowUp::default();

	let outcome = fixture
		.workflow()
		.run(&ids(&["O9"]), date(), &follow_up)
		.await
		.unwrap();

	assert!(outcome.is_completed());
	assert_eq!(fixture.gateway.started_count().await, 0);
	assert_eq!(follow_up.calls.lock().await.as_slice(), &[(ids(&["O9"]), date())]);
}

#[tokio::test]
async fn test_second_workflow_on_same_date_is_refused() {
	let fixture = Fixture::current_and_snapshot();
	let workflow = fixture.workflow();
	let follow_up = Arc::new(RecordingFollowUp::default());

	let run = {
		let workflow = workflow.clone();
		let follow_up = follow_up.clone();
		tokio::spawn(async move { workflow.run(&ids(&["O1"]), date(), follow_up.as_ref()).await })
	};
	let id = single_pending(&fixture.gateway).await;

	let second = workflow
		.run(&ids(&["O2"]), date(), follow_up.as_ref())
		.await;
	assert!(matches!(second, Err(CoordinatorError::DateBusy(d)) if d == date()));

	fixture.gateway.complete(&id).await;
	let id = single_pending(&fixture.gateway).await;
	fixture.gateway.complete(&id).await;
	assert!(run.await.unwrap().unwrap().is_completed());

	let again = workflow
		.run(&ids(&["O9"]), date(), follow_up.as_ref())
		.await
		.unwrap();
	assert!(again.is_completed());
}
