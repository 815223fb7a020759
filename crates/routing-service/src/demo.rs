//! Scripted planning session against the in-process solver.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use routing_config::ConfigLoader;
use routing_core::{Project, RoutingCommand, RoutingEngineBuilder, WorkflowOutcome};
use routing_types::{
	GeoPoint, OperationId, OperationKind, Order, OrderId, Route, RouteId, RoutingEvent, Schedule,
	ScheduleId, ScheduleType,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

const CURRENT: &str = "current";
const SAVED: &str = "saved-morning";

fn seed_project(date: NaiveDate) -> Project {
	let orders = (1..=6)
		.map(|i| {
			Order::new(format!("O{}", i), format!("Customer {}", i), date)
				.with_location(GeoPoint::new(52.35 + i as f64 * 0.01, 4.88 + i as f64 * 0.005))
		})
		.collect();

	let depot = GeoPoint::new(52.37, 4.90);
	let current = Schedule::new(CURRENT, date, ScheduleType::Current)
		.with_route(Route::new("R1", "North van").with_depot(depot))
		.with_route(Route::new("R2", "South van").with_depot(depot));

	let mut morning = Route::new("R1", "North van").with_depot(depot);
	morning.push_stop(OrderId::from("O1"));
	morning.push_stop(OrderId::from("O2"));
	let saved = Schedule::new(SAVED, date, ScheduleType::Version).with_route(morning);

	Project::new(orders, vec![current, saved])
}

async fn log_events(mut events: broadcast::Receiver<RoutingEvent>) {
	loop {
		match events.recv().await {
			Ok(RoutingEvent::Outcome(notification)) => match serde_json::to_string(&notification) {
				Ok(json) => info!("Notification: {}", json),
				Err(e) => warn!("Unprintable notification: {}", e),
			},
			Ok(RoutingEvent::OperationStarted {
				operation_id,
				schedule_id,
				kind,
			}) => info!("{} started on {} as {}", kind, schedule_id, operation_id),
			Ok(RoutingEvent::ScheduleRefreshed { schedule_id, .. }) => {
				info!("Schedule {} refreshed", schedule_id)
			}
			Err(RecvError::Lagged(skipped)) => warn!("Dropped {} notification(s)", skipped),
			Err(RecvError::Closed) => break,
		}
	}
}

async fn wait_for_refresh(
	events: &mut broadcast::Receiver<RoutingEvent>,
	id: OperationId,
) -> Result<()> {
	let wait = async {
		loop {
			match events.recv().await {
				Ok(RoutingEvent::ScheduleRefreshed {
					operation_id: Some(done),
					..
				}) if done == id => return Ok(()),
				Ok(_) | Err(RecvError::Lagged(_)) => continue,
				Err(RecvError::Closed) => bail!("Notification bus closed"),
			}
		}
	};
	tokio::time::timeout(Duration::from_secs(30), wait)
		.await
		.context("Timed out waiting for the solver")?
}

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
	let mut loader = ConfigLoader::new();
	if let Some(path) = &config_path {
		loader = loader.with_file(path);
	}
	let config = loader.load().await.context("Failed to load configuration")?;

	let date = NaiveDate::from_ymd_opt(2024, 1, 10).context("Invalid demo date")?;
	let engine = RoutingEngineBuilder::new()
		.with_config(config)
		.with_project(seed_project(date))
		.build()
		.await
		.context("Failed to build routing engine")?;

	let mut events = engine.subscribe();
	let printer = tokio::spawn(log_events(engine.subscribe()));
	engine.start().await.context("Failed to start routing engine")?;

	let all: Vec<OrderId> = (1..=6).map(|i| OrderId(format!("O{}", i))).collect();
	let build = RoutingCommand::new(OperationKind::BuildRoutes, ScheduleId::from(CURRENT))
		.with_orders(all)
		.with_routes(vec![RouteId::from("R1"), RouteId::from("R2")]);
	let id = engine
		.issue_routing_command(build)
		.await
		.context("Build routes was rejected")?;
	wait_for_refresh(&mut events, id).await?;

	let schedules = engine.project().schedules_on(date).await;
	info!("{} schedule(s) on {} before deleting", schedules.len(), date);

	let doomed = [OrderId::from("O1"), OrderId::from("O2")];
	match engine
		.delete_orders(&doomed, date)
		.await
		.context("Delete workflow failed")?
	{
		WorkflowOutcome::Completed { processed } => {
			info!("Deleted after unassigning from {:?}", processed)
		}
		WorkflowOutcome::Locked(report) => warn!("Nothing deleted, locked: {:?}", report.schedules),
		WorkflowOutcome::Halted {
			schedule_id,
			processed,
			skipped,
			reason,
			..
		} => warn!(
			"Stopped at {} ({}); done {:?}, never tried {:?}",
			schedule_id, reason, processed, skipped
		),
	}

	engine.shutdown().await.context("Failed to shut down")?;
	printer.abort();
	Ok(())
}
