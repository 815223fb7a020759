//! Contract with the external solving service.
//!
//! The solver runs operations asynchronously: [`SolverGateway::start`]
//! returns an id immediately and the result arrives later as a
//! [`GatewayEvent::Completed`] on the broadcast channel handed out by
//! [`SolverGateway::subscribe`]. Every id completes at most once, and
//! completions of different ids may arrive in any order.

use async_trait::async_trait;
use chrono::NaiveDate;
use routing_types::{
	ObjectRef, OperationId, OperationInfo, OperationKind, Order, Route, Schedule, SolveOptions,
	SolveRequest, SolveResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Errors surfaced by the solving service instead of a result.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum GatewayError {
	/// The solver rejected some input objects.
	#[error("Routing validation error: {message}")]
	Validation {
		message: String,
		invalid: Vec<ObjectRef>,
	},
	/// Credentials were refused by the service.
	#[error("Authentication error: {0}")]
	Authentication(String),
	/// The service could not be reached or dropped the connection.
	#[error("Communication error: {0}")]
	Communication(String),
	/// Anything else; not recoverable by the orchestrator.
	#[error("Internal solver error: {0}")]
	Internal(String),
}

impl GatewayError {
	/// Whether the error means the service is unavailable rather than the
	/// request being wrong.
	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Authentication(_) | Self::Communication(_))
	}
}

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SolveOutcome {
	Solved(SolveResult),
	Error(GatewayError),
	Cancelled,
}

/// Notifications emitted by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayEvent {
	Started {
		id: OperationId,
	},
	Completed {
		id: OperationId,
		outcome: SolveOutcome,
	},
}

/// Trait defining the interface of the external solving service.
///
/// Implementations must emit exactly one `Completed` event per started
/// operation, including cancelled ones.
#[async_trait]
pub trait SolverGateway: Send + Sync {
	/// Starts an asynchronous solve and returns its id.
	async fn start(&self, request: SolveRequest) -> Result<OperationId, GatewayError>;

	/// Subscribes to start/completion events. Events published before the
	/// subscription are not replayed.
	fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;

	/// Returns what the gateway knows about an in-flight operation.
	async fn operation_info(&self, id: &OperationId) -> Option<OperationInfo>;

	/// Lists in-flight operations targeting schedules of the given date.
	async fn operations_for_date(&self, date: NaiveDate) -> Vec<OperationInfo>;

	/// Requests cancellation. Returns true if the request was accepted; the
	/// completion still arrives later, tagged as cancelled.
	async fn cancel(&self, id: &OperationId) -> bool;
}

/// Typed front of a [`SolverGateway`] with one entry point per kind.
#[derive(Clone)]
pub struct GatewayService {
	backend: Arc<dyn SolverGateway>,
}

impl GatewayService {
	pub fn new(backend: Arc<dyn SolverGateway>) -> Self {
		Self { backend }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
		self.backend.subscribe()
	}

	/// Issues a request of any kind.
	pub async fn start(&self, request: SolveRequest) -> Result<OperationId, GatewayError> {
		let kind = request.kind;
		let schedule_id = request.schedule_id.clone();
		match self.backend.start(request).await {
			Ok(id) => {
				info!("Started {} operation {} on schedule {}", kind, id, schedule_id);
				Ok(id)
			}
			Err(e) => {
				warn!(
					"Solver refused {} operation on schedule {}: {}",
					kind, schedule_id, e
				);
				Err(e)
			}
		}
	}

	pub async fn build_routes(
		&self,
		schedule: &Schedule,
		orders: Vec<Order>,
		routes: Vec<Route>,
		options: SolveOptions,
	) -> Result<OperationId, GatewayError> {
		self.start(request(schedule, OperationKind::BuildRoutes, orders, routes, options))
			.await
	}

	pub async fn assign_orders(
		&self,
		schedule: &Schedule,
		orders: Vec<Order>,
		routes: Vec<Route>,
		options: SolveOptions,
	) -> Result<OperationId, GatewayError> {
		self.start(request(schedule, OperationKind::AssignOrders, orders, routes, options))
			.await
	}

	pub async fn unassign_orders(
		&self,
		schedule: &Schedule,
		orders: Vec<Order>,
		routes: Vec<Route>,
	) -> Result<OperationId, GatewayError> {
		self.start(request(
			schedule,
			OperationKind::UnassignOrders,
			orders,
			routes,
			SolveOptions::default(),
		))
		.await
	}

	pub async fn sequence_routes(
		&self,
		schedule: &Schedule,
		orders: Vec<Order>,
		routes: Vec<Route>,
		options: SolveOptions,
	) -> Result<OperationId, GatewayError> {
		self.start(request(schedule, OperationKind::SequenceRoutes, orders, routes, options))
			.await
	}

	pub async fn generate_shapes(
		&self,
		schedule: &Schedule,
		routes: Vec<Route>,
	) -> Result<OperationId, GatewayError> {
		self.start(request(
			schedule,
			OperationKind::GenerateShapes,
			Vec::new(),
			routes,
			SolveOptions::default(),
		))
		.await
	}

	pub async fn operation_info(&self, id: &OperationId) -> Option<OperationInfo> {
		self.backend.operation_info(id).await
	}

	pub async fn operations_for_date(&self, date: NaiveDate) -> Vec<OperationInfo> {
		self.backend.operations_for_date(date).await
	}

	pub async fn cancel(&self, id: &OperationId) -> bool {
		let accepted = self.backend.cancel(id).await;
		debug!("Cancellation of operation {} accepted: {}", id, accepted);
		accepted
	}
}

fn request(
	schedule: &Schedule,
	kind: OperationKind,
	orders: Vec<Order>,
	routes: Vec<Route>,
	options: SolveOptions,
) -> SolveRequest {
	SolveRequest {
		schedule_id: schedule.id.clone(),
		planned_date: schedule.planned_date,
		kind,
		orders,
		routes,
		options,
	}
}
