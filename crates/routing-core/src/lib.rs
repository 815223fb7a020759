//! Orchestration of asynchronous routing operations.
//!
//! Solve requests are issued through a [`RoutingOperationCoordinator`],
//! which tracks the operations it started and applies their results to the
//! [`Project`] once the solver confirms them. Deleting or moving orders
//! first goes through a [`MultiScheduleUnassignWorkflow`] that clears them
//! from every schedule of their date, one schedule at a time.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod lifecycle;
pub mod project;
pub mod session;
pub mod validation;
pub mod violations;
pub mod workflow;

pub use coordinator::{
	CompletionReport, OperationOutcome, RoutingCommand, RoutingOperationCoordinator,
	SCHEDULES_NAMESPACE,
};
pub use engine::{RoutingEngine, RoutingEngineBuilder};
pub use error::CoordinatorError;
pub use event_bus::NotificationBus;
pub use lifecycle::{EngineState, LifecycleManager};
pub use project::{CommitSummary, Project};
pub use session::{SessionState, SolveSession};
pub use validation::{InvalidObject, ValidationPolicy, ValidationReport};
pub use violations::ViolationReporter;
pub use workflow::{
	DateLocks, DeleteOrders, FollowUp, LockReport, MoveOrders, MultiScheduleUnassignWorkflow,
	UnassignPlan, UnassignScheduleInfo, WorkflowOutcome,
};
