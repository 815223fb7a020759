//! Shared domain types for the routing orchestrator.
//!
//! Orders, routes and schedules form the project model the orchestrator
//! references. Operation, violation and event types describe the contract
//! between the orchestrator, the external solving service and the callers
//! that observe outcomes.

pub mod events;
pub mod operation;
pub mod order;
pub mod schedule;
pub mod violation;

pub use events::*;
pub use operation::*;
pub use order::*;
pub use schedule::*;
pub use violation::*;
