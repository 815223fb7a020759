//! Notification bus between the orchestrator and whoever renders outcomes.
//!
//! The bus is created by the caller and handed to coordinators and
//! workflows at construction; there is no process-wide instance.

use routing_types::RoutingEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcasts [`RoutingEvent`]s to every subscriber.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct NotificationBus {
	sender: broadcast::Sender<RoutingEvent>,
}

impl NotificationBus {
	/// Creates a bus buffering up to `capacity` events per subscriber before
	/// the oldest are dropped.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Each subscriber receives every event published after it subscribed.
	pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Having no subscriber is not an error: outcomes
	/// nobody listens to are simply dropped.
	pub fn publish(&self, event: RoutingEvent) {
		trace!("Publishing {:?}", event);
		self.sender.send(event).ok();
	}
}
