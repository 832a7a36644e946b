use super::system_events::SystemEvent;
use tokio::sync::broadcast::{self, error::SendError, Receiver, Sender};

const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// A self-contained event bus for broadcasting system-wide events,
/// built on `tokio::sync::broadcast`.
#[derive(Debug, Clone)]
pub struct EventBus {
  sender: Sender<SystemEvent>,
}

impl EventBus {
  /// Creates a new EventBus with default capacity.
  pub fn new() -> Self {
    let (sender, _) = broadcast::channel(DEFAULT_EVENT_BUS_CAPACITY);
    Self { sender }
  }

  /// Publishes an event onto the bus.
  ///
  /// Returns the number of active receivers, or an error if there are none.
  pub fn publish(&self, event: SystemEvent) -> Result<usize, SendError<SystemEvent>> {
    tracing::trace!(event = ?event, "publishing system event");
    self.sender.send(event)
  }

  /// Creates a new receiver subscribed to events published after this call.
  /// A lagging receiver may miss events (see `tokio::sync::broadcast`).
  pub fn subscribe(&self) -> Receiver<SystemEvent> {
    self.sender.subscribe()
  }

  /// Returns the number of active subscribers.
  pub fn subscriber_count(&self) -> usize {
    self.sender.receiver_count()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
