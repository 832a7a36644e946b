//! Readiness multiplexing: the one-shot [`poll`] call and the long-running
//! [`Poller`] loop with handlers and tickless timers.

use crate::context::Context;
use crate::error::ZmqError;
use crate::runtime::SystemEvent;
use crate::socket::Socket;

use bitflags::bitflags;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio::time::Instant;

bitflags! {
  /// Readiness interest / result flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct PollEvents: u8 {
    /// A receive would make progress.
    const POLLIN = 0b01;
    /// A send would make progress.
    const POLLOUT = 0b10;
  }
}

/// One socket's entry in a [`poll`] call.
pub struct PollItem<'a> {
  socket: &'a Socket,
  events: PollEvents,
  revents: PollEvents,
}

impl<'a> PollItem<'a> {
  pub fn new(socket: &'a Socket, events: PollEvents) -> Self {
    Self {
      socket,
      events,
      revents: PollEvents::empty(),
    }
  }

  /// Events that were ready after the last `poll`.
  pub fn revents(&self) -> PollEvents {
    self.revents
  }

  pub fn is_readable(&self) -> bool {
    self.revents.contains(PollEvents::POLLIN)
  }

  pub fn is_writable(&self) -> bool {
    self.revents.contains(PollEvents::POLLOUT)
  }
}

/// Waits until at least one item is ready or the timeout expires
/// (`-1` = infinite, `0` = immediate probe). Returns the number of ready
/// items; their `revents` are filled in.
pub async fn poll(items: &mut [PollItem<'_>], timeout_ms: i64) -> Result<usize, ZmqError> {
  for item in items.iter_mut() {
    item.revents = PollEvents::empty();
  }
  if items.is_empty() {
    if timeout_ms > 0 {
      tokio::time::sleep(Duration::from_millis(timeout_ms as u64)).await;
    }
    return Ok(0);
  }

  let snapshot: Vec<(usize, Socket, PollEvents)> = items
    .iter()
    .enumerate()
    .map(|(i, item)| (i, item.socket.clone(), item.events))
    .collect();

  let first_ready = match timeout_ms {
    t if t < 0 => Some(wait_any(snapshot).await),
    0 => None,
    t => tokio::time::timeout(Duration::from_millis(t as u64), wait_any(snapshot))
      .await
      .ok(),
  };

  if let Some((index, result)) = first_ready {
    items[index].revents = result?;
  }

  // Sweep the remaining items with immediate probes so one call reports
  // everything currently ready.
  let mut ready_count = 0;
  for item in items.iter_mut() {
    if item.revents.is_empty() {
      item.revents = item.socket.poll(item.events, 0).await.unwrap_or_default();
    }
    if !item.revents.is_empty() {
      ready_count += 1;
    }
  }
  Ok(ready_count)
}

/// First of the snapshot's sockets to report readiness.
async fn wait_any(snapshot: Vec<(usize, Socket, PollEvents)>) -> (usize, Result<PollEvents, ZmqError>) {
  let futures: Vec<BoxFuture<'static, (usize, Result<PollEvents, ZmqError>)>> = snapshot
    .into_iter()
    .map(|(index, socket, events)| {
      let fut: BoxFuture<'static, _> = Box::pin(async move { (index, socket.poll(events, -1).await) });
      fut
    })
    .collect();
  futures::future::select_all(futures).await.0
}

/// Handler invoked by the [`Poller`] when a registered socket is ready.
pub type PollHandler = Box<dyn FnMut(Socket, PollEvents) -> BoxFuture<'static, ()> + Send>;
/// Handler invoked when a [`Poller`] timer fires.
pub type TimerHandler = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>;

struct PollerItem {
  socket: Socket,
  events: PollEvents,
  handler: PollHandler,
  error_strikes: u8,
}

struct TimerEntry {
  id: usize,
  interval: Duration,
  next_due: Instant,
  enabled: bool,
  handler: TimerHandler,
}

enum PollerCmd {
  Stop { done_tx: Option<oneshot::Sender<()>> },
}

/// Cooperative stop handle for a running [`Poller`].
#[derive(Clone)]
pub struct PollerHandle {
  control_tx: async_channel::Sender<PollerCmd>,
}

impl PollerHandle {
  /// Requests the loop to exit. With `wait` the call blocks until it has.
  pub async fn stop(&self, wait: bool) {
    if wait {
      let (done_tx, done_rx) = oneshot::channel();
      if self.control_tx.send(PollerCmd::Stop { done_tx: Some(done_tx) }).await.is_ok() {
        let _ = done_rx.await;
      }
    } else {
      let _ = self.control_tx.send(PollerCmd::Stop { done_tx: None }).await;
    }
  }
}

/// An event loop over registered sockets and timers.
///
/// Each iteration computes the tickless deadline (the nearest enabled timer),
/// waits for socket readiness, a timer, or a control command, and dispatches
/// the matching handler. The loop also exits when the context terminates, so
/// a device left running does not outlive its context. A socket whose
/// readiness errors twice in a row is removed from the set.
pub struct Poller {
  context: Context,
  items: Vec<PollerItem>,
  timers: Vec<TimerEntry>,
  next_timer_id: usize,
  control_tx: async_channel::Sender<PollerCmd>,
  control_rx: async_channel::Receiver<PollerCmd>,
}

impl Poller {
  pub fn new(context: &Context) -> Self {
    let (control_tx, control_rx) = async_channel::bounded(16);
    Self {
      context: context.clone(),
      items: Vec::new(),
      timers: Vec::new(),
      next_timer_id: 1,
      control_tx,
      control_rx,
    }
  }

  /// Registers a socket with an interest set and its readiness handler.
  pub fn add<F>(&mut self, socket: &Socket, events: PollEvents, handler: F)
  where
    F: FnMut(Socket, PollEvents) -> BoxFuture<'static, ()> + Send + 'static,
  {
    self.items.push(PollerItem {
      socket: socket.clone(),
      events,
      handler: Box::new(handler),
      error_strikes: 0,
    });
  }

  /// Registers a repeating timer; returns its ID for `cancel_timer`.
  pub fn add_timer<F>(&mut self, interval: Duration, handler: F) -> usize
  where
    F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
  {
    let id = self.next_timer_id;
    self.next_timer_id += 1;
    self.timers.push(TimerEntry {
      id,
      interval,
      next_due: Instant::now() + interval,
      enabled: true,
      handler: Box::new(handler),
    });
    id
  }

  pub fn cancel_timer(&mut self, id: usize) {
    if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
      timer.enabled = false;
    }
  }

  /// A handle for stopping the loop from elsewhere.
  pub fn handle(&self) -> PollerHandle {
    PollerHandle {
      control_tx: self.control_tx.clone(),
    }
  }

  /// Runs until stopped or until the context terminates.
  pub async fn run(mut self) -> Result<(), ZmqError> {
    let mut system_events = self.context.event_bus().subscribe();

    loop {
      let next_deadline = self
        .timers
        .iter()
        .filter(|t| t.enabled)
        .map(|t| t.next_due)
        .min();

      let snapshot: Vec<(usize, Socket, PollEvents)> = self
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| (i, item.socket.clone(), item.events))
        .collect();
      let have_items = !snapshot.is_empty();

      tokio::select! {
        biased;

        cmd = self.control_rx.recv() => {
          match cmd {
            Ok(PollerCmd::Stop { done_tx }) => {
              if let Some(done_tx) = done_tx {
                let _ = done_tx.send(());
              }
              return Ok(());
            }
            Err(_) => return Ok(()),
          }
        }

        event = system_events.recv() => {
          match event {
            Ok(SystemEvent::ContextTerminating) => return Ok(()),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
          }
        }

        _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
          self.fire_due_timers().await;
        }

        (index, result) = wait_any(snapshot), if have_items => {
          self.dispatch_readiness(index, result).await;
        }
      }
    }
  }

  async fn fire_due_timers(&mut self) {
    let now = Instant::now();
    for timer in &mut self.timers {
      if timer.enabled && timer.next_due <= now {
        (timer.handler)().await;
        // A handler may have cancelled its own timer; only reschedule the
        // still-enabled ones.
        if timer.enabled {
          timer.next_due = now + timer.interval;
        }
      }
    }
  }

  async fn dispatch_readiness(&mut self, index: usize, result: Result<PollEvents, ZmqError>) {
    let Some(item) = self.items.get_mut(index) else { return };
    match result {
      Ok(events) => {
        item.error_strikes = 0;
        let socket = item.socket.clone();
        (item.handler)(socket, events).await;
      }
      Err(e) => {
        item.error_strikes += 1;
        tracing::warn!(strikes = item.error_strikes, error = %e, "poller item readiness error");
        if item.error_strikes >= 2 {
          // Two consecutive failures: the socket is gone for our purposes.
          self.items.swap_remove(index);
        }
      }
    }
  }
}
