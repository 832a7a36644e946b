use crate::error::ZmqError;
use crate::runtime::{ActorType, EventBus, MailboxSender, SystemEvent, WaitGroup};
use crate::socket::{Socket, SocketType};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

/// Context option: number of I/O threads (ZMQ_IO_THREADS). The Tokio runtime
/// supplies the actual threads; the value is validated and retained.
pub const IO_THREADS: i32 = 1;
/// Context option: maximum number of live sockets (ZMQ_MAX_SOCKETS).
pub const MAX_SOCKETS: i32 = 2;

pub const IO_THREADS_DFLT: i32 = 1;
pub const MAX_SOCKETS_DFLT: i32 = 1024;

/// Upper bound on IO_THREADS; larger requests are rejected (EMTHREAD).
const IO_THREADS_MAX: i32 = 64;

/// How long `term` waits for stragglers before reporting them.
const TERM_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Information stored in the inproc registry for a bound endpoint.
#[derive(Debug, Clone)]
#[cfg(feature = "inproc")]
pub(crate) struct InprocBinding {
  /// Handle of the `SocketCore` bound to this inproc name; that core filters
  /// `InprocBindingRequest` events by name.
  pub(crate) binder_core_id: usize,
}

/// State shared by all `Context` handles. The context is the root of the
/// ownership tree: every actor below it registers on start and acks on stop.
#[derive(Debug)]
pub(crate) struct ContextInner {
  /// Source for unique handle IDs (sockets, pipes, child actors).
  pub(crate) next_handle: Arc<AtomicUsize>,
  /// Live socket command mailboxes, keyed by socket handle.
  pub(crate) sockets: parking_lot::RwLock<HashMap<usize, MailboxSender>>,
  /// Registry of inproc bindings, keyed by name.
  #[cfg(feature = "inproc")]
  pub(crate) inproc_registry: parking_lot::RwLock<HashMap<String, InprocBinding>>,

  event_bus: Arc<EventBus>,
  /// Tracks every live actor spawned under this context; `term` waits on it.
  actor_wait_group: WaitGroup,
  pub(crate) shutdown_initiated: AtomicBool,

  io_threads: AtomicI32,
  max_sockets: AtomicI32,
}

impl ContextInner {
  fn new() -> Self {
    Self {
      next_handle: Arc::new(AtomicUsize::new(1)),
      sockets: parking_lot::RwLock::new(HashMap::new()),
      #[cfg(feature = "inproc")]
      inproc_registry: parking_lot::RwLock::new(HashMap::new()),
      event_bus: Arc::new(EventBus::new()),
      actor_wait_group: WaitGroup::new(),
      shutdown_initiated: AtomicBool::new(false),
      io_threads: AtomicI32::new(IO_THREADS_DFLT),
      max_sockets: AtomicI32::new(MAX_SOCKETS_DFLT),
    }
  }

  pub(crate) fn next_handle(&self) -> usize {
    self.next_handle.fetch_add(1, AtomicOrdering::Relaxed)
  }

  pub(crate) fn is_terminating(&self) -> bool {
    self.shutdown_initiated.load(AtomicOrdering::Acquire)
  }

  pub(crate) fn register_socket(&self, handle: usize, command_sender: MailboxSender) {
    self.sockets.write().insert(handle, command_sender);
    tracing::debug!(socket_handle = handle, "socket command mailbox registered");
  }

  pub(crate) fn unregister_socket(&self, handle: usize) {
    if self.sockets.write().remove(&handle).is_none() {
      tracing::warn!(socket_handle = handle, "attempted to unregister unknown socket handle");
    }
  }

  /// Initiates shutdown of everything below the context by publishing
  /// `ContextTerminating`. Actors react and tear themselves down.
  pub(crate) fn shutdown(&self) {
    if self
      .shutdown_initiated
      .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_ok()
    {
      tracing::info!("context shutdown initiated");
      if let Err(e) = self.event_bus.publish(SystemEvent::ContextTerminating) {
        tracing::debug!(
          receivers = self.event_bus.subscriber_count(),
          "no receivers for ContextTerminating: {}",
          e
        );
      }
    }
  }

  /// Waits until every actor under this context has stopped.
  pub(crate) async fn wait_for_termination(&self) {
    let initial = self.actor_wait_group.get_count();
    tracing::debug!(count = initial, "context term waiting for actors");
    match tokio::time::timeout(TERM_WAIT_TIMEOUT, self.actor_wait_group.wait()).await {
      Ok(()) => {
        tracing::info!("context termination complete");
      }
      Err(_) => {
        tracing::error!(
          remaining = self.actor_wait_group.get_count(),
          timeout = ?TERM_WAIT_TIMEOUT,
          "context termination timed out; some actors did not stop"
        );
      }
    }
  }

  #[cfg(feature = "inproc")]
  pub(crate) fn register_inproc(&self, name: String, binder_core_id: usize) -> Result<(), ZmqError> {
    let mut registry = self.inproc_registry.write();
    if registry.contains_key(&name) {
      Err(ZmqError::AddressInUse(format!("inproc://{}", name)))
    } else {
      registry.insert(name, InprocBinding { binder_core_id });
      Ok(())
    }
  }

  #[cfg(feature = "inproc")]
  pub(crate) fn unregister_inproc(&self, name: &str) {
    self.inproc_registry.write().remove(name);
  }

  #[cfg(feature = "inproc")]
  pub(crate) fn lookup_inproc(&self, name: &str) -> Option<InprocBinding> {
    self.inproc_registry.read().get(name).cloned()
  }

  /// Command mailbox of a registered socket, if it is still live.
  pub(crate) fn get_socket_command_sender(&self, handle: usize) -> Option<MailboxSender> {
    self.sockets.read().get(&handle).cloned()
  }

  pub(crate) fn event_bus(&self) -> Arc<EventBus> {
    self.event_bus.clone()
  }
}

/// A handle to an azmq context, the factory and root owner of sockets.
/// Handles are cloneable (`Arc`-based); the last clone dropping does not
/// terminate the context, `term` does.
#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  /// Creates a new, independent context.
  pub fn new() -> Result<Self, ZmqError> {
    Ok(Self {
      inner: Arc::new(ContextInner::new()),
    })
  }

  /// Sets a context option (`IO_THREADS`, `MAX_SOCKETS`). Must be called
  /// before the sockets the option should govern are created.
  pub fn set_option(&self, option: i32, value: i32) -> Result<(), ZmqError> {
    match option {
      IO_THREADS => {
        if value < 1 {
          return Err(ZmqError::BadOptionValue(option));
        }
        if value > IO_THREADS_MAX {
          return Err(ZmqError::TooManyIoThreads(value));
        }
        self.inner.io_threads.store(value, AtomicOrdering::Relaxed);
        Ok(())
      }
      MAX_SOCKETS => {
        if value < 1 {
          return Err(ZmqError::BadOptionValue(option));
        }
        self.inner.max_sockets.store(value, AtomicOrdering::Relaxed);
        Ok(())
      }
      _ => Err(ZmqError::UnknownOption(option)),
    }
  }

  /// Reads a context option back.
  pub fn get_option(&self, option: i32) -> Result<i32, ZmqError> {
    match option {
      IO_THREADS => Ok(self.inner.io_threads.load(AtomicOrdering::Relaxed)),
      MAX_SOCKETS => Ok(self.inner.max_sockets.load(AtomicOrdering::Relaxed)),
      _ => Err(ZmqError::UnknownOption(option)),
    }
  }

  /// Creates a socket of the specified type associated with this context.
  pub fn socket(&self, socket_type: SocketType) -> Result<Socket, ZmqError> {
    if self.inner.is_terminating() {
      return Err(ZmqError::Terminated);
    }
    let live = self.inner.sockets.read().len();
    if live >= self.inner.max_sockets.load(AtomicOrdering::Relaxed) as usize {
      return Err(ZmqError::WouldBlock);
    }

    let handle = self.inner.next_handle();
    tracing::debug!(socket_type = ?socket_type, handle = handle, "creating socket");

    let (socket_logic, command_sender) = crate::socket::create_socket_actor(handle, self.clone(), socket_type)?;
    self.inner.register_socket(handle, command_sender.clone());
    Ok(Socket::new(socket_logic, command_sender))
  }

  /// Initiates background shutdown of all sockets without waiting.
  pub fn shutdown(&self) {
    self.inner.shutdown();
  }

  /// Shuts down all sockets and waits for their clean termination.
  /// Calling `term` twice is a no-op.
  pub async fn term(&self) -> Result<(), ZmqError> {
    self.inner.shutdown();
    self.inner.wait_for_termination().await;
    Ok(())
  }

  pub(crate) fn inner(&self) -> &Arc<ContextInner> {
    &self.inner
  }

  pub(crate) fn event_bus(&self) -> Arc<EventBus> {
    self.inner.event_bus()
  }

  /// Publishes `ActorStarted` and registers the actor with the context
  /// WaitGroup. Called by whoever spawns an actor task.
  pub(crate) fn publish_actor_started(&self, handle_id: usize, actor_type: ActorType, parent_id: Option<usize>) {
    let event = SystemEvent::ActorStarted {
      handle_id,
      actor_type,
      parent_id,
    };
    let _ = self.inner.event_bus().publish(event);
    self.inner.actor_wait_group.add(1);
  }

  /// Publishes `ActorStopping` and releases the actor's WaitGroup slot.
  /// Called by the actor task itself just before it exits; this is the
  /// actor's term-ack towards the context.
  pub(crate) fn publish_actor_stopping(
    &self,
    handle_id: usize,
    actor_type: ActorType,
    endpoint_uri: Option<String>,
    error: Option<ZmqError>,
  ) {
    let event = SystemEvent::ActorStopping {
      handle_id,
      actor_type,
      endpoint_uri,
      error_msg: error.map(|e| e.to_string()),
    };
    let _ = self.inner.event_bus().publish(event);
    // The decrement must happen even when nobody listens to the event.
    if self.inner.actor_wait_group.get_count() > 0 {
      self.inner.actor_wait_group.done();
    } else if !std::thread::panicking() {
      tracing::warn!(
        actor_handle = handle_id,
        ?actor_type,
        "ActorStopping with WaitGroup already at zero"
      );
    }
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context").finish_non_exhaustive()
  }
}

/// Creates a new library context. Main entry point for using azmq.
pub fn context() -> Result<Context, ZmqError> {
  Context::new()
}
