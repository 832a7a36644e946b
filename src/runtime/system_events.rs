use crate::message::Blob;
#[cfg(feature = "inproc")]
use crate::message::Msg;
use crate::runtime::mailbox::MailboxSender;
#[cfg(feature = "inproc")]
use crate::runtime::OneShotSender;

use std::fmt;

/// Identifies the kind of actor task behind a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorType {
  /// The actor managing a socket's state and children.
  SocketCore,
  /// The command loop of a TCP or IPC listener.
  Listener,
  /// The accept loop feeding a listener.
  AcceptLoop,
  /// The per-connection session actor.
  Session,
  /// The protocol engine driving one connection's stream.
  Engine,
  /// The task establishing (and re-establishing) an outgoing connection.
  Connecter,
  /// The task reading one inbound pipe into pattern logic.
  PipeReader,
}

/// Events broadcast on the context's bus for coordination and lifecycle
/// management. Together with the context `WaitGroup` these realize the
/// ownership tree's termination protocol: `ActorStarted` registers a child
/// with its owner, `ActorStopping` is the child's term-ack, and
/// `SocketClosing` / `ContextTerminating` are the owner-to-child term
/// requests.
#[derive(Clone)]
pub enum SystemEvent {
  /// The whole context is terminating; every actor shuts down.
  ContextTerminating,

  /// The socket identified by `socket_id` is closing; its child actors
  /// (listeners, sessions, connecters) react by shutting down.
  SocketClosing { socket_id: usize },

  /// Published by the spawner right after an actor task is launched.
  ActorStarted {
    handle_id: usize,
    actor_type: ActorType,
    parent_id: Option<usize>,
  },

  /// Published by an actor task just before it exits.
  ActorStopping {
    handle_id: usize,
    actor_type: ActorType,
    endpoint_uri: Option<String>,
    error_msg: Option<String>,
  },

  /// A listener's accept loop or a connecter established a connection and
  /// its session actor is running. The owning `SocketCore` wires pipes in
  /// response.
  NewConnectionEstablished {
    parent_core_id: usize,
    /// Concrete endpoint of the established connection (peer address).
    endpoint_uri: String,
    /// The endpoint the user originally asked for; reconnects target this.
    target_endpoint_uri: String,
    session_mailbox: MailboxSender,
    session_handle_id: usize,
    /// True when this side initiated the connection (drives reconnect).
    is_outbound: bool,
  },

  /// A session's engine finished its handshake and learned the peer's
  /// identity. ROUTER sockets update their identity maps on this.
  PeerIdentityEstablished {
    parent_core_id: usize,
    /// The core's read-pipe ID for this connection.
    core_pipe_read_id: usize,
    peer_identity: Option<Blob>,
  },

  /// A connecter gave up on an endpoint (non-recoverable error or retries
  /// exhausted).
  ConnectionAttemptFailed {
    parent_core_id: usize,
    target_endpoint_uri: String,
    error_msg: String,
  },

  /// An inproc connector asks the binder of `target_inproc_name` to accept a
  /// connection. The binder adopts the offered pipe ends and replies with
  /// its own identity on success.
  #[cfg(feature = "inproc")]
  InprocBindingRequest {
    target_inproc_name: String,
    connector_uri: String,
    /// Sender the binder uses to write to the connector.
    binder_pipe_tx_to_connector: async_channel::Sender<Msg>,
    /// Receiver the binder reads connector frames from.
    binder_pipe_rx_from_connector: async_channel::Receiver<Msg>,
    connector_pipe_write_id: usize,
    connector_pipe_read_id: usize,
    connector_identity: Option<Blob>,
    reply_tx: OneShotSender,
  },

  /// An inproc connector closed its side; the binder cleans up the matching
  /// pipe ends.
  #[cfg(feature = "inproc")]
  InprocPipePeerClosed {
    target_inproc_name: String,
    closed_by_connector_pipe_read_id: usize,
  },
}

impl fmt::Debug for SystemEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SystemEvent::ContextTerminating => write!(f, "ContextTerminating"),
      SystemEvent::SocketClosing { socket_id } => {
        f.debug_struct("SocketClosing").field("socket_id", socket_id).finish()
      }
      SystemEvent::ActorStarted {
        handle_id,
        actor_type,
        parent_id,
      } => f
        .debug_struct("ActorStarted")
        .field("handle_id", handle_id)
        .field("actor_type", actor_type)
        .field("parent_id", parent_id)
        .finish(),
      SystemEvent::ActorStopping {
        handle_id,
        actor_type,
        endpoint_uri,
        error_msg,
      } => f
        .debug_struct("ActorStopping")
        .field("handle_id", handle_id)
        .field("actor_type", actor_type)
        .field("endpoint_uri", endpoint_uri)
        .field("error_msg", error_msg)
        .finish(),
      SystemEvent::NewConnectionEstablished {
        parent_core_id,
        endpoint_uri,
        target_endpoint_uri,
        is_outbound,
        ..
      } => f
        .debug_struct("NewConnectionEstablished")
        .field("parent_core_id", parent_core_id)
        .field("endpoint_uri", endpoint_uri)
        .field("target_endpoint_uri", target_endpoint_uri)
        .field("is_outbound", is_outbound)
        .finish_non_exhaustive(),
      SystemEvent::PeerIdentityEstablished {
        parent_core_id,
        core_pipe_read_id,
        peer_identity,
      } => f
        .debug_struct("PeerIdentityEstablished")
        .field("parent_core_id", parent_core_id)
        .field("core_pipe_read_id", core_pipe_read_id)
        .field("peer_identity", peer_identity)
        .finish(),
      SystemEvent::ConnectionAttemptFailed {
        parent_core_id,
        target_endpoint_uri,
        error_msg,
      } => f
        .debug_struct("ConnectionAttemptFailed")
        .field("parent_core_id", parent_core_id)
        .field("target_endpoint_uri", target_endpoint_uri)
        .field("error_msg", error_msg)
        .finish(),
      #[cfg(feature = "inproc")]
      SystemEvent::InprocBindingRequest {
        target_inproc_name,
        connector_uri,
        ..
      } => f
        .debug_struct("InprocBindingRequest")
        .field("target_inproc_name", target_inproc_name)
        .field("connector_uri", connector_uri)
        .finish_non_exhaustive(),
      #[cfg(feature = "inproc")]
      SystemEvent::InprocPipePeerClosed {
        target_inproc_name,
        closed_by_connector_pipe_read_id,
      } => f
        .debug_struct("InprocPipePeerClosed")
        .field("target_inproc_name", target_inproc_name)
        .field("closed_by_connector_pipe_read_id", closed_by_connector_pipe_read_id)
        .finish(),
    }
  }
}
