use crate::error::ZmqError;
use crate::message::{Blob, Msg};

use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Messages exchanged between actors (socket cores, sessions, engines,
/// listeners, connecters). All cross-task control flows through these; no
/// actor mutates another's state directly.
#[derive(Debug)]
pub enum Command {
  // --- User requests (API handle -> SocketCore) ---
  UserBind {
    endpoint: String,
    reply_tx: oneshot::Sender<Result<(), ZmqError>>,
  },
  UserConnect {
    endpoint: String,
    reply_tx: oneshot::Sender<Result<(), ZmqError>>,
  },
  UserDisconnect {
    endpoint: String,
    reply_tx: oneshot::Sender<Result<(), ZmqError>>,
  },
  UserUnbind {
    endpoint: String,
    reply_tx: oneshot::Sender<Result<(), ZmqError>>,
  },
  UserSetOpt {
    option: i32,
    value: Vec<u8>,
    reply_tx: oneshot::Sender<Result<(), ZmqError>>,
  },
  UserGetOpt {
    option: i32,
    reply_tx: oneshot::Sender<Result<Vec<u8>, ZmqError>>,
  },
  UserClose {
    reply_tx: oneshot::Sender<Result<(), ZmqError>>,
  },

  // --- Lifecycle ---
  /// Universal signal to gracefully shut down an actor task.
  Stop,

  // --- Session <-> Engine interaction ---
  /// Listener/Connecter -> Session: hands over the engine driving the wire.
  Attach {
    engine_mailbox: super::MailboxSender,
    engine_task_handle: Option<JoinHandle<()>>,
  },
  /// SocketCore -> Session: provides the session's pipe channel ends.
  AttachPipe {
    rx_from_core: AsyncReceiver<Msg>,
    tx_to_core: AsyncSender<Msg>,
    /// ID the session reads on (core writes to this pipe).
    pipe_read_id: usize,
    /// ID the session writes on (core reads from this pipe).
    pipe_write_id: usize,
  },
  /// Session -> Engine: a frame to put on the wire.
  SessionPushCmd { msg: Msg },
  /// Engine -> Session: a frame decoded off the wire.
  EnginePushCmd { msg: Msg },
  /// Engine -> Session: the connection handshake completed.
  EngineReady { peer_identity: Option<Blob> },
  /// Engine -> Session: fatal transport or protocol error.
  EngineError { error: ZmqError },
  /// Engine -> Session: clean stop.
  EngineStopped,

  // --- Child lifecycle reports (transport actors -> SocketCore) ---
  ListenerStopped { handle: usize, endpoint_uri: String },
  ConnecterStopped { handle: usize, endpoint_uri: String },

  // --- Pipe events (PipeReader task -> pattern logic / SocketCore) ---
  /// A frame arrived from a peer's pipe.
  PipeMessageReceived { pipe_id: usize, msg: Msg },
  /// The peer closed its sending end; buffered frames were all delivered.
  PipeClosedByPeer { pipe_id: usize },
}

impl Command {
  pub fn variant_name(&self) -> &'static str {
    match self {
      Command::UserBind { .. } => "UserBind",
      Command::UserConnect { .. } => "UserConnect",
      Command::UserDisconnect { .. } => "UserDisconnect",
      Command::UserUnbind { .. } => "UserUnbind",
      Command::UserSetOpt { .. } => "UserSetOpt",
      Command::UserGetOpt { .. } => "UserGetOpt",
      Command::UserClose { .. } => "UserClose",
      Command::Stop => "Stop",
      Command::Attach { .. } => "Attach",
      Command::AttachPipe { .. } => "AttachPipe",
      Command::SessionPushCmd { .. } => "SessionPushCmd",
      Command::EnginePushCmd { .. } => "EnginePushCmd",
      Command::EngineReady { .. } => "EngineReady",
      Command::EngineError { .. } => "EngineError",
      Command::EngineStopped => "EngineStopped",
      Command::ListenerStopped { .. } => "ListenerStopped",
      Command::ConnecterStopped { .. } => "ConnecterStopped",
      Command::PipeMessageReceived { .. } => "PipeMessageReceived",
      Command::PipeClosedByPeer { .. } => "PipeClosedByPeer",
    }
  }
}
