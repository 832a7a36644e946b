//! Socket types, options, the core actor, and the per-pattern logic.

pub(crate) mod core;
pub mod options;
pub(crate) mod patterns;
pub mod types;

pub mod dealer_socket;
pub mod pair_socket;
pub mod pub_socket;
pub mod pull_socket;
pub mod push_socket;
pub mod rep_socket;
pub mod req_socket;
pub mod router_socket;
pub mod sub_socket;
pub mod xpub_socket;
pub mod xsub_socket;

use crate::context::Context;
use crate::error::{ZmqError, ZmqResult};
use crate::message::{Blob, Msg};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::SocketCore;
use crate::socket::options::SocketOptions;

use async_trait::async_trait;
use std::sync::Arc;

/// Implements an API method by posting a command to the `SocketCore` mailbox
/// and awaiting the oneshot reply.
#[macro_export]
macro_rules! delegate_to_core {
  ($self:ident, $variant:ident, $($field:ident : $value:expr),+ $(,)?) => {{
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let cmd = $crate::runtime::Command::$variant { $($field : $value),+, reply_tx };
    $self
      .mailbox()
      .send(cmd)
      .await
      .map_err(|_| $self.core().closed_error())?;
    reply_rx.await.map_err(|_| $self.core().closed_error())?
  }};
  ($self:ident, $variant:ident $(,)?) => {{
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let cmd = $crate::runtime::Command::$variant { reply_tx };
    $self
      .mailbox()
      .send(cmd)
      .await
      .map_err(|_| $self.core().closed_error())?;
    reply_rx.await.map_err(|_| $self.core().closed_error())?
  }};
}

/// The internal behavior of one socket pattern. Every socket type implements
/// this trait around a shared `Arc<SocketCore>`; the public `Socket` handle
/// delegates to it.
#[async_trait]
pub(crate) trait ISocket: Send + Sync + 'static {
  /// The `SocketCore` backing this socket.
  fn core(&self) -> &Arc<SocketCore>;

  /// Command mailbox of the backing `SocketCore`.
  fn mailbox(&self) -> MailboxSender;

  // --- API surface mirrored by `types::Socket` ---
  async fn bind(&self, endpoint: &str) -> Result<(), ZmqError>;
  async fn connect(&self, endpoint: &str) -> Result<(), ZmqError>;
  async fn disconnect(&self, endpoint: &str) -> Result<(), ZmqError>;
  async fn unbind(&self, endpoint: &str) -> Result<(), ZmqError>;

  /// Sends one frame according to the pattern's rules. A frame with `MORE`
  /// set opens (or continues) a logical message; the message is routed when
  /// its final frame arrives.
  async fn send(&self, msg: Msg) -> Result<(), ZmqError>;

  /// Receives the next frame according to the pattern's rules.
  async fn recv(&self) -> Result<Msg, ZmqError>;

  /// Sends all frames of one logical message atomically.
  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError>;

  /// Receives all frames of one logical message.
  async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError>;

  async fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError>;
  async fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError>;
  async fn close(&self) -> Result<(), ZmqError>;

  // --- Pattern hooks invoked by `SocketCore` ---

  /// Pattern-specific options (SUBSCRIBE and friends).
  async fn set_pattern_option(&self, option: i32, value: &[u8]) -> ZmqResult<()>;
  async fn get_pattern_option(&self, option: i32) -> Result<Vec<u8>, ZmqError>;

  /// Events from this socket's pipes (frames arriving, peers vanishing).
  async fn handle_pipe_event(&self, pipe_id: usize, event: Command) -> Result<(), ZmqError>;

  /// A new connection's pipes are ready for this pattern to use.
  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, peer_identity: Option<&[u8]>);

  /// The peer's identity became known after attachment (wire handshake).
  async fn update_peer_identity(&self, pipe_read_id: usize, identity: Option<Blob>);

  /// A pipe is going away; drop all pattern state referring to it.
  async fn pipe_detached(&self, pipe_read_id: usize);

  /// Shutdown hook: close incoming queues and wake blocked callers.
  async fn stop(&self);

  /// Resolves when a `recv` would make progress; `Err` when the socket is
  /// closed. Patterns without a receive side never resolve.
  async fn recv_ready(&self) -> Result<(), ZmqError> {
    futures::future::pending::<Result<(), ZmqError>>().await
  }

  /// Resolves when a `send` would make progress; `Err` when the socket is
  /// closed. Patterns without a send side never resolve.
  async fn send_ready(&self) -> Result<(), ZmqError> {
    futures::future::pending::<Result<(), ZmqError>>().await
  }
}

/// Builds the pattern implementation for `socket_type` around a core.
pub(crate) fn new_pattern_socket(socket_type: types::SocketType, core: Arc<SocketCore>) -> Arc<dyn ISocket> {
  use types::SocketType;
  match socket_type {
    SocketType::Pair => Arc::new(pair_socket::PairSocket::new(core)),
    SocketType::Pub => Arc::new(pub_socket::PubSocket::new(core)),
    SocketType::Sub => Arc::new(sub_socket::SubSocket::new(core)),
    SocketType::Req => Arc::new(req_socket::ReqSocket::new(core)),
    SocketType::Rep => Arc::new(rep_socket::RepSocket::new(core)),
    SocketType::Dealer => Arc::new(dealer_socket::DealerSocket::new(core)),
    SocketType::Router => Arc::new(router_socket::RouterSocket::new(core)),
    SocketType::Pull => Arc::new(pull_socket::PullSocket::new(core)),
    SocketType::Push => Arc::new(push_socket::PushSocket::new(core)),
    SocketType::XPub => Arc::new(xpub_socket::XPubSocket::new(core)),
    SocketType::XSub => Arc::new(xsub_socket::XSubSocket::new(core)),
  }
}

/// Creates and spawns the `SocketCore` actor plus its pattern logic.
/// Called by `Context::socket()`.
pub(crate) fn create_socket_actor(
  handle: usize,
  ctx: Context,
  socket_type: types::SocketType,
) -> Result<(Arc<dyn ISocket>, MailboxSender), ZmqError> {
  SocketCore::create_and_spawn(handle, ctx, socket_type, SocketOptions::default())
}

pub use types::{Socket, SocketType};
