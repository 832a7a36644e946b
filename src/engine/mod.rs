//! Per-connection protocol engines. An engine owns one framed byte stream,
//! performs the connection handshake, and shuttles frames between the wire
//! and its session actor.

pub(crate) mod core;

use crate::context::Context;
use crate::message::Blob;
use crate::runtime::{mailbox, MailboxSender};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Any ordered byte stream an engine can drive (TCP, Unix socket).
pub(crate) trait EngineStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> EngineStream for T {}

/// Static configuration an engine needs for its handshake.
#[derive(Debug, Clone, Default)]
pub(crate) struct EngineConfig {
  /// Socket type name advertised in the READY command (e.g. "DEALER").
  pub socket_type_name: String,
  /// Local identity advertised to the peer, if configured.
  pub routing_id: Option<Blob>,
}

/// Spawns an engine actor over `stream`, returning its command mailbox and
/// task handle. `is_server` is true on the accepting side.
pub(crate) fn create_engine<S: EngineStream>(
  handle: usize,
  context: &Context,
  parent_session_id: usize,
  session_mailbox: MailboxSender,
  stream: S,
  config: EngineConfig,
  is_server: bool,
) -> (MailboxSender, JoinHandle<()>) {
  let (tx, rx) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
  let engine = core::EngineCore::new(handle, context.clone(), session_mailbox, rx, stream, config, is_server);
  let task_handle = tokio::spawn(engine.run_loop());
  context.publish_actor_started(handle, crate::runtime::ActorType::Engine, Some(parent_session_id));
  (tx, task_handle)
}
