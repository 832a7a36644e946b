//! Data pipes between a socket core and its per-connection sessions.
//!
//! A connection is wired with two bounded `async-channel` queues, one per
//! direction; the channel capacity is the pipe's high-water mark. A writer
//! seeing a full channel has hit HWM; the consumer draining the queue is what
//! re-enables the writer (the channel wakeup plays the activate-write role).
//! Closing the sending end starts the termination handshake: the reader
//! drains whatever is buffered, then observes the closure and reports
//! `PipeClosedByPeer`, after which both sides drop their pipe state.

use crate::message::Msg;
use crate::runtime::{Command, MailboxSender};
use crate::socket::ISocket;

use async_channel::Receiver as AsyncReceiver;
use std::sync::Arc;

/// Reads frames from one inbound pipe and feeds them to the socket's pattern
/// logic. One task per attached pipe; single consumer by construction.
pub(crate) async fn run_pipe_reader_task(
  core_handle: usize,
  core_mailbox: MailboxSender,
  socket_logic: Arc<dyn ISocket>,
  pipe_read_id: usize,
  pipe_receiver: AsyncReceiver<Msg>,
) {
  tracing::debug!(handle = core_handle, pipe_id = pipe_read_id, "pipe reader task started");

  loop {
    match pipe_receiver.recv().await {
      Ok(msg) => {
        let event = Command::PipeMessageReceived {
          pipe_id: pipe_read_id,
          msg,
        };
        if let Err(e) = socket_logic.handle_pipe_event(pipe_read_id, event).await {
          tracing::error!(
            handle = core_handle,
            pipe_id = pipe_read_id,
            error = %e,
            "error handling pipe message"
          );
        }
      }
      Err(_) => {
        // Sender closed; all in-flight frames were delivered above.
        tracing::debug!(
          handle = core_handle,
          pipe_id = pipe_read_id,
          "pipe sender closed, stopping reader"
        );
        let _ = core_mailbox.send(Command::PipeClosedByPeer { pipe_id: pipe_read_id }).await;
        break;
      }
    }
  }

  tracing::debug!(handle = core_handle, pipe_id = pipe_read_id, "pipe reader task finished");
}
