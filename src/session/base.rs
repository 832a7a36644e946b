use crate::context::Context;
use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::{mailbox, ActorType, Command, MailboxReceiver, MailboxSender, SystemEvent};

use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The per-connection state object. Lives between the socket core (pipes)
/// and the engine (wire); forwards frames in both directions and propagates
/// shutdown in response to `SocketClosing` / `ContextTerminating`.
#[derive(Debug)]
pub(crate) struct SessionBase {
  handle: usize,
  endpoint_uri: String,
  engine_mailbox: Option<MailboxSender>,
  engine_task_handle: Option<JoinHandle<()>>,
  mailbox_receiver: MailboxReceiver,
  rx_from_core: Option<AsyncReceiver<Msg>>,
  tx_to_core: Option<AsyncSender<Msg>>,
  pipe_read_id: Option<usize>,
  pipe_write_id: Option<usize>,
  pipe_attached: bool,
  engine_ready: bool,
  context: Context,
  parent_socket_id: usize,
}

impl SessionBase {
  pub(crate) fn create_and_spawn(
    handle: usize,
    endpoint_uri: String,
    context: Context,
    parent_socket_id: usize,
  ) -> (MailboxSender, JoinHandle<()>) {
    let (tx, rx) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
    let session = SessionBase {
      handle,
      endpoint_uri,
      engine_mailbox: None,
      engine_task_handle: None,
      mailbox_receiver: rx,
      rx_from_core: None,
      tx_to_core: None,
      pipe_read_id: None,
      pipe_write_id: None,
      pipe_attached: false,
      engine_ready: false,
      context: context.clone(),
      parent_socket_id,
    };

    let task_handle = tokio::spawn(session.run_loop());
    context.publish_actor_started(handle, ActorType::Session, Some(parent_socket_id));
    (tx, task_handle)
  }

  async fn stop_engine(&mut self) {
    if let Some(engine_mb) = self.engine_mailbox.take() {
      let _ = engine_mb.send(Command::Stop).await;
    }
  }

  async fn run_loop(mut self) {
    let session_handle = self.handle;
    let uri = self.endpoint_uri.clone();
    let event_bus = self.context.event_bus();
    let mut system_event_rx = event_bus.subscribe();

    tracing::debug!(handle = session_handle, uri = %uri, "session started");

    let mut error_on_stop: Option<ZmqError> = None;
    let mut shutting_down = false;

    loop {
      let should_read_core_pipe = self.pipe_attached && self.engine_ready && self.rx_from_core.is_some() && !shutting_down;
      let core_pipe_receiver = if should_read_core_pipe {
        self.rx_from_core.clone()
      } else {
        None
      };

      tokio::select! {
        biased;

        event_result = system_event_rx.recv(), if !shutting_down => {
          match event_result {
            Ok(SystemEvent::ContextTerminating) => {
              self.stop_engine().await;
              shutting_down = true;
            }
            Ok(SystemEvent::SocketClosing { socket_id }) if socket_id == self.parent_socket_id => {
              self.stop_engine().await;
              shutting_down = true;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
              tracing::warn!(handle = session_handle, uri = %uri, skipped, "session lagged on event bus, stopping");
              self.stop_engine().await;
              shutting_down = true;
              error_on_stop = Some(ZmqError::Internal("Session event bus lagged".into()));
              break;
            }
            Err(broadcast::error::RecvError::Closed) => {
              self.stop_engine().await;
              shutting_down = true;
              break;
            }
          }
        }

        cmd_result = self.mailbox_receiver.recv() => {
          let command = match cmd_result {
            Ok(cmd) => cmd,
            Err(_) => {
              self.stop_engine().await;
              break;
            }
          };

          match command {
            Command::Attach { engine_mailbox, engine_task_handle } => {
              if self.engine_mailbox.is_some() {
                tracing::warn!(handle = session_handle, uri = %uri, "duplicate engine attach, aborting new engine");
                if let Some(h) = engine_task_handle { h.abort(); }
                continue;
              }
              self.engine_mailbox = Some(engine_mailbox);
              self.engine_task_handle = engine_task_handle;
            }
            Command::AttachPipe { rx_from_core, tx_to_core, pipe_read_id, pipe_write_id } => {
              if self.pipe_attached {
                tracing::warn!(handle = session_handle, uri = %uri, "duplicate pipe attach ignored");
                continue;
              }
              self.rx_from_core = Some(rx_from_core);
              self.tx_to_core = Some(tx_to_core);
              self.pipe_read_id = Some(pipe_read_id);
              self.pipe_write_id = Some(pipe_write_id);
              self.pipe_attached = true;
            }
            Command::Stop => {
              self.stop_engine().await;
              shutting_down = true;
            }
            Command::EnginePushCmd { msg } => {
              if !self.engine_ready {
                tracing::warn!(handle = session_handle, uri = %uri, "frame before EngineReady, dropping");
                continue;
              }
              // Forwarding into the core pipe is the RCVHWM suspension point:
              // a full pipe parks the session, which parks the engine's reads.
              let Some(ref tx) = self.tx_to_core else {
                error_on_stop = Some(ZmqError::Internal("Session missing core pipe sender".into()));
                self.stop_engine().await;
                break;
              };
              if tx.send(msg).await.is_err() {
                self.stop_engine().await;
                break;
              }
            }
            Command::EngineReady { peer_identity } => {
              self.engine_ready = true;
              // The session's write ID is the core's read ID for this pipe.
              if let Some(core_pipe_read_id) = self.pipe_write_id {
                let _ = self.context.event_bus().publish(SystemEvent::PeerIdentityEstablished {
                  parent_core_id: self.parent_socket_id,
                  core_pipe_read_id,
                  peer_identity,
                });
              }
            }
            Command::EngineStopped => {
              self.engine_mailbox = None;
              self.engine_ready = false;
              if !shutting_down {
                error_on_stop = Some(ZmqError::Disconnected);
              }
              break;
            }
            Command::EngineError { error } => {
              tracing::debug!(handle = session_handle, uri = %uri, error = %error, "engine reported error");
              self.engine_ready = false;
              if error_on_stop.is_none() {
                error_on_stop = Some(error);
              }
              if let Some(h) = self.engine_task_handle.take() {
                h.abort();
              }
              self.engine_mailbox = None;
              break;
            }
            other => {
              tracing::warn!(handle = session_handle, uri = %uri, cmd = other.variant_name(), "session received unhandled command");
            }
          }
        }

        msg_result = async { core_pipe_receiver.as_ref().unwrap().recv().await }, if should_read_core_pipe => {
          match msg_result {
            Ok(msg) => {
              let Some(ref engine_mb) = self.engine_mailbox else {
                self.stop_engine().await;
                break;
              };
              if engine_mb.send(Command::SessionPushCmd { msg }).await.is_err() {
                if let Some(h) = self.engine_task_handle.take() {
                  h.abort();
                }
                error_on_stop = Some(ZmqError::Internal("Session failed to reach engine".into()));
                break;
              }
            }
            Err(_) => {
              // Core closed its sending end (socket shutting down or pipe torn).
              self.stop_engine().await;
              break;
            }
          }
        }
      }

      if shutting_down && self.engine_mailbox.is_none() && self.engine_task_handle.is_none() {
        break;
      }
    }

    // Closing our ends completes the pipe termination handshake: the core's
    // reader drains buffered frames, then observes the closure.
    self.rx_from_core = None;
    self.tx_to_core = None;

    if let Some(engine_handle) = self.engine_task_handle.take() {
      match tokio::time::timeout(Duration::from_millis(200), engine_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          tracing::error!(handle = session_handle, uri = %uri, "engine task panicked: {:?}", e);
        }
        Err(_) => {
          tracing::warn!(handle = session_handle, uri = %uri, "timeout joining engine task");
        }
      }
    }

    self
      .context
      .publish_actor_stopping(session_handle, ActorType::Session, Some(uri.clone()), error_on_stop);
    tracing::debug!(handle = session_handle, uri = %uri, "session stopped");
  }
}
