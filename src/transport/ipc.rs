use crate::context::Context;
use crate::engine::EngineConfig;
use crate::error::ZmqError;
use crate::runtime::{mailbox, ActorType, Command, MailboxReceiver, MailboxSender, SystemEvent};
use crate::transport::tcp::spawn_connection;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Unix-domain-socket listener actor. Mirrors the TCP listener; the socket
/// file is removed again when the listener stops.
pub(crate) struct IpcListener {
  handle: usize,
  endpoint_uri: String,
  path: PathBuf,
  core_mailbox: Option<MailboxSender>,
  mailbox_receiver: MailboxReceiver,
  accept_loop_handle: JoinHandle<()>,
  context: Context,
  parent_core_id: usize,
}

impl IpcListener {
  pub(crate) fn create_and_spawn(
    handle: usize,
    endpoint_uri: String,
    path: PathBuf,
    engine_config: EngineConfig,
    context: Context,
    parent_core_id: usize,
  ) -> Result<(MailboxSender, JoinHandle<()>), ZmqError> {
    let listener = UnixListener::bind(&path).map_err(|e| ZmqError::for_endpoint(&endpoint_uri, e))?;
    tracing::info!(handle, uri = %endpoint_uri, "IPC listener bound");

    let (tx, rx) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
    let accept_loop_handle = tokio::spawn(run_accept_loop(
      handle,
      Arc::new(listener),
      endpoint_uri.clone(),
      engine_config,
      context.clone(),
      parent_core_id,
    ));

    let actor = IpcListener {
      handle,
      endpoint_uri,
      path,
      core_mailbox: context.inner().get_socket_command_sender(parent_core_id),
      mailbox_receiver: rx,
      accept_loop_handle,
      context: context.clone(),
      parent_core_id,
    };
    let task_handle = tokio::spawn(actor.run_command_loop());
    context.publish_actor_started(handle, ActorType::Listener, Some(parent_core_id));
    Ok((tx, task_handle))
  }

  async fn run_command_loop(mut self) {
    let mut system_events = self.context.event_bus().subscribe();
    loop {
      tokio::select! {
        biased;

        cmd = self.mailbox_receiver.recv() => {
          match cmd {
            Ok(Command::Stop) | Err(_) => break,
            Ok(other) => {
              tracing::warn!(handle = self.handle, cmd = other.variant_name(), "IPC listener received unhandled command");
            }
          }
        }

        event = system_events.recv() => {
          match event {
            Ok(SystemEvent::ContextTerminating) => break,
            Ok(SystemEvent::SocketClosing { socket_id }) if socket_id == self.parent_core_id => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
          }
        }
      }
    }

    self.accept_loop_handle.abort();
    if let Err(e) = std::fs::remove_file(&self.path) {
      tracing::debug!(handle = self.handle, "failed to remove IPC socket file: {}", e);
    }
    if let Some(core_mailbox) = &self.core_mailbox {
      let _ = core_mailbox.try_send(Command::ListenerStopped {
        handle: self.handle,
        endpoint_uri: self.endpoint_uri.clone(),
      });
    }
    self
      .context
      .publish_actor_stopping(self.handle, ActorType::Listener, Some(self.endpoint_uri.clone()), None);
  }
}

async fn run_accept_loop(
  listener_handle: usize,
  listener: Arc<UnixListener>,
  listener_uri: String,
  engine_config: EngineConfig,
  context: Context,
  parent_core_id: usize,
) {
  let mut accepted = 0usize;
  loop {
    match listener.accept().await {
      Ok((stream, _peer_addr)) => {
        accepted += 1;
        // Unix peers are mostly unnamed; synthesize a unique URI.
        let endpoint_uri = format!("{}#{}", listener_uri, accepted);
        tracing::debug!(parent_handle = listener_handle, uri = %endpoint_uri, "accepted IPC connection");
        spawn_connection(
          stream,
          endpoint_uri,
          listener_uri.clone(),
          engine_config.clone(),
          &context,
          parent_core_id,
          true,
        )
        .await;
      }
      Err(e) => {
        tracing::warn!(parent_handle = listener_handle, "IPC accept error: {}", e);
        tokio::time::sleep(Duration::from_millis(100)).await;
      }
    }
  }
}

/// Unix-domain-socket connecter actor with the same retry policy as TCP.
pub(crate) struct IpcConnecter {
  handle: usize,
  endpoint: String,
  path: PathBuf,
  engine_config: EngineConfig,
  reconnect_ivl: Option<Duration>,
  reconnect_ivl_max: Option<Duration>,
  mailbox_receiver: MailboxReceiver,
  context: Context,
  parent_core_id: usize,
}

impl IpcConnecter {
  pub(crate) fn create_and_spawn(
    handle: usize,
    endpoint: String,
    path: PathBuf,
    engine_config: EngineConfig,
    reconnect: (Option<Duration>, Option<Duration>),
    context: Context,
    parent_core_id: usize,
  ) -> (MailboxSender, JoinHandle<()>) {
    let (tx, rx) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
    let connecter = IpcConnecter {
      handle,
      endpoint,
      path,
      engine_config,
      reconnect_ivl: reconnect.0,
      reconnect_ivl_max: reconnect.1,
      mailbox_receiver: rx,
      context: context.clone(),
      parent_core_id,
    };
    let task_handle = tokio::spawn(connecter.run_connect_loop());
    context.publish_actor_started(handle, ActorType::Connecter, Some(parent_core_id));
    (tx, task_handle)
  }

  async fn run_connect_loop(mut self) {
    let mut system_events = self.context.event_bus().subscribe();
    let mut delay = self.reconnect_ivl;
    let mut last_error: Option<ZmqError> = None;

    loop {
      let connect_attempt = UnixStream::connect(&self.path);
      let result = tokio::select! {
        biased;
        cmd = self.mailbox_receiver.recv() => {
          match cmd {
            Ok(Command::Stop) | Err(_) => break,
            Ok(_) => continue,
          }
        }
        event = system_events.recv() => {
          match event {
            Ok(SystemEvent::ContextTerminating) => break,
            Ok(SystemEvent::SocketClosing { socket_id }) if socket_id == self.parent_core_id => break,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
          }
        }
        result = connect_attempt => result,
      };

      match result {
        Ok(stream) => {
          tracing::info!(handle = self.handle, uri = %self.endpoint, "IPC connect succeeded");
          spawn_connection(
            stream,
            self.endpoint.clone(),
            self.endpoint.clone(),
            self.engine_config.clone(),
            &self.context,
            self.parent_core_id,
            false,
          )
          .await;
          last_error = None;
          break;
        }
        Err(e) => {
          tracing::debug!(handle = self.handle, uri = %self.endpoint, error = %e, "IPC connect failed");
          last_error = Some(ZmqError::for_endpoint(&self.endpoint, e));

          let Some(current_delay) = delay else {
            break;
          };
          let stopped = tokio::select! {
            biased;
            cmd = self.mailbox_receiver.recv() => matches!(cmd, Ok(Command::Stop) | Err(_)),
            event = system_events.recv() => matches!(
              event,
              Ok(SystemEvent::ContextTerminating) | Err(broadcast::error::RecvError::Closed)
            ) || matches!(event, Ok(SystemEvent::SocketClosing { socket_id }) if socket_id == self.parent_core_id),
            _ = tokio::time::sleep(current_delay) => false,
          };
          if stopped {
            break;
          }
          delay = Some(crate::transport::tcp::next_reconnect_delay(current_delay, self.reconnect_ivl_max));
        }
      }
    }

    if let Some(error) = &last_error {
      let _ = self.context.event_bus().publish(SystemEvent::ConnectionAttemptFailed {
        parent_core_id: self.parent_core_id,
        target_endpoint_uri: self.endpoint.clone(),
        error_msg: error.to_string(),
      });
    }
    if let Some(core_mailbox) = self.context.inner().get_socket_command_sender(self.parent_core_id) {
      let _ = core_mailbox.try_send(Command::ConnecterStopped {
        handle: self.handle,
        endpoint_uri: self.endpoint.clone(),
      });
    }
    self
      .context
      .publish_actor_stopping(self.handle, ActorType::Connecter, Some(self.endpoint.clone()), last_error);
  }
}
