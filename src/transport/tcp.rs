use crate::context::Context;
use crate::engine::{create_engine, EngineConfig};
use crate::error::ZmqError;
use crate::runtime::{mailbox, ActorType, Command, MailboxReceiver, MailboxSender, SystemEvent};
use crate::session::SessionBase;
use crate::socket::options::TcpTransportConfig;

use socket2::{Domain, Protocol, SockRef, Socket as Socket2, TcpKeepalive, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Listener actor: binds the port, accepts connections and spawns a
/// session + engine pair for each. Stops on `Stop`, `SocketClosing` of its
/// parent socket, or `ContextTerminating`.
pub(crate) struct TcpListener {
  handle: usize,
  resolved_uri: String,
  core_mailbox: Option<MailboxSender>,
  mailbox_receiver: MailboxReceiver,
  accept_loop_handle: JoinHandle<()>,
  context: Context,
  parent_core_id: usize,
}

impl TcpListener {
  /// Binds `endpoint` (wildcard host/port allowed) and spawns the actor.
  /// Returns the command mailbox, task handle, and the resolved URI.
  pub(crate) fn create_and_spawn(
    handle: usize,
    endpoint: String,
    config: TcpTransportConfig,
    engine_config: EngineConfig,
    context: Context,
    parent_core_id: usize,
  ) -> Result<(MailboxSender, JoinHandle<()>, String), ZmqError> {
    let addr = resolve_tcp_endpoint(&endpoint)?;

    let domain = Domain::for_address(addr);
    let socket = Socket2::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(ZmqError::Io)?;
    socket.set_reuse_address(true).map_err(ZmqError::Io)?;
    socket.set_nonblocking(true).map_err(ZmqError::Io)?;
    socket
      .bind(&addr.into())
      .map_err(|e| ZmqError::for_endpoint(&endpoint, e))?;
    socket.listen(config.backlog.max(1)).map_err(ZmqError::Io)?;

    let std_listener: std::net::TcpListener = socket.into();
    let listener = TokioTcpListener::from_std(std_listener).map_err(ZmqError::Io)?;
    let local_addr = listener.local_addr().map_err(ZmqError::Io)?;
    let resolved_uri = format!("tcp://{}", local_addr);
    tracing::info!(handle, uri = %resolved_uri, "TCP listener bound");

    let (tx, rx) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
    let accept_loop_handle = tokio::spawn(run_accept_loop(
      handle,
      Arc::new(listener),
      resolved_uri.clone(),
      config,
      engine_config,
      context.clone(),
      parent_core_id,
    ));

    let actor = TcpListener {
      handle,
      resolved_uri: resolved_uri.clone(),
      core_mailbox: context.inner().get_socket_command_sender(parent_core_id),
      mailbox_receiver: rx,
      accept_loop_handle,
      context: context.clone(),
      parent_core_id,
    };
    let task_handle = tokio::spawn(actor.run_command_loop());
    context.publish_actor_started(handle, ActorType::Listener, Some(parent_core_id));

    Ok((tx, task_handle, resolved_uri))
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
              tracing::warn!(handle = self.handle, cmd = other.variant_name(), "listener received unhandled command");
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
    if let Some(core_mailbox) = &self.core_mailbox {
      let _ = core_mailbox
        .try_send(Command::ListenerStopped {
          handle: self.handle,
          endpoint_uri: self.resolved_uri.clone(),
        });
    }
    self.context.publish_actor_stopping(
      self.handle,
      ActorType::Listener,
      Some(self.resolved_uri.clone()),
      None,
    );
    tracing::debug!(handle = self.handle, uri = %self.resolved_uri, "TCP listener stopped");
  }
}

async fn run_accept_loop(
  listener_handle: usize,
  listener: Arc<TokioTcpListener>,
  listener_uri: String,
  config: TcpTransportConfig,
  engine_config: EngineConfig,
  context: Context,
  parent_core_id: usize,
) {
  loop {
    match listener.accept().await {
      Ok((stream, peer_addr)) => {
        tracing::debug!(parent_handle = listener_handle, %peer_addr, "accepted TCP connection");
        if let Err(e) = apply_tcp_socket_options(&stream, &config) {
          tracing::error!(parent_handle = listener_handle, "failed to apply socket options: {}", e);
          continue;
        }
        spawn_connection(
          stream,
          format!("tcp://{}", peer_addr),
          listener_uri.clone(),
          engine_config.clone(),
          &context,
          parent_core_id,
          true,
        )
        .await;
      }
      Err(e) => {
        // Often transient (EMFILE, aborted handshake); back off briefly.
        tracing::warn!(parent_handle = listener_handle, "accept error: {}", e);
        tokio::time::sleep(Duration::from_millis(100)).await;
      }
    }
  }
}

/// Connecter actor: establishes one outgoing connection, retrying with
/// exponential backoff per RECONNECT_IVL / RECONNECT_IVL_MAX. Exits after a
/// successful connection (re-connects are respawned by the socket core when
/// an established session drops).
pub(crate) struct TcpConnecter {
  handle: usize,
  endpoint: String,
  config: TcpTransportConfig,
  engine_config: EngineConfig,
  reconnect_ivl: Option<Duration>,
  reconnect_ivl_max: Option<Duration>,
  mailbox_receiver: MailboxReceiver,
  context: Context,
  parent_core_id: usize,
}

impl TcpConnecter {
  pub(crate) fn create_and_spawn(
    handle: usize,
    endpoint: String,
    config: TcpTransportConfig,
    engine_config: EngineConfig,
    reconnect: (Option<Duration>, Option<Duration>),
    context: Context,
    parent_core_id: usize,
  ) -> (MailboxSender, JoinHandle<()>) {
    let (tx, rx) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
    let connecter = TcpConnecter {
      handle,
      endpoint,
      config,
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
    let target = self.endpoint.strip_prefix("tcp://").unwrap_or(&self.endpoint).to_string();
    let mut delay = self.reconnect_ivl;
    let mut last_error: Option<ZmqError> = None;

    loop {
      let connect_attempt = TcpStream::connect(target.clone());
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
          if let Err(e) = apply_tcp_socket_options(&stream, &self.config) {
            tracing::warn!(handle = self.handle, "failed to apply socket options: {}", e);
          }
          tracing::info!(handle = self.handle, uri = %self.endpoint, "TCP connect succeeded");
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
          tracing::debug!(handle = self.handle, uri = %self.endpoint, error = %e, "TCP connect failed");
          last_error = Some(ZmqError::for_endpoint(&self.endpoint, e));

          let Some(current_delay) = delay else {
            // Reconnection disabled: one attempt only.
            break;
          };
          // Sleep, but stay responsive to shutdown.
          let slept = tokio::select! {
            biased;
            cmd = self.mailbox_receiver.recv() => matches!(cmd, Ok(Command::Stop) | Err(_)),
            event = system_events.recv() => matches!(
              event,
              Ok(SystemEvent::ContextTerminating)
                | Err(broadcast::error::RecvError::Closed)
            ) || matches!(event, Ok(SystemEvent::SocketClosing { socket_id }) if socket_id == self.parent_core_id),
            _ = tokio::time::sleep(current_delay) => false,
          };
          if slept {
            break;
          }
          delay = Some(next_reconnect_delay(current_delay, self.reconnect_ivl_max));
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

/// Doubles the delay up to RECONNECT_IVL_MAX; a max of zero disables growth.
pub(crate) fn next_reconnect_delay(current: Duration, ivl_max: Option<Duration>) -> Duration {
  match ivl_max {
    Some(max) if max > Duration::ZERO => (current * 2).min(max),
    _ => current,
  }
}

/// Wires an established stream into a session + engine pair and announces it
/// to the owning socket core.
pub(crate) async fn spawn_connection<S: crate::engine::EngineStream>(
  stream: S,
  endpoint_uri: String,
  target_endpoint_uri: String,
  engine_config: EngineConfig,
  context: &Context,
  parent_core_id: usize,
  is_server: bool,
) {
  let session_handle_id = context.inner().next_handle();
  let engine_handle_id = context.inner().next_handle();

  let (session_mailbox, _session_task) =
    SessionBase::create_and_spawn(session_handle_id, endpoint_uri.clone(), context.clone(), parent_core_id);
  let (engine_mailbox, engine_task_handle) = create_engine(
    engine_handle_id,
    context,
    session_handle_id,
    session_mailbox.clone(),
    stream,
    engine_config,
    is_server,
  );

  let attach_cmd = Command::Attach {
    engine_mailbox,
    engine_task_handle: Some(engine_task_handle),
  };
  if session_mailbox.send(attach_cmd).await.is_err() {
    tracing::error!(session_handle = session_handle_id, "failed to attach engine to session");
    return;
  }

  let _ = context.event_bus().publish(SystemEvent::NewConnectionEstablished {
    parent_core_id,
    endpoint_uri,
    target_endpoint_uri,
    session_mailbox,
    session_handle_id,
    is_outbound: !is_server,
  });
}

fn resolve_tcp_endpoint(endpoint: &str) -> Result<SocketAddr, ZmqError> {
  let addr_part = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
  // `*` as host means any interface.
  let addr_part = if let Some(port) = addr_part.strip_prefix("*:") {
    format!("0.0.0.0:{}", port)
  } else {
    addr_part.to_string()
  };
  addr_part
    .to_socket_addrs()
    .map_err(|_| ZmqError::UnresolvableEndpoint(endpoint.to_string()))?
    .next()
    .ok_or_else(|| ZmqError::UnresolvableEndpoint(endpoint.to_string()))
}

/// Applies NODELAY, keepalive and buffer sizes to an established stream.
fn apply_tcp_socket_options(stream: &TcpStream, config: &TcpTransportConfig) -> Result<(), ZmqError> {
  let socket_ref = SockRef::from(stream);

  socket_ref.set_nodelay(config.tcp_nodelay)?;

  if let Some(size) = config.sndbuf {
    socket_ref.set_send_buffer_size(size)?;
  }
  if let Some(size) = config.rcvbuf {
    socket_ref.set_recv_buffer_size(size)?;
  }

  match config.keepalive_mode {
    1 => {
      let mut keepalive = TcpKeepalive::new();
      if let Some(time) = config.keepalive_time {
        keepalive = keepalive.with_time(time);
      }
      #[cfg(any(target_os = "android", target_os = "linux", target_vendor = "apple", target_os = "windows"))]
      if let Some(interval) = config.keepalive_interval {
        keepalive = keepalive.with_interval(interval);
      }
      #[cfg(any(target_os = "android", target_os = "linux", target_vendor = "apple"))]
      if let Some(count) = config.keepalive_count {
        keepalive = keepalive.with_retries(count);
      }
      socket_ref.set_tcp_keepalive(&keepalive)?;
    }
    -1 => {
      socket_ref.set_keepalive(false)?;
    }
    _ => {} // 0: leave the system default alone
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wildcard_host_resolves() {
    let addr = resolve_tcp_endpoint("tcp://*:0").unwrap();
    assert!(addr.ip().is_unspecified());
    assert_eq!(addr.port(), 0);
  }

  #[test]
  fn backoff_doubles_up_to_max() {
    let max = Some(Duration::from_millis(400));
    let d1 = next_reconnect_delay(Duration::from_millis(100), max);
    assert_eq!(d1, Duration::from_millis(200));
    let d2 = next_reconnect_delay(d1, max);
    assert_eq!(d2, Duration::from_millis(400));
    let d3 = next_reconnect_delay(d2, max);
    assert_eq!(d3, Duration::from_millis(400));
  }

  #[test]
  fn zero_max_disables_growth() {
    let d = next_reconnect_delay(Duration::from_millis(100), Some(Duration::ZERO));
    assert_eq!(d, Duration::from_millis(100));
  }
}
