use crate::error::ZmqError;
use crate::runtime::{ActorType, Command, SystemEvent};
use crate::socket::core::{pipe_manager, shutdown, EndpointInfo, EndpointType, SocketCore};
use crate::socket::options::{self, SocketOptions};
use crate::socket::ISocket;
use crate::transport::endpoint::{parse_endpoint, Endpoint};
use crate::transport::tcp::{TcpConnecter, TcpListener};

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::oneshot;

/// The socket core's actor loop: user commands on the mailbox, lifecycle
/// coordination on the event bus.
pub(crate) async fn run_command_loop(core: Arc<SocketCore>, socket_logic: Arc<dyn ISocket>) {
  let handle = core.handle;
  let Some(mailbox) = core.take_command_receiver() else {
    tracing::error!(handle, "socket core started without a command receiver");
    return;
  };
  let mut system_events = core.context.event_bus().subscribe();

  tracing::debug!(handle, "socket core command loop started");

  loop {
    tokio::select! {
      biased;

      cmd_result = mailbox.recv() => {
        match cmd_result {
          Ok(command) => {
            if handle_command(&core, &socket_logic, command).await {
              break;
            }
          }
          Err(_) => {
            // Every user handle dropped without close(); tear down anyway.
            shutdown::run(&core, &socket_logic).await;
            break;
          }
        }
      }

      event_result = system_events.recv() => {
        match event_result {
          Ok(event) => {
            if handle_system_event(&core, &socket_logic, event).await {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!(handle, skipped, "socket core lagged on event bus");
          }
          Err(broadcast::error::RecvError::Closed) => {
            shutdown::run(&core, &socket_logic).await;
            break;
          }
        }
      }
    }
  }

  core.context.inner().unregister_socket(handle);
  core
    .context
    .publish_actor_stopping(handle, ActorType::SocketCore, None, None);
  tracing::debug!(handle, "socket core command loop finished");
}

/// Returns true when the loop should exit.
async fn handle_command(core: &Arc<SocketCore>, socket_logic: &Arc<dyn ISocket>, command: Command) -> bool {
  let handle = core.handle;
  tracing::trace!(handle, cmd = command.variant_name(), "socket core handling command");

  match command {
    Command::UserBind { endpoint, reply_tx } => {
      let result = bind_endpoint(core, &endpoint).await;
      let _ = reply_tx.send(result);
    }
    Command::UserConnect { endpoint, reply_tx } => {
      connect_endpoint(core, socket_logic, endpoint, reply_tx).await;
    }
    Command::UserUnbind { endpoint, reply_tx } => {
      let result = unbind_endpoint(core, &endpoint).await;
      let _ = reply_tx.send(result);
    }
    Command::UserDisconnect { endpoint, reply_tx } => {
      let result = disconnect_endpoint(core, socket_logic, &endpoint).await;
      let _ = reply_tx.send(result);
    }
    Command::UserSetOpt { option, value, reply_tx } => {
      let result = handle_set_option(core, socket_logic, option, &value).await;
      let _ = reply_tx.send(result);
    }
    Command::UserGetOpt { option, reply_tx } => {
      let result = handle_get_option(core, socket_logic, option).await;
      let _ = reply_tx.send(result);
    }
    Command::UserClose { reply_tx } => {
      shutdown::run(core, socket_logic).await;
      let _ = reply_tx.send(Ok(()));
      return true;
    }
    Command::Stop => {
      shutdown::run(core, socket_logic).await;
      return true;
    }
    Command::ListenerStopped { handle: child, endpoint_uri } | Command::ConnecterStopped { handle: child, endpoint_uri } => {
      let mut state = core.core_state.write();
      if let Some(info) = state.endpoints.get(&endpoint_uri) {
        if info.handle_id == child {
          state.endpoints.remove(&endpoint_uri);
        }
      }
    }
    Command::PipeClosedByPeer { pipe_id } => {
      pipe_manager::handle_pipe_closed(core, socket_logic, pipe_id).await;
    }
    other => {
      tracing::warn!(handle, cmd = other.variant_name(), "socket core received unhandled command");
    }
  }
  false
}

/// Returns true when the loop should exit.
async fn handle_system_event(core: &Arc<SocketCore>, socket_logic: &Arc<dyn ISocket>, event: SystemEvent) -> bool {
  let handle = core.handle;
  match event {
    SystemEvent::ContextTerminating => {
      shutdown::run(core, socket_logic).await;
      return true;
    }
    SystemEvent::NewConnectionEstablished {
      parent_core_id,
      endpoint_uri,
      target_endpoint_uri,
      session_mailbox,
      session_handle_id,
      is_outbound,
    } if parent_core_id == handle => {
      pipe_manager::attach_new_connection(
        core,
        socket_logic,
        endpoint_uri,
        target_endpoint_uri,
        session_mailbox,
        session_handle_id,
        is_outbound,
      )
      .await;
    }
    SystemEvent::PeerIdentityEstablished {
      parent_core_id,
      core_pipe_read_id,
      peer_identity,
    } if parent_core_id == handle => {
      socket_logic.update_peer_identity(core_pipe_read_id, peer_identity).await;
    }
    SystemEvent::ConnectionAttemptFailed {
      parent_core_id,
      target_endpoint_uri,
      error_msg,
    } if parent_core_id == handle => {
      tracing::debug!(handle, uri = %target_endpoint_uri, error = %error_msg, "connection attempt failed");
    }
    #[cfg(feature = "inproc")]
    SystemEvent::InprocBindingRequest {
      target_inproc_name,
      connector_uri,
      binder_pipe_tx_to_connector,
      binder_pipe_rx_from_connector,
      connector_pipe_write_id,
      connector_pipe_read_id,
      connector_identity,
      reply_tx,
    } => {
      let is_mine = core.core_state.read().bound_inproc_names.contains(&target_inproc_name);
      if is_mine {
        pipe_manager::accept_inproc_binding(
          core,
          socket_logic,
          connector_uri,
          binder_pipe_tx_to_connector,
          binder_pipe_rx_from_connector,
          connector_pipe_write_id,
          connector_pipe_read_id,
          connector_identity,
          reply_tx,
        )
        .await;
      }
    }
    #[cfg(feature = "inproc")]
    SystemEvent::InprocPipePeerClosed {
      target_inproc_name,
      closed_by_connector_pipe_read_id,
    } => {
      let is_mine = core.core_state.read().bound_inproc_names.contains(&target_inproc_name);
      if is_mine {
        // The binder's write pipe carries the ID the connector reads on.
        pipe_manager::handle_pipe_closed_by_write_id(core, socket_logic, closed_by_connector_pipe_read_id).await;
      }
    }
    _ => {}
  }
  false
}

/// Snapshot of the stream- and handshake-level settings derived from the
/// current socket options.
fn transport_configs(core: &Arc<SocketCore>) -> (crate::socket::options::TcpTransportConfig, crate::engine::EngineConfig) {
  let state = core.core_state.read();
  (
    state.options.tcp_config(),
    crate::engine::EngineConfig {
      socket_type_name: state.options.socket_type_name.clone(),
      routing_id: state.options.routing_id.clone(),
    },
  )
}

async fn bind_endpoint(core: &Arc<SocketCore>, endpoint: &str) -> Result<(), ZmqError> {
  let handle = core.handle;
  let parsed = parse_endpoint(endpoint)?;
  if core.core_state.read().endpoints.contains_key(endpoint) {
    return Err(ZmqError::AddressInUse(endpoint.to_string()));
  }

  match parsed {
    Endpoint::Tcp(..) => {
      let child_handle = core.context.inner().next_handle();
      let (config, engine_config) = transport_configs(core);
      let (listener_mailbox, listener_task, resolved_uri) = TcpListener::create_and_spawn(
        child_handle,
        endpoint.to_string(),
        config,
        engine_config,
        core.context.clone(),
        handle,
      )?;

      let mut state = core.core_state.write();
      state.endpoints.insert(
        resolved_uri.clone(),
        EndpointInfo {
          mailbox: Some(listener_mailbox),
          task_handle: Some(listener_task),
          endpoint_type: EndpointType::Listener,
          endpoint_uri: resolved_uri.clone(),
          pipe_ids: None,
          handle_id: child_handle,
          target_endpoint_uri: None,
          is_outbound: false,
        },
      );
      state.last_bound_endpoint = Some(resolved_uri);
      Ok(())
    }

    #[cfg(all(feature = "ipc", unix))]
    Endpoint::Ipc(path, uri) => {
      let child_handle = core.context.inner().next_handle();
      let (_, engine_config) = transport_configs(core);
      let (listener_mailbox, listener_task) = crate::transport::ipc::IpcListener::create_and_spawn(
        child_handle,
        uri.clone(),
        path,
        engine_config,
        core.context.clone(),
        handle,
      )?;

      let mut state = core.core_state.write();
      state.endpoints.insert(
        uri.clone(),
        EndpointInfo {
          mailbox: Some(listener_mailbox),
          task_handle: Some(listener_task),
          endpoint_type: EndpointType::Listener,
          endpoint_uri: uri.clone(),
          pipe_ids: None,
          handle_id: child_handle,
          target_endpoint_uri: None,
          is_outbound: false,
        },
      );
      state.last_bound_endpoint = Some(uri);
      Ok(())
    }

    #[cfg(feature = "inproc")]
    Endpoint::Inproc(name) => {
      core.context.inner().register_inproc(name.clone(), handle)?;
      let mut state = core.core_state.write();
      state.bound_inproc_names.insert(name.clone());
      state.last_bound_endpoint = Some(format!("inproc://{}", name));
      Ok(())
    }

    #[cfg(not(all(feature = "ipc", unix)))]
    #[allow(unreachable_patterns)]
    _ => Err(ZmqError::TransportNotSupported(endpoint.to_string())),
  }
}

async fn connect_endpoint(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  endpoint: String,
  reply_tx: oneshot::Sender<Result<(), ZmqError>>,
) {
  let parsed = match parse_endpoint(&endpoint) {
    Ok(parsed) => parsed,
    Err(e) => {
      let _ = reply_tx.send(Err(e));
      return;
    }
  };

  match parsed {
    Endpoint::Tcp(..) => {
      let child_handle = core.context.inner().next_handle();
      let (config, engine_config) = transport_configs(core);
      let reconnect = {
        let state = core.core_state.read();
        (state.options.reconnect_ivl, state.options.reconnect_ivl_max)
      };
      TcpConnecter::create_and_spawn(
        child_handle,
        endpoint,
        config,
        engine_config,
        reconnect,
        core.context.clone(),
        core.handle,
      );
      // The connection completes asynchronously; connect() only initiates.
      let _ = reply_tx.send(Ok(()));
    }

    #[cfg(all(feature = "ipc", unix))]
    Endpoint::Ipc(path, uri) => {
      let child_handle = core.context.inner().next_handle();
      let (_, engine_config) = transport_configs(core);
      let reconnect = {
        let state = core.core_state.read();
        (state.options.reconnect_ivl, state.options.reconnect_ivl_max)
      };
      crate::transport::ipc::IpcConnecter::create_and_spawn(
        child_handle,
        uri,
        path,
        engine_config,
        reconnect,
        core.context.clone(),
        core.handle,
      );
      let _ = reply_tx.send(Ok(()));
    }

    #[cfg(feature = "inproc")]
    Endpoint::Inproc(name) => {
      // Inproc connects complete synchronously against the binder registry,
      // so the user reply waits for the binder's accept/reject.
      let core_clone = core.clone();
      let logic_clone = socket_logic.clone();
      tokio::spawn(async move {
        crate::transport::inproc::connect_inproc(name, core_clone, logic_clone, reply_tx).await;
      });
    }

    #[cfg(not(all(feature = "ipc", unix)))]
    #[allow(unreachable_patterns)]
    _ => {
      let _ = reply_tx.send(Err(ZmqError::TransportNotSupported("ipc disabled".into())));
    }
  }
}

async fn unbind_endpoint(core: &Arc<SocketCore>, endpoint: &str) -> Result<(), ZmqError> {
  #[cfg(feature = "inproc")]
  if let Some(name) = endpoint.strip_prefix("inproc://") {
    let mut state = core.core_state.write();
    if state.bound_inproc_names.remove(name) {
      drop(state);
      core.context.inner().unregister_inproc(name);
      return Ok(());
    }
    return Err(ZmqError::MalformedEndpoint(endpoint.to_string()));
  }

  let removed = core.core_state.write().endpoints.remove(endpoint);
  match removed {
    Some(info) if info.endpoint_type == EndpointType::Listener => {
      if let Some(listener_mailbox) = &info.mailbox {
        let _ = listener_mailbox.send(Command::Stop).await;
      }
      Ok(())
    }
    Some(info) => {
      // Not a listener; put it back untouched.
      core.core_state.write().endpoints.insert(endpoint.to_string(), info);
      Err(ZmqError::MalformedEndpoint(endpoint.to_string()))
    }
    None => Err(ZmqError::MalformedEndpoint(endpoint.to_string())),
  }
}

async fn disconnect_endpoint(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  endpoint: &str,
) -> Result<(), ZmqError> {
  #[cfg(feature = "inproc")]
  if endpoint.starts_with("inproc://") {
    return crate::transport::inproc::disconnect_inproc(endpoint, core, socket_logic).await;
  }

  // A connection may be keyed by its concrete peer URI while the user only
  // knows the target they connected to.
  let uri_to_remove = {
    let state = core.core_state.read();
    state
      .endpoints
      .iter()
      .find(|(uri, info)| {
        info.endpoint_type == EndpointType::Session
          && (*uri == endpoint || info.target_endpoint_uri.as_deref() == Some(endpoint))
      })
      .map(|(uri, _)| uri.clone())
  };

  let Some(uri) = uri_to_remove else {
    return Err(ZmqError::MalformedEndpoint(endpoint.to_string()));
  };

  pipe_manager::teardown_session_endpoint(core, socket_logic, &uri, false).await;
  Ok(())
}

async fn handle_set_option(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  option: i32,
  value: &[u8],
) -> Result<(), ZmqError> {
  use options::*;

  match option {
    SUBSCRIBE | UNSUBSCRIBE => {
      // Pattern-owned options (SUB/XSUB reject or accept as appropriate).
      return socket_logic.set_pattern_option(option, value).await;
    }
    _ => {}
  }

  let is_pattern_option = {
    let mut state = core.core_state.write();
    let opts: &mut SocketOptions = &mut state.options;

    match option {
      SNDHWM => {
        opts.sndhwm = parse_hwm_option(value, option)?;
        false
      }
      RCVHWM => {
        opts.rcvhwm = parse_hwm_option(value, option)?;
        false
      }
      LINGER => {
        opts.linger = parse_linger_option(value)?;
        false
      }
      RCVTIMEO => {
        opts.rcvtimeo = parse_timeout_option(value, option)?;
        false
      }
      SNDTIMEO => {
        opts.sndtimeo = parse_timeout_option(value, option)?;
        false
      }
      RECONNECT_IVL => {
        opts.reconnect_ivl = parse_reconnect_ivl_option(value)?;
        false
      }
      RECONNECT_IVL_MAX => {
        opts.reconnect_ivl_max = parse_reconnect_ivl_max_option(value)?;
        false
      }
      BACKLOG => {
        opts.backlog = match parse_i32_option(value, option)? {
          n @ 0.. => n,
          _ => return Err(ZmqError::BadOptionValue(option)),
        };
        false
      }
      SNDBUF => {
        opts.sndbuf = parse_buffer_size_option(value, option)?;
        false
      }
      RCVBUF => {
        opts.rcvbuf = parse_buffer_size_option(value, option)?;
        false
      }
      ROUTING_ID => {
        opts.routing_id = Some(parse_blob_option(value, option)?);
        false
      }
      ROUTER_MANDATORY => {
        opts.router_mandatory = parse_bool_option(value, option)?;
        false
      }
      XPUB_VERBOSE => {
        opts.xpub_verbose = parse_bool_option(value, option)?;
        false
      }
      IPV6 => {
        opts.ipv6 = parse_bool_option(value, option)?;
        false
      }
      TCP_KEEPALIVE => {
        opts.tcp_keepalive_enabled = parse_keepalive_mode_option(value)?;
        false
      }
      TCP_KEEPALIVE_IDLE => {
        opts.tcp_keepalive_idle = parse_secs_duration_option(value, option)?;
        false
      }
      TCP_KEEPALIVE_CNT => {
        opts.tcp_keepalive_count = parse_u32_option(value, option)?;
        false
      }
      TCP_KEEPALIVE_INTVL => {
        opts.tcp_keepalive_interval = parse_secs_duration_option(value, option)?;
        false
      }
      TYPE | RCVMORE | LAST_ENDPOINT => return Err(ZmqError::UnknownOption(option)), // read-only
      _ => true,
    }
  };

  if is_pattern_option {
    return socket_logic.set_pattern_option(option, value).await;
  }
  Ok(())
}

async fn handle_get_option(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  option: i32,
) -> Result<Vec<u8>, ZmqError> {
  use options::*;

  fn ms_or_minus_one(d: Option<std::time::Duration>) -> i32 {
    d.map_or(-1, |d| d.as_millis().try_into().unwrap_or(i32::MAX))
  }

  let local_result = {
    let state = core.core_state.read();
    let opts = &state.options;

    match option {
      SNDHWM => Some(Ok((opts.sndhwm as i32).to_ne_bytes().to_vec())),
      RCVHWM => Some(Ok((opts.rcvhwm as i32).to_ne_bytes().to_vec())),
      LINGER => Some(Ok(ms_or_minus_one(opts.linger).to_ne_bytes().to_vec())),
      RCVTIMEO => Some(Ok(ms_or_minus_one(opts.rcvtimeo).to_ne_bytes().to_vec())),
      SNDTIMEO => Some(Ok(ms_or_minus_one(opts.sndtimeo).to_ne_bytes().to_vec())),
      RECONNECT_IVL => Some(Ok(
        opts.reconnect_ivl.map_or(0, |d| d.as_millis() as i32).to_ne_bytes().to_vec(),
      )),
      RECONNECT_IVL_MAX => Some(Ok(
        opts
          .reconnect_ivl_max
          .map_or(0, |d| d.as_millis() as i32)
          .to_ne_bytes()
          .to_vec(),
      )),
      BACKLOG => Some(Ok(opts.backlog.to_ne_bytes().to_vec())),
      SNDBUF => Some(Ok((opts.sndbuf.map_or(0, |n| n as i32)).to_ne_bytes().to_vec())),
      RCVBUF => Some(Ok((opts.rcvbuf.map_or(0, |n| n as i32)).to_ne_bytes().to_vec())),
      ROUTING_ID => Some(
        opts
          .routing_id
          .as_ref()
          .map(|blob| blob.to_vec())
          .ok_or_else(|| ZmqError::InvalidArgument("ROUTING_ID not set".into())),
      ),
      ROUTER_MANDATORY => Some(Ok((opts.router_mandatory as i32).to_ne_bytes().to_vec())),
      XPUB_VERBOSE => Some(Ok((opts.xpub_verbose as i32).to_ne_bytes().to_vec())),
      IPV6 => Some(Ok((opts.ipv6 as i32).to_ne_bytes().to_vec())),
      TCP_KEEPALIVE => Some(Ok(opts.tcp_keepalive_enabled.to_ne_bytes().to_vec())),
      TCP_KEEPALIVE_IDLE => Some(Ok(
        opts
          .tcp_keepalive_idle
          .map_or(0, |d| d.as_secs() as i32)
          .to_ne_bytes()
          .to_vec(),
      )),
      TCP_KEEPALIVE_CNT => Some(Ok(opts.tcp_keepalive_count.map_or(0, |c| c as i32).to_ne_bytes().to_vec())),
      TCP_KEEPALIVE_INTVL => Some(Ok(
        opts
          .tcp_keepalive_interval
          .map_or(0, |d| d.as_secs() as i32)
          .to_ne_bytes()
          .to_vec(),
      )),
      TYPE => Some(Ok((state.socket_type as i32).to_ne_bytes().to_vec())),
      LAST_ENDPOINT => Some(
        state
          .last_bound_endpoint
          .as_ref()
          .map(|uri| uri.as_bytes().to_vec())
          .ok_or_else(|| ZmqError::InvalidArgument("No endpoint bound".into())),
      ),
      RCVMORE => None,
      _ => None,
    }
  };

  match local_result {
    Some(result) => result,
    None => socket_logic.get_pattern_option(option).await,
  }
}
