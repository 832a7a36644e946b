#[cfg(feature = "inproc")]
use crate::message::Blob;
use crate::message::Msg;
use crate::runtime::pipe::run_pipe_reader_task;
#[cfg(feature = "inproc")]
use crate::runtime::OneShotSender;
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::{EndpointInfo, EndpointType, SocketCore};
use crate::socket::ISocket;

#[cfg(feature = "inproc")]
use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use std::sync::Arc;

/// Wires a freshly established connection to the socket: creates the pipe
/// pair, spawns the reader task, records the endpoint, and hands the session
/// its channel ends.
pub(crate) async fn attach_new_connection(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  endpoint_uri: String,
  target_endpoint_uri: String,
  session_mailbox: MailboxSender,
  session_handle_id: usize,
  is_outbound: bool,
) {
  let handle = core.handle;
  let pipe_write_id = core.context.inner().next_handle();
  let pipe_read_id = core.context.inner().next_handle();

  let (sndhwm, rcvhwm) = {
    let state = core.core_state.read();
    (state.options.sndhwm.max(1), state.options.rcvhwm.max(1))
  };
  let (tx_core_to_sess, rx_core_to_sess) = async_channel::bounded::<Msg>(sndhwm);
  let (tx_sess_to_core, rx_sess_to_core) = async_channel::bounded::<Msg>(rcvhwm);

  let reader_task = tokio::spawn(run_pipe_reader_task(
    handle,
    core.command_sender(),
    socket_logic.clone(),
    pipe_read_id,
    rx_sess_to_core,
  ));

  {
    let mut state = core.core_state.write();
    state.pipes_tx.insert(pipe_write_id, tx_core_to_sess);
    state.pipe_reader_task_handles.insert(pipe_read_id, reader_task);
    state
      .pipe_read_id_to_endpoint_uri
      .insert(pipe_read_id, endpoint_uri.clone());
    state.endpoints.insert(
      endpoint_uri.clone(),
      EndpointInfo {
        mailbox: Some(session_mailbox.clone()),
        task_handle: None,
        endpoint_type: EndpointType::Session,
        endpoint_uri: endpoint_uri.clone(),
        pipe_ids: Some((pipe_write_id, pipe_read_id)),
        handle_id: session_handle_id,
        target_endpoint_uri: Some(target_endpoint_uri),
        is_outbound,
      },
    );
  }

  // The session's read/write IDs mirror the core's write/read IDs.
  let attach_cmd = Command::AttachPipe {
    rx_from_core: rx_core_to_sess,
    tx_to_core: tx_sess_to_core,
    pipe_read_id: pipe_write_id,
    pipe_write_id: pipe_read_id,
  };
  if session_mailbox.send(attach_cmd).await.is_err() {
    tracing::warn!(handle, uri = %endpoint_uri, "session vanished before AttachPipe, cleaning up");
    teardown_session_endpoint(core, socket_logic, &endpoint_uri, false).await;
    return;
  }

  socket_logic.pipe_attached(pipe_read_id, pipe_write_id, None).await;
  tracing::debug!(
    handle,
    uri = %endpoint_uri,
    pipe_read_id,
    pipe_write_id,
    "connection attached"
  );
}

/// Handles a pipe whose peer closed its sending end (session gone). Cleans
/// up and, for outbound endpoints with reconnection enabled, spawns a new
/// connecter towards the original target.
pub(crate) async fn handle_pipe_closed(core: &Arc<SocketCore>, socket_logic: &Arc<dyn ISocket>, pipe_read_id: usize) {
  let uri = core.core_state.read().pipe_read_id_to_endpoint_uri.get(&pipe_read_id).cloned();
  let Some(uri) = uri else {
    // Already cleaned up (e.g. via disconnect or shutdown).
    socket_logic.pipe_detached(pipe_read_id).await;
    return;
  };

  let reconnect_target = teardown_session_endpoint(core, socket_logic, &uri, true).await;

  if let Some(target) = reconnect_target {
    maybe_respawn_connecter(core, target);
  }
}

/// Cleanup path for binder-side inproc pipes, identified by write ID.
#[cfg(feature = "inproc")]
pub(crate) async fn handle_pipe_closed_by_write_id(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  pipe_write_id: usize,
) {
  let uri = {
    let state = core.core_state.read();
    state
      .endpoints
      .iter()
      .find(|(_, info)| matches!(info.pipe_ids, Some((w, _)) if w == pipe_write_id))
      .map(|(uri, _)| uri.clone())
  };
  if let Some(uri) = uri {
    teardown_session_endpoint(core, socket_logic, &uri, false).await;
  }
}

/// Removes one session endpoint: stops the session, drops pipe state, and
/// notifies the pattern logic. Returns the reconnect target when the caller
/// should re-establish the connection.
pub(crate) async fn teardown_session_endpoint(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  endpoint_uri: &str,
  peer_initiated: bool,
) -> Option<String> {
  let removed = core.core_state.write().endpoints.remove(endpoint_uri);
  let Some(info) = removed else {
    return None;
  };

  if let Some(child_mailbox) = &info.mailbox {
    let _ = child_mailbox.send(Command::Stop).await;
  }

  let mut reconnect_target = None;
  if let Some((pipe_write_id, pipe_read_id)) = info.pipe_ids {
    core.core_state.write().remove_pipe_state(pipe_write_id, pipe_read_id);
    socket_logic.pipe_detached(pipe_read_id).await;
  }

  if peer_initiated && info.is_outbound && core.is_running() {
    let reconnect_enabled = core.core_state.read().options.reconnect_ivl.is_some();
    if reconnect_enabled {
      reconnect_target = info.target_endpoint_uri.clone();
    }
  }

  tracing::debug!(handle = core.handle, uri = %endpoint_uri, "session endpoint torn down");
  reconnect_target
}

fn maybe_respawn_connecter(core: &Arc<SocketCore>, target_endpoint_uri: String) {
  let child_handle = core.context.inner().next_handle();
  let (config, engine_config, reconnect) = {
    let state = core.core_state.read();
    (
      state.options.tcp_config(),
      crate::engine::EngineConfig {
        socket_type_name: state.options.socket_type_name.clone(),
        routing_id: state.options.routing_id.clone(),
      },
      (state.options.reconnect_ivl, state.options.reconnect_ivl_max),
    )
  };

  tracing::debug!(handle = core.handle, uri = %target_endpoint_uri, "re-establishing outbound connection");
  if target_endpoint_uri.starts_with("tcp://") {
    crate::transport::tcp::TcpConnecter::create_and_spawn(
      child_handle,
      target_endpoint_uri,
      config,
      engine_config,
      reconnect,
      core.context.clone(),
      core.handle,
    );
  } else {
    #[cfg(all(feature = "ipc", unix))]
    if let Some(path) = target_endpoint_uri.strip_prefix("ipc://") {
      crate::transport::ipc::IpcConnecter::create_and_spawn(
        child_handle,
        target_endpoint_uri.clone(),
        std::path::PathBuf::from(path),
        engine_config,
        reconnect,
        core.context.clone(),
        core.handle,
      );
    }
  }
}

/// Binder-side half of an inproc connect: adopt the connector's pipe ends,
/// spawn a reader, and reply with our identity.
#[cfg(feature = "inproc")]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn accept_inproc_binding(
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
  connector_uri: String,
  binder_pipe_tx_to_connector: AsyncSender<Msg>,
  binder_pipe_rx_from_connector: AsyncReceiver<Msg>,
  connector_pipe_write_id: usize,
  connector_pipe_read_id: usize,
  connector_identity: Option<Blob>,
  reply_tx: OneShotSender,
) {
  let handle = core.handle;
  if !core.is_running() {
    reply_tx.take_and_send(Err(core.closed_error()));
    return;
  }

  // The binder writes where the connector reads, and vice versa.
  let binder_write_id = connector_pipe_read_id;
  let binder_read_id = connector_pipe_write_id;

  let reader_task = tokio::spawn(run_pipe_reader_task(
    handle,
    core.command_sender(),
    socket_logic.clone(),
    binder_read_id,
    binder_pipe_rx_from_connector,
  ));

  // Several connectors may share one inproc name; key each by its pipe.
  let endpoint_key = format!("{}#{}", connector_uri, binder_read_id);
  {
    let mut state = core.core_state.write();
    state.pipes_tx.insert(binder_write_id, binder_pipe_tx_to_connector);
    state.pipe_reader_task_handles.insert(binder_read_id, reader_task);
    state.pipe_read_id_to_endpoint_uri.insert(binder_read_id, endpoint_key.clone());
    state.endpoints.insert(
      endpoint_key.clone(),
      EndpointInfo {
        mailbox: None,
        task_handle: None,
        endpoint_type: EndpointType::Session,
        endpoint_uri: endpoint_key,
        pipe_ids: Some((binder_write_id, binder_read_id)),
        handle_id: core.context.inner().next_handle(),
        target_endpoint_uri: None,
        is_outbound: false,
      },
    );
  }

  let binder_identity = core.core_state.read().options.routing_id.clone();
  reply_tx.take_and_send(Ok(binder_identity));

  socket_logic
    .pipe_attached(binder_read_id, binder_write_id, connector_identity.as_deref())
    .await;
  tracing::debug!(handle, pipe_read_id = binder_read_id, "inproc connection accepted");
}
