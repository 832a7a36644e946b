//! In-process transport: connector and binder live in the same process, so
//! the pipe pair is created by the connector and offered to the binder over
//! the event bus. No session or engine is involved.

use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::pipe::run_pipe_reader_task;
use crate::runtime::{OneShotSender, SystemEvent};
use crate::socket::core::{EndpointInfo, EndpointType, SocketCore};
use crate::socket::ISocket;

use std::sync::Arc;
use tokio::sync::oneshot;

/// Connector half of an inproc connection. Creates both pipe directions,
/// publishes an `InprocBindingRequest`, and waits for the binder's verdict
/// before replying to the user's `connect`.
pub(crate) async fn connect_inproc(
  name: String,
  core: Arc<SocketCore>,
  socket_logic: Arc<dyn ISocket>,
  reply_tx_user: oneshot::Sender<Result<(), ZmqError>>,
) {
  let handle = core.handle;
  let connector_uri = format!("inproc://{}", name);

  if core.context.inner().lookup_inproc(&name).is_none() {
    let _ = reply_tx_user.send(Err(ZmqError::PeerRefused(connector_uri)));
    return;
  }

  let (sndhwm, rcvhwm, identity) = {
    let state = core.core_state.read();
    (
      state.options.sndhwm.max(1),
      state.options.rcvhwm.max(1),
      state.options.routing_id.clone(),
    )
  };

  let pipe_write_id = core.context.inner().next_handle();
  let pipe_read_id = core.context.inner().next_handle();

  let (tx_connector_to_binder, rx_binder_from_connector) = async_channel::bounded::<Msg>(sndhwm);
  let (tx_binder_to_connector, rx_connector_from_binder) = async_channel::bounded::<Msg>(rcvhwm);

  let reader_task = tokio::spawn(run_pipe_reader_task(
    handle,
    core.command_sender(),
    socket_logic.clone(),
    pipe_read_id,
    rx_connector_from_binder,
  ));

  {
    let mut state = core.core_state.write();
    state.pipes_tx.insert(pipe_write_id, tx_connector_to_binder);
    state.pipe_reader_task_handles.insert(pipe_read_id, reader_task);
    state.pipe_read_id_to_endpoint_uri.insert(pipe_read_id, connector_uri.clone());
    state.endpoints.insert(
      connector_uri.clone(),
      EndpointInfo {
        mailbox: None,
        task_handle: None,
        endpoint_type: EndpointType::Session,
        endpoint_uri: connector_uri.clone(),
        pipe_ids: Some((pipe_write_id, pipe_read_id)),
        handle_id: core.context.inner().next_handle(),
        target_endpoint_uri: Some(connector_uri.clone()),
        is_outbound: true,
      },
    );
  }

  let (reply_tx, reply_rx) = oneshot::channel();
  let request = SystemEvent::InprocBindingRequest {
    target_inproc_name: name.clone(),
    connector_uri: connector_uri.clone(),
    binder_pipe_tx_to_connector: tx_binder_to_connector,
    binder_pipe_rx_from_connector: rx_binder_from_connector,
    connector_pipe_write_id: pipe_write_id,
    connector_pipe_read_id: pipe_read_id,
    connector_identity: identity,
    reply_tx: OneShotSender::new(reply_tx),
  };

  if core.context.event_bus().publish(request).is_err() {
    cleanup_connector_state(&core, &connector_uri, pipe_write_id, pipe_read_id);
    let _ = reply_tx_user.send(Err(ZmqError::Internal("Event bus closed during inproc connect".into())));
    return;
  }

  match reply_rx.await {
    Ok(Ok(binder_identity)) => {
      tracing::debug!(handle, uri = %connector_uri, "inproc connection established");
      socket_logic
        .pipe_attached(pipe_read_id, pipe_write_id, binder_identity.as_deref())
        .await;
      let _ = reply_tx_user.send(Ok(()));
    }
    Ok(Err(e)) => {
      cleanup_connector_state(&core, &connector_uri, pipe_write_id, pipe_read_id);
      let _ = reply_tx_user.send(Err(e));
    }
    Err(_) => {
      // Binder disappeared without answering.
      cleanup_connector_state(&core, &connector_uri, pipe_write_id, pipe_read_id);
      let _ = reply_tx_user.send(Err(ZmqError::PeerRefused(connector_uri)));
    }
  }
}

fn cleanup_connector_state(core: &Arc<SocketCore>, uri: &str, pipe_write_id: usize, pipe_read_id: usize) {
  let mut state = core.core_state.write();
  state.endpoints.remove(uri);
  state.remove_pipe_state(pipe_write_id, pipe_read_id);
}

/// Connector-side disconnect: drop local pipe state and tell the binder so
/// it can drop its mirrored ends.
pub(crate) async fn disconnect_inproc(
  endpoint_uri: &str,
  core: &Arc<SocketCore>,
  socket_logic: &Arc<dyn ISocket>,
) -> Result<(), ZmqError> {
  let name = endpoint_uri
    .strip_prefix("inproc://")
    .filter(|n| !n.is_empty())
    .ok_or_else(|| ZmqError::MalformedEndpoint(endpoint_uri.to_string()))?
    .to_string();

  let removed = core.core_state.write().endpoints.remove(endpoint_uri);
  let Some(info) = removed else {
    return Err(ZmqError::MalformedEndpoint(endpoint_uri.to_string()));
  };
  let Some((pipe_write_id, pipe_read_id)) = info.pipe_ids else {
    return Err(ZmqError::Internal("Inproc endpoint record missing pipe IDs".into()));
  };

  let _ = core.context.event_bus().publish(SystemEvent::InprocPipePeerClosed {
    target_inproc_name: name,
    closed_by_connector_pipe_read_id: pipe_read_id,
  });

  core.core_state.write().remove_pipe_state(pipe_write_id, pipe_read_id);
  socket_logic.pipe_detached(pipe_read_id).await;
  tracing::debug!(handle = core.handle, uri = %endpoint_uri, "inproc connection disconnected");
  Ok(())
}
