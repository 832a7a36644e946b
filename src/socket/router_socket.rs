use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::{send_frames_with_timeout, SocketCore};
use crate::socket::options::RCVMORE;
use crate::socket::patterns::{IncomingMessageOrchestrator, RouterMap};
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

/// ROUTER: every received message is prefixed with the sending peer's
/// identity; the first frame of every sent message selects the destination
/// peer and is stripped. Unroutable messages are dropped unless
/// ROUTER_MANDATORY asks for EHOSTUNREACH.
#[derive(Debug)]
pub(crate) struct RouterSocket {
  core: Arc<SocketCore>,
  router_map: RouterMap,
  incoming: IncomingMessageOrchestrator,
  current_out: TokioMutex<Vec<Msg>>,
  pipe_read_to_write_id: Mutex<HashMap<usize, usize>>,
}

impl RouterSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    let rcvhwm = core.core_state.read().options.rcvhwm;
    let incoming = IncomingMessageOrchestrator::new(core.handle, rcvhwm);
    Self {
      core,
      router_map: RouterMap::new(),
      incoming,
      current_out: TokioMutex::new(Vec::new()),
      pipe_read_to_write_id: Mutex::new(HashMap::new()),
    }
  }

  fn sndtimeo(&self) -> Option<Duration> {
    self.core.core_state.read().options.sndtimeo
  }

  fn rcvtimeo(&self) -> Option<Duration> {
    self.core.core_state.read().options.rcvtimeo
  }

  fn router_mandatory(&self) -> bool {
    self.core.core_state.read().options.router_mandatory
  }

  fn map_closed(&self, e: ZmqError) -> ZmqError {
    match e {
      ZmqError::SocketClosed => self.core.closed_error(),
      e => e,
    }
  }

  /// Anonymous peers get a generated 5-byte identity with a zero lead byte,
  /// which user-assigned identities must not start with.
  fn generate_identity() -> Blob {
    let mut id = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut id[1..]);
    id[0] = 0;
    Blob::from(id.to_vec())
  }

  /// Routes one fully assembled message: first frame is the destination.
  async fn route_message(&self, mut frames: Vec<Msg>) -> Result<(), ZmqError> {
    if frames.is_empty() {
      return Ok(());
    }
    let identity = Blob::from(frames.remove(0).data_bytes().unwrap_or_default());
    if frames.is_empty() {
      // Identity with no payload routes nothing.
      return Ok(());
    }

    let mandatory = self.router_mandatory();
    let Some(pipe_write_id) = self.router_map.pipe_for_identity(&identity) else {
      return if mandatory {
        Err(ZmqError::UnroutablePeer(format!("Unknown peer identity ({} bytes)", identity.len())))
      } else {
        tracing::trace!(handle = self.core.handle, "ROUTER dropping message for unknown identity");
        Ok(())
      };
    };
    let Some(sender) = self.core.core_state.read().get_pipe_sender(pipe_write_id) else {
      self.router_map.remove_peer_by_write_pipe(pipe_write_id);
      return if mandatory {
        Err(ZmqError::UnroutablePeer("Peer connection disappeared".into()))
      } else {
        Ok(())
      };
    };

    let last = frames.len() - 1;
    for (i, frame) in frames.iter_mut().enumerate() {
      if i < last {
        frame.set_flags(frame.flags() | MsgFlags::MORE);
      } else {
        frame.set_flags(frame.flags() & !MsgFlags::MORE);
      }
    }

    let timeout_opt = self.sndtimeo();
    match send_frames_with_timeout(&sender, frames, timeout_opt, self.core.handle, pipe_write_id).await {
      Ok(()) => Ok(()),
      Err(ZmqError::Disconnected) => {
        if mandatory {
          Err(ZmqError::UnroutablePeer("Peer disconnected during send".into()))
        } else {
          Ok(())
        }
      }
      Err(e) => Err(e),
    }
  }
}

#[async_trait]
impl ISocket for RouterSocket {
  fn core(&self) -> &Arc<SocketCore> {
    &self.core
  }
  fn mailbox(&self) -> MailboxSender {
    self.core.command_sender()
  }

  async fn bind(&self, endpoint: &str) -> Result<(), ZmqError> {
    delegate_to_core!(self, UserBind, endpoint: endpoint.to_string())
  }
  async fn connect(&self, endpoint: &str) -> Result<(), ZmqError> {
    delegate_to_core!(self, UserConnect, endpoint: endpoint.to_string())
  }
  async fn disconnect(&self, endpoint: &str) -> Result<(), ZmqError> {
    delegate_to_core!(self, UserDisconnect, endpoint: endpoint.to_string())
  }
  async fn unbind(&self, endpoint: &str) -> Result<(), ZmqError> {
    delegate_to_core!(self, UserUnbind, endpoint: endpoint.to_string())
  }
  async fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    delegate_to_core!(self, UserSetOpt, option: option, value: value.to_vec())
  }
  async fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    delegate_to_core!(self, UserGetOpt, option: option)
  }
  async fn close(&self) -> Result<(), ZmqError> {
    delegate_to_core!(self, UserClose,)
  }

  async fn send(&self, msg: Msg) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    let mut current = self.current_out.lock().await;
    if msg.is_more() {
      current.push(msg);
      return Ok(());
    }
    let mut frames = std::mem::take(&mut *current);
    frames.push(msg);
    drop(current);
    self.route_message(frames).await
  }

  async fn recv(&self) -> Result<Msg, ZmqError> {
    let timeout = self.rcvtimeo();
    self.incoming.recv_frame(timeout).await.map_err(|e| self.map_closed(e))
  }

  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    self.route_message(frames).await
  }

  async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError> {
    let timeout = self.rcvtimeo();
    self
      .incoming
      .recv_logical(timeout)
      .await
      .map(|(_, frames)| frames)
      .map_err(|e| self.map_closed(e))
  }

  async fn set_pattern_option(&self, option: i32, _value: &[u8]) -> Result<(), ZmqError> {
    Err(ZmqError::OptionNotSupported(option))
  }
  async fn get_pattern_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    match option {
      RCVMORE => Ok((self.incoming.rcvmore() as i32).to_ne_bytes().to_vec()),
      _ => Err(ZmqError::OptionNotSupported(option)),
    }
  }

  async fn handle_pipe_event(&self, pipe_id: usize, event: Command) -> Result<(), ZmqError> {
    let Command::PipeMessageReceived { msg, .. } = event else {
      return Ok(());
    };
    if msg.is_command() {
      return Ok(());
    }
    let Some(frames) = self.incoming.accumulate_pipe_frame(pipe_id, msg) else {
      return Ok(());
    };

    // Prefix the peer's identity so the application can route the reply.
    let identity = match self.router_map.identity_for_read_pipe(pipe_id) {
      Some(identity) => identity,
      None => {
        let generated = Self::generate_identity();
        let write_id = self.pipe_read_to_write_id.lock().get(&pipe_id).copied();
        if let Some(write_id) = write_id {
          self.router_map.add_peer(generated.clone(), pipe_id, write_id);
        }
        generated
      }
    };

    let mut prefixed = Vec::with_capacity(frames.len() + 1);
    let mut id_frame = Msg::from_bytes(bytes::Bytes::copy_from_slice(&identity));
    id_frame.set_flags(MsgFlags::MORE | MsgFlags::IDENTITY);
    prefixed.push(id_frame);
    prefixed.extend(frames);

    self.incoming.queue_message(pipe_id, prefixed).await
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, peer_identity: Option<&[u8]>) {
    self.pipe_read_to_write_id.lock().insert(pipe_read_id, pipe_write_id);
    let identity = match peer_identity {
      Some(id) if !id.is_empty() => Blob::from(id.to_vec()),
      _ => Self::generate_identity(),
    };
    self.router_map.add_peer(identity, pipe_read_id, pipe_write_id);
  }

  async fn update_peer_identity(&self, pipe_read_id: usize, identity: Option<Blob>) {
    let Some(identity) = identity else { return };
    if identity.is_empty() {
      return;
    }
    let write_id = self.pipe_read_to_write_id.lock().get(&pipe_read_id).copied();
    if let Some(write_id) = write_id {
      self.router_map.add_peer(identity, pipe_read_id, write_id);
    }
  }

  async fn pipe_detached(&self, pipe_read_id: usize) {
    self.pipe_read_to_write_id.lock().remove(&pipe_read_id);
    self.router_map.remove_peer_by_read_pipe(pipe_read_id);
    self.incoming.clear_pipe_state(pipe_read_id);
  }

  async fn stop(&self) {
    self.incoming.close();
  }

  async fn recv_ready(&self) -> Result<(), ZmqError> {
    if self.incoming.wait_readable().await {
      Ok(())
    } else {
      Err(self.core.closed_error())
    }
  }

  async fn send_ready(&self) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    Ok(())
  }
}
