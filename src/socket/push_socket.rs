use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::{send_via_load_balancer, SocketCore};
use crate::socket::patterns::LoadBalancer;
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

/// PUSH: load-balances outgoing messages over connected PULL peers.
/// Receiving is not supported.
#[derive(Debug)]
pub(crate) struct PushSocket {
  core: Arc<SocketCore>,
  load_balancer: LoadBalancer,
  /// Frames of the logical message being assembled by frame-wise `send`.
  current_out: TokioMutex<Vec<Msg>>,
  pipe_read_to_write_id: Mutex<HashMap<usize, usize>>,
}

impl PushSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    Self {
      core,
      load_balancer: LoadBalancer::new(),
      current_out: TokioMutex::new(Vec::new()),
      pipe_read_to_write_id: Mutex::new(HashMap::new()),
    }
  }

  fn sndtimeo(&self) -> Option<Duration> {
    self.core.core_state.read().options.sndtimeo
  }
}

#[async_trait]
impl ISocket for PushSocket {
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
    self.send_multipart(frames).await
  }

  async fn recv(&self) -> Result<Msg, ZmqError> {
    Err(ZmqError::WrongSocketType("PUSH"))
  }

  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    if frames.is_empty() {
      return Ok(());
    }
    let timeout_opt = self.sndtimeo();
    send_via_load_balancer(&self.core, &self.load_balancer, frames, timeout_opt)
      .await
      .map(|_| ())
  }

  async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError> {
    Err(ZmqError::WrongSocketType("PUSH"))
  }

  async fn set_pattern_option(&self, option: i32, _value: &[u8]) -> Result<(), ZmqError> {
    Err(ZmqError::OptionNotSupported(option))
  }
  async fn get_pattern_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    Err(ZmqError::OptionNotSupported(option))
  }

  async fn handle_pipe_event(&self, pipe_id: usize, event: Command) -> Result<(), ZmqError> {
    if let Command::PipeMessageReceived { .. } = event {
      // PULL peers have nothing to say to a PUSH socket.
      tracing::trace!(handle = self.core.handle, pipe_id, "PUSH dropping inbound frame");
    }
    Ok(())
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    self.pipe_read_to_write_id.lock().insert(pipe_read_id, pipe_write_id);
    self.load_balancer.add_pipe(pipe_write_id);
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    if let Some(write_id) = self.pipe_read_to_write_id.lock().remove(&pipe_read_id) {
      self.load_balancer.remove_pipe(write_id);
    }
  }

  async fn stop(&self) {
    self.load_balancer.close();
  }

  async fn send_ready(&self) -> Result<(), ZmqError> {
    if self.load_balancer.wait_for_pipe().await {
      Ok(())
    } else {
      Err(self.core.closed_error())
    }
  }
}
