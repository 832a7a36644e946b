use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::{send_frames_with_timeout, SocketCore};
use crate::socket::options::RCVMORE;
use crate::socket::patterns::IncomingMessageOrchestrator;
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, Notify};

/// PAIR: exactly one peer, bidirectional, no routing and no balancing.
/// Additional connection attempts while a peer is attached are refused.
#[derive(Debug)]
pub(crate) struct PairSocket {
  core: Arc<SocketCore>,
  incoming: IncomingMessageOrchestrator,
  /// (read ID, write ID) of the one attached peer.
  peer: Mutex<Option<(usize, usize)>>,
  peer_attached: Arc<Notify>,
  closed: AtomicBool,
  current_out: TokioMutex<Vec<Msg>>,
}

impl PairSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    let rcvhwm = core.core_state.read().options.rcvhwm;
    let incoming = IncomingMessageOrchestrator::new(core.handle, rcvhwm);
    Self {
      core,
      incoming,
      peer: Mutex::new(None),
      peer_attached: Arc::new(Notify::new()),
      closed: AtomicBool::new(false),
      current_out: TokioMutex::new(Vec::new()),
    }
  }

  fn sndtimeo(&self) -> Option<Duration> {
    self.core.core_state.read().options.sndtimeo
  }

  fn rcvtimeo(&self) -> Option<Duration> {
    self.core.core_state.read().options.rcvtimeo
  }

  fn map_closed(&self, e: ZmqError) -> ZmqError {
    match e {
      ZmqError::SocketClosed => self.core.closed_error(),
      e => e,
    }
  }

  /// Waits until a peer is attached, honoring the SNDTIMEO policy.
  async fn wait_for_peer(&self, timeout_opt: Option<Duration>) -> Result<usize, ZmqError> {
    loop {
      if self.closed.load(Ordering::Acquire) {
        return Err(self.core.closed_error());
      }
      if let Some((_, write_id)) = *self.peer.lock() {
        return Ok(write_id);
      }
      match timeout_opt {
        Some(d) if d.is_zero() => return Err(ZmqError::WouldBlock),
        Some(d) => {
          let notified = self.peer_attached.notified();
          tokio::pin!(notified);
          notified.as_mut().enable();
          if self.peer.lock().is_some() || self.closed.load(Ordering::Acquire) {
            continue;
          }
          if tokio::time::timeout(d, notified).await.is_err() {
            return Err(ZmqError::TimedOut);
          }
        }
        None => {
          let notified = self.peer_attached.notified();
          tokio::pin!(notified);
          notified.as_mut().enable();
          if self.peer.lock().is_some() || self.closed.load(Ordering::Acquire) {
            continue;
          }
          notified.await;
        }
      }
    }
  }
}

#[async_trait]
impl ISocket for PairSocket {
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
    let timeout = self.rcvtimeo();
    self.incoming.recv_frame(timeout).await.map_err(|e| self.map_closed(e))
  }

  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    if frames.is_empty() {
      return Ok(());
    }
    let timeout_opt = self.sndtimeo();
    loop {
      let write_id = self.wait_for_peer(timeout_opt).await?;
      let Some(sender) = self.core.core_state.read().get_pipe_sender(write_id) else {
        // Peer raced away between lookup and send; wait for the next one.
        continue;
      };
      match send_frames_with_timeout(&sender, frames.clone(), timeout_opt, self.core.handle, write_id).await {
        Ok(()) => return Ok(()),
        Err(ZmqError::Disconnected) => continue,
        Err(e) => return Err(e),
      }
    }
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
    if let Command::PipeMessageReceived { msg, .. } = event {
      if msg.is_command() {
        return Ok(());
      }
      // Frames from a refused second peer are dropped.
      let accepted = matches!(*self.peer.lock(), Some((read_id, _)) if read_id == pipe_id);
      if !accepted {
        return Ok(());
      }
      if let Some(frames) = self.incoming.accumulate_pipe_frame(pipe_id, msg) {
        self.incoming.queue_message(pipe_id, frames).await?;
      }
    }
    Ok(())
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    let mut peer = self.peer.lock();
    if peer.is_some() {
      tracing::warn!(
        handle = self.core.handle,
        pipe_read_id,
        "PAIR already has a peer, refusing additional pipe"
      );
      return;
    }
    *peer = Some((pipe_read_id, pipe_write_id));
    drop(peer);
    self.peer_attached.notify_waiters();
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    let mut peer = self.peer.lock();
    if matches!(*peer, Some((read_id, _)) if read_id == pipe_read_id) {
      *peer = None;
    }
    drop(peer);
    self.incoming.clear_pipe_state(pipe_read_id);
  }

  async fn stop(&self) {
    self.closed.store(true, Ordering::Release);
    self.peer_attached.notify_waiters();
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
    self.wait_for_peer(None).await.map(|_| ())
  }
}
