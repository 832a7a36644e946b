use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::{send_frames_with_timeout, SocketCore};
use crate::socket::options::RCVMORE;
use crate::socket::patterns::IncomingMessageOrchestrator;
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

/// The REP receive/send cycle.
#[derive(Debug)]
enum RepState {
  ReadyToReceive,
  /// A request was handed to the user; the reply goes back through the
  /// stored routing prefix to the stored pipe.
  SendingReply {
    routing_prefix: Vec<Msg>,
    source_pipe_read_id: usize,
  },
}

/// REP: strict recv-request / send-reply alternation. The routing envelope
/// (labels up to and including the empty delimiter) is captured on receive
/// and replayed as the reply prefix.
#[derive(Debug)]
pub(crate) struct RepSocket {
  core: Arc<SocketCore>,
  incoming: IncomingMessageOrchestrator,
  state: TokioMutex<RepState>,
  /// Payload frames of the current request not yet taken frame-wise.
  pending_in: TokioMutex<VecDeque<Msg>>,
  rcvmore: AtomicBool,
  current_out: TokioMutex<Vec<Msg>>,
  pipe_read_to_write_id: Mutex<HashMap<usize, usize>>,
}

impl RepSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    let rcvhwm = core.core_state.read().options.rcvhwm;
    let incoming = IncomingMessageOrchestrator::new(core.handle, rcvhwm);
    Self {
      core,
      incoming,
      state: TokioMutex::new(RepState::ReadyToReceive),
      pending_in: TokioMutex::new(VecDeque::new()),
      rcvmore: AtomicBool::new(false),
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

  fn map_closed(&self, e: ZmqError) -> ZmqError {
    match e {
      ZmqError::SocketClosed => self.core.closed_error(),
      e => e,
    }
  }

  /// Pulls the next request off the queue and splits it into the routing
  /// envelope and the payload handed to the user.
  async fn receive_request(&self, timeout: Option<Duration>) -> Result<Vec<Msg>, ZmqError> {
    let (source_pipe_read_id, frames) = self.incoming.recv_logical(timeout).await.map_err(|e| self.map_closed(e))?;

    let mut routing_prefix = Vec::new();
    let mut payload = Vec::new();
    let mut delimiter_found = false;
    for frame in frames {
      if delimiter_found {
        payload.push(frame);
      } else {
        let is_delimiter = frame.is_delimiter();
        routing_prefix.push(frame);
        if is_delimiter {
          delimiter_found = true;
        }
      }
    }
    if !delimiter_found {
      // No envelope (e.g. a bare DEALER peer): everything is payload.
      payload = std::mem::take(&mut routing_prefix);
    }
    if payload.is_empty() {
      payload.push(Msg::new());
    }

    *self.state.lock().await = RepState::SendingReply {
      routing_prefix,
      source_pipe_read_id,
    };
    Ok(payload)
  }
}

#[async_trait]
impl ISocket for RepSocket {
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
    {
      let state = self.state.lock().await;
      if !matches!(*state, RepState::SendingReply { .. }) {
        return Err(ZmqError::StateMachineViolation("REP socket must recv() a request before sending a reply"));
      }
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
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }

    let mut pending = self.pending_in.lock().await;
    if pending.is_empty() {
      {
        let state = self.state.lock().await;
        if !matches!(*state, RepState::ReadyToReceive) {
          return Err(ZmqError::StateMachineViolation("REP socket must call send() before receiving again"));
        }
      }
      let timeout = self.rcvtimeo();
      *pending = self.receive_request(timeout).await?.into();
    }

    let mut frame = pending
      .pop_front()
      .ok_or_else(|| ZmqError::Internal("REP request had no payload".into()))?;
    let more = !pending.is_empty();
    if more {
      frame.set_flags(frame.flags() | MsgFlags::MORE);
    } else {
      frame.set_flags(frame.flags() & !MsgFlags::MORE);
    }
    self.rcvmore.store(more, Ordering::Release);
    Ok(frame)
  }

  async fn send_multipart(&self, payload_frames: Vec<Msg>) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    let mut user_frames = payload_frames;
    if user_frames.is_empty() {
      user_frames.push(Msg::new());
    }

    let (routing_prefix, source_pipe_read_id) = {
      let mut state = self.state.lock().await;
      match std::mem::replace(&mut *state, RepState::ReadyToReceive) {
        RepState::SendingReply {
          routing_prefix,
          source_pipe_read_id,
        } => (routing_prefix, source_pipe_read_id),
        RepState::ReadyToReceive => {
          return Err(ZmqError::StateMachineViolation("REP socket must recv() a request before sending a reply"));
        }
      }
    };

    let pipe_write_id = self.pipe_read_to_write_id.lock().get(&source_pipe_read_id).copied();
    let Some(pipe_write_id) = pipe_write_id else {
      // Requester disconnected before the reply; drop it and move on.
      tracing::debug!(handle = self.core.handle, "REP peer gone before reply, dropping");
      return Ok(());
    };
    let Some(sender) = self.core.core_state.read().get_pipe_sender(pipe_write_id) else {
      tracing::debug!(handle = self.core.handle, "REP pipe gone before reply, dropping");
      return Ok(());
    };

    let mut wire_frames = Vec::with_capacity(routing_prefix.len() + user_frames.len());
    wire_frames.extend(routing_prefix);
    wire_frames.extend(user_frames);
    let last = wire_frames.len() - 1;
    for (i, frame) in wire_frames.iter_mut().enumerate() {
      if i < last {
        frame.set_flags(frame.flags() | MsgFlags::MORE);
      } else {
        frame.set_flags(frame.flags() & !MsgFlags::MORE);
      }
    }

    let timeout_opt = self.sndtimeo();
    match send_frames_with_timeout(&sender, wire_frames, timeout_opt, self.core.handle, pipe_write_id).await {
      Ok(()) => Ok(()),
      Err(ZmqError::Disconnected) => {
        tracing::debug!(handle = self.core.handle, "REP peer closed during reply, dropping");
        Ok(())
      }
      Err(e) => Err(e),
    }
  }

  async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }

    let mut pending = self.pending_in.lock().await;
    if !pending.is_empty() {
      self.rcvmore.store(false, Ordering::Release);
      return Ok(std::mem::take(&mut *pending).into());
    }
    {
      let state = self.state.lock().await;
      if !matches!(*state, RepState::ReadyToReceive) {
        return Err(ZmqError::StateMachineViolation("REP socket must call send() before receiving again"));
      }
    }
    let timeout = self.rcvtimeo();
    self.receive_request(timeout).await
  }

  async fn set_pattern_option(&self, option: i32, _value: &[u8]) -> Result<(), ZmqError> {
    Err(ZmqError::OptionNotSupported(option))
  }
  async fn get_pattern_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    match option {
      RCVMORE => Ok((self.rcvmore.load(Ordering::Acquire) as i32).to_ne_bytes().to_vec()),
      _ => Err(ZmqError::OptionNotSupported(option)),
    }
  }

  async fn handle_pipe_event(&self, pipe_id: usize, event: Command) -> Result<(), ZmqError> {
    if let Command::PipeMessageReceived { msg, .. } = event {
      if msg.is_command() {
        return Ok(());
      }
      if let Some(frames) = self.incoming.accumulate_pipe_frame(pipe_id, msg) {
        self.incoming.queue_message(pipe_id, frames).await?;
      }
    }
    Ok(())
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    self.pipe_read_to_write_id.lock().insert(pipe_read_id, pipe_write_id);
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    self.pipe_read_to_write_id.lock().remove(&pipe_read_id);
    self.incoming.clear_pipe_state(pipe_read_id);

    let mut state = self.state.lock().await;
    if matches!(&*state, RepState::SendingReply { source_pipe_read_id, .. } if *source_pipe_read_id == pipe_read_id) {
      tracing::warn!(
        handle = self.core.handle,
        pipe_read_id,
        "requester detached while REP held its request"
      );
      *state = RepState::ReadyToReceive;
    }
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
    // A REP send only makes sense holding a request; readiness mirrors that.
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    Ok(())
  }
}
