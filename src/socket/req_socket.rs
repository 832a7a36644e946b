use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::{send_via_load_balancer, SocketCore};
use crate::socket::options::RCVMORE;
use crate::socket::patterns::{IncomingMessageOrchestrator, LoadBalancer};
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

/// The REQ send/receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReqState {
  /// Ready to send the next request.
  ReadyToSend,
  /// A request went out on this pipe; only its reply is acceptable.
  ExpectingReply { target_pipe_read_id: usize },
}

/// REQ: strict send-request / recv-reply alternation. Each outgoing request
/// is prefixed with an empty delimiter frame; each incoming reply must carry
/// one, and everything up to it is discarded.
#[derive(Debug)]
pub(crate) struct ReqSocket {
  core: Arc<SocketCore>,
  load_balancer: LoadBalancer,
  incoming: IncomingMessageOrchestrator,
  state: TokioMutex<ReqState>,
  current_out: TokioMutex<Vec<Msg>>,
  pipe_read_to_write_id: Mutex<HashMap<usize, usize>>,
  pipe_write_to_read_id: Mutex<HashMap<usize, usize>>,
}

impl ReqSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    // One outstanding reply at a time; a deeper queue would only hide
    // protocol violations.
    let incoming = IncomingMessageOrchestrator::new(core.handle, 1);
    Self {
      core,
      load_balancer: LoadBalancer::new(),
      incoming,
      state: TokioMutex::new(ReqState::ReadyToSend),
      current_out: TokioMutex::new(Vec::new()),
      pipe_read_to_write_id: Mutex::new(HashMap::new()),
      pipe_write_to_read_id: Mutex::new(HashMap::new()),
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
}

#[async_trait]
impl ISocket for ReqSocket {
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
      if !matches!(*state, ReqState::ReadyToSend) {
        return Err(ZmqError::StateMachineViolation("REQ socket must call recv() before sending again"));
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
    {
      let state = self.state.lock().await;
      if !matches!(*state, ReqState::ExpectingReply { .. }) {
        return Err(ZmqError::StateMachineViolation("REQ socket must call send() before receiving"));
      }
    }

    let timeout = self.rcvtimeo();
    let frame = self.incoming.recv_frame(timeout).await.map_err(|e| self.map_closed(e))?;
    if !frame.is_more() {
      *self.state.lock().await = ReqState::ReadyToSend;
    }
    Ok(frame)
  }

  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    if frames.is_empty() {
      return Err(ZmqError::MalformedMessage("REQ request must have at least one frame".into()));
    }
    {
      let state = self.state.lock().await;
      if !matches!(*state, ReqState::ReadyToSend) {
        return Err(ZmqError::StateMachineViolation("REQ socket must call recv() before sending again"));
      }
    }

    // The empty delimiter is the bottom of the reply backtrace stack.
    let mut wire_frames = Vec::with_capacity(frames.len() + 1);
    wire_frames.push(Msg::delimiter());
    wire_frames.extend(frames);

    let timeout_opt = self.sndtimeo();
    let pipe_write_id = send_via_load_balancer(&self.core, &self.load_balancer, wire_frames, timeout_opt).await?;

    let target_pipe_read_id = self
      .pipe_write_to_read_id
      .lock()
      .get(&pipe_write_id)
      .copied()
      .unwrap_or(usize::MAX);
    *self.state.lock().await = ReqState::ExpectingReply { target_pipe_read_id };
    Ok(())
  }

  async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    {
      let state = self.state.lock().await;
      if !matches!(*state, ReqState::ExpectingReply { .. }) {
        return Err(ZmqError::StateMachineViolation("REQ socket must call send() before receiving"));
      }
    }

    let timeout = self.rcvtimeo();
    let (_, frames) = self.incoming.recv_logical(timeout).await.map_err(|e| self.map_closed(e))?;
    *self.state.lock().await = ReqState::ReadyToSend;
    Ok(frames)
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

    // Only the reply from the pipe the request went to is acceptable.
    {
      let state = self.state.lock().await;
      match *state {
        ReqState::ExpectingReply { target_pipe_read_id } if target_pipe_read_id == pipe_id => {}
        _ => {
          tracing::warn!(
            handle = self.core.handle,
            pipe_id,
            "REQ dropping unexpected message"
          );
          return Ok(());
        }
      }
    }

    // A well-formed reply starts with the empty delimiter; everything before
    // it is a stale routing remnant. Without a delimiter the reply is
    // malformed and dropped.
    let Some(delimiter_pos) = frames.iter().position(|f| f.is_delimiter()) else {
      tracing::warn!(handle = self.core.handle, pipe_id, "REQ dropping reply without delimiter");
      return Ok(());
    };
    let payload: Vec<Msg> = frames.into_iter().skip(delimiter_pos + 1).collect();
    if payload.is_empty() {
      tracing::warn!(handle = self.core.handle, pipe_id, "REQ dropping empty reply");
      return Ok(());
    }

    self.incoming.queue_message(pipe_id, payload).await
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    self.pipe_read_to_write_id.lock().insert(pipe_read_id, pipe_write_id);
    self.pipe_write_to_read_id.lock().insert(pipe_write_id, pipe_read_id);
    self.load_balancer.add_pipe(pipe_write_id);
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    let write_id = self.pipe_read_to_write_id.lock().remove(&pipe_read_id);
    if let Some(write_id) = write_id {
      self.pipe_write_to_read_id.lock().remove(&write_id);
      self.load_balancer.remove_pipe(write_id);
    }
    self.incoming.clear_pipe_state(pipe_read_id);

    // The peer holding our outstanding request is gone; allow a fresh send.
    let mut state = self.state.lock().await;
    if matches!(*state, ReqState::ExpectingReply { target_pipe_read_id } if target_pipe_read_id == pipe_read_id) {
      tracing::warn!(
        handle = self.core.handle,
        pipe_read_id,
        "REQ target peer detached while awaiting reply"
      );
      *state = ReqState::ReadyToSend;
    }
  }

  async fn stop(&self) {
    self.load_balancer.close();
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
    if self.load_balancer.wait_for_pipe().await {
      Ok(())
    } else {
      Err(self.core.closed_error())
    }
  }
}
