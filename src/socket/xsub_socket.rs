use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::protocol::zmtp::command::{cancel_frame, parse_subscription, subscribe_frame};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::SocketCore;
use crate::socket::options::{RCVMORE, SUBSCRIBE, UNSUBSCRIBE};
use crate::socket::patterns::{IncomingMessageOrchestrator, SubscriptionTrie};
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// XSUB: SUB with the subscription machinery exposed. Messages sent by the
/// user go upstream to all publishers; a frame starting with `\x01`/`\x00`
/// is a subscription update and is tracked so it can be replayed to new
/// pipes. Incoming publications pass through unfiltered.
#[derive(Debug)]
pub(crate) struct XSubSocket {
  core: Arc<SocketCore>,
  incoming: IncomingMessageOrchestrator,
  /// Mirror of forwarded subscriptions, replayed on new connections.
  subscriptions: SubscriptionTrie,
  pipe_read_to_write_id: Mutex<HashMap<usize, usize>>,
}

impl XSubSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    let rcvhwm = core.core_state.read().options.rcvhwm;
    let incoming = IncomingMessageOrchestrator::new(core.handle, rcvhwm);
    Self {
      core,
      incoming,
      subscriptions: SubscriptionTrie::new(),
      pipe_read_to_write_id: Mutex::new(HashMap::new()),
    }
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

  async fn broadcast_upstream(&self, msg: Msg) {
    let write_ids: Vec<usize> = self.pipe_read_to_write_id.lock().values().copied().collect();
    for write_id in write_ids {
      let sender = self.core.core_state.read().get_pipe_sender(write_id);
      if let Some(sender) = sender {
        if sender.send(msg.clone()).await.is_err() {
          tracing::debug!(handle = self.core.handle, pipe_id = write_id, "upstream frame lost to closed pipe");
        }
      }
    }
  }
}

#[async_trait]
impl ISocket for XSubSocket {
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

  /// Sends a raw frame upstream. Subscription frames update the local
  /// mirror and travel flagged as control; anything else goes as data.
  async fn send(&self, mut msg: Msg) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    let sub_update = msg
      .data()
      .and_then(parse_subscription)
      .map(|(is_subscribe, topic)| (is_subscribe, topic.to_vec()));
    if let Some((is_subscribe, topic)) = sub_update {
      if is_subscribe {
        self.subscriptions.subscribe(&topic);
      } else {
        self.subscriptions.unsubscribe(&topic);
      }
      msg.set_flags(msg.flags() | MsgFlags::COMMAND);
    }
    self.broadcast_upstream(msg).await;
    Ok(())
  }

  async fn recv(&self) -> Result<Msg, ZmqError> {
    let timeout = self.rcvtimeo();
    self.incoming.recv_frame(timeout).await.map_err(|e| self.map_closed(e))
  }

  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    for msg in frames {
      self.send(msg).await?;
    }
    Ok(())
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

  async fn set_pattern_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    match option {
      SUBSCRIBE => {
        self.subscriptions.subscribe(value);
        self.broadcast_upstream(subscribe_frame(value)).await;
        Ok(())
      }
      UNSUBSCRIBE => {
        if self.subscriptions.unsubscribe(value) {
          self.broadcast_upstream(cancel_frame(value)).await;
        }
        Ok(())
      }
      _ => Err(ZmqError::OptionNotSupported(option)),
    }
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
    if let Some(frames) = self.incoming.accumulate_pipe_frame(pipe_id, msg) {
      self.incoming.queue_message(pipe_id, frames).await?;
    }
    Ok(())
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    self.pipe_read_to_write_id.lock().insert(pipe_read_id, pipe_write_id);

    let topics = self.subscriptions.topics();
    let sender = self.core.core_state.read().get_pipe_sender(pipe_write_id);
    if let Some(sender) = sender {
      for topic in topics {
        if sender.send(subscribe_frame(&topic)).await.is_err() {
          break;
        }
      }
    }
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    self.pipe_read_to_write_id.lock().remove(&pipe_read_id);
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
