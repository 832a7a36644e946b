use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::protocol::zmtp::command::parse_subscription;
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::SocketCore;
use crate::socket::patterns::{distribute_to_pipes, SubscriptionTrie};
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

/// Per-subscriber state: the pipe to reach it and what it asked for.
#[derive(Debug)]
pub(crate) struct PubPeer {
  pub write_id: usize,
  pub subscriptions: SubscriptionTrie,
}

/// PUB: distributes each message to every peer whose subscriptions match its
/// first frame. Peers at HWM or without a matching subscription are skipped
/// silently. Receiving is not supported; subscription control frames from
/// the wire feed the per-peer filters.
#[derive(Debug)]
pub(crate) struct PubSocket {
  core: Arc<SocketCore>,
  peers: RwLock<HashMap<usize, PubPeer>>,
  current_out: TokioMutex<Vec<Msg>>,
}

impl PubSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    Self {
      core,
      peers: RwLock::new(HashMap::new()),
      current_out: TokioMutex::new(Vec::new()),
    }
  }

  fn apply_subscription_frame(&self, pipe_read_id: usize, body: &[u8]) {
    let Some((is_subscribe, topic)) = parse_subscription(body) else {
      tracing::warn!(handle = self.core.handle, pipe_id = pipe_read_id, "malformed subscription frame");
      return;
    };
    let peers = self.peers.read();
    if let Some(peer) = peers.get(&pipe_read_id) {
      if is_subscribe {
        peer.subscriptions.subscribe(topic);
      } else {
        peer.subscriptions.unsubscribe(topic);
      }
    }
  }

  fn matching_targets(&self, topic: &[u8]) -> Vec<usize> {
    let peers = self.peers.read();
    peers
      .values()
      .filter(|peer| peer.subscriptions.matches(topic))
      .map(|peer| peer.write_id)
      .collect()
  }

  fn distribute(&self, frames: &[Msg]) {
    let topic = frames.first().and_then(|f| f.data()).unwrap_or(&[]);
    let targets = self.matching_targets(topic);
    if targets.is_empty() {
      return;
    }
    let dead = distribute_to_pipes(&targets, frames, &self.core);
    if !dead.is_empty() {
      self.peers.write().retain(|_, peer| !dead.contains(&peer.write_id));
    }
  }
}

#[async_trait]
impl ISocket for PubSocket {
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
    self.distribute(&frames);
    Ok(())
  }

  async fn recv(&self) -> Result<Msg, ZmqError> {
    Err(ZmqError::WrongSocketType("PUB"))
  }

  async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    if frames.is_empty() {
      return Ok(());
    }
    self.distribute(&frames);
    Ok(())
  }

  async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError> {
    Err(ZmqError::WrongSocketType("PUB"))
  }

  async fn set_pattern_option(&self, option: i32, _value: &[u8]) -> Result<(), ZmqError> {
    Err(ZmqError::OptionNotSupported(option))
  }
  async fn get_pattern_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    Err(ZmqError::OptionNotSupported(option))
  }

  async fn handle_pipe_event(&self, pipe_id: usize, event: Command) -> Result<(), ZmqError> {
    if let Command::PipeMessageReceived { msg, .. } = event {
      if msg.is_command() {
        self.apply_subscription_frame(pipe_id, msg.data().unwrap_or(&[]));
      } else {
        tracing::trace!(handle = self.core.handle, pipe_id, "PUB dropping inbound data frame");
      }
    }
    Ok(())
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    self.peers.write().insert(
      pipe_read_id,
      PubPeer {
        write_id: pipe_write_id,
        subscriptions: SubscriptionTrie::new(),
      },
    );
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    self.peers.write().remove(&pipe_read_id);
  }

  async fn stop(&self) {}

  async fn send_ready(&self) -> Result<(), ZmqError> {
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    Ok(())
  }
}
