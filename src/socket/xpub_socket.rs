use crate::delegate_to_core;
use crate::error::ZmqError;
use crate::message::{Blob, Msg};
use crate::protocol::zmtp::command::{parse_subscription, CANCEL_PREFIX, SUBSCRIBE_PREFIX};
use crate::runtime::{Command, MailboxSender};
use crate::socket::core::SocketCore;
use crate::socket::options::RCVMORE;
use crate::socket::patterns::{distribute_to_pipes, IncomingMessageOrchestrator, SubscriptionTrie};
use crate::socket::ISocket;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

#[derive(Debug)]
struct XPubPeer {
  write_id: usize,
  subscriptions: SubscriptionTrie,
}

/// XPUB: PUB that additionally delivers subscription messages to the user.
/// With XPUB_VERBOSE off only the first subscribe and the last unsubscribe
/// per topic are delivered; verbose mode passes every one through.
#[derive(Debug)]
pub(crate) struct XPubSocket {
  core: Arc<SocketCore>,
  peers: RwLock<HashMap<usize, XPubPeer>>,
  /// Aggregate subscriber count per topic, for first/last edge detection.
  topic_counts: Mutex<HashMap<Vec<u8>, usize>>,
  incoming: IncomingMessageOrchestrator,
  current_out: TokioMutex<Vec<Msg>>,
}

impl XPubSocket {
  pub fn new(core: Arc<SocketCore>) -> Self {
    let rcvhwm = core.core_state.read().options.rcvhwm;
    let incoming = IncomingMessageOrchestrator::new(core.handle, rcvhwm);
    Self {
      core,
      peers: RwLock::new(HashMap::new()),
      topic_counts: Mutex::new(HashMap::new()),
      incoming,
      current_out: TokioMutex::new(Vec::new()),
    }
  }

  fn rcvtimeo(&self) -> Option<Duration> {
    self.core.core_state.read().options.rcvtimeo
  }

  fn verbose(&self) -> bool {
    self.core.core_state.read().options.xpub_verbose
  }

  fn map_closed(&self, e: ZmqError) -> ZmqError {
    match e {
      ZmqError::SocketClosed => self.core.closed_error(),
      e => e,
    }
  }

  /// Applies one subscription frame from a peer and decides whether the
  /// event is delivered to the user.
  async fn process_subscription(&self, pipe_read_id: usize, body: &[u8]) -> Result<(), ZmqError> {
    let Some((is_subscribe, topic)) = parse_subscription(body) else {
      tracing::warn!(handle = self.core.handle, pipe_id = pipe_read_id, "malformed subscription frame");
      return Ok(());
    };

    let applied = {
      let peers = self.peers.read();
      match peers.get(&pipe_read_id) {
        Some(peer) => {
          if is_subscribe {
            peer.subscriptions.subscribe(topic);
            true
          } else {
            peer.subscriptions.unsubscribe(topic)
          }
        }
        None => false,
      }
    };
    if !applied {
      return Ok(());
    }

    let is_edge = {
      let mut counts = self.topic_counts.lock();
      if is_subscribe {
        let count = counts.entry(topic.to_vec()).or_insert(0);
        *count += 1;
        *count == 1
      } else {
        match counts.get_mut(topic) {
          Some(count) if *count > 0 => {
            *count -= 1;
            let last = *count == 0;
            if last {
              counts.remove(topic);
            }
            last
          }
          _ => false,
        }
      }
    };

    if self.verbose() || is_edge {
      self.deliver_subscription_event(pipe_read_id, is_subscribe, topic).await?;
    }
    Ok(())
  }

  async fn deliver_subscription_event(
    &self,
    pipe_read_id: usize,
    is_subscribe: bool,
    topic: &[u8],
  ) -> Result<(), ZmqError> {
    let mut body = Vec::with_capacity(1 + topic.len());
    body.push(if is_subscribe { SUBSCRIBE_PREFIX } else { CANCEL_PREFIX });
    body.extend_from_slice(topic);
    self.incoming.queue_message(pipe_read_id, vec![Msg::from_vec(body)]).await
  }

  fn distribute(&self, frames: &[Msg]) {
    let topic = frames.first().and_then(|f| f.data()).unwrap_or(&[]);
    let targets: Vec<usize> = {
      let peers = self.peers.read();
      peers
        .values()
        .filter(|peer| peer.subscriptions.matches(topic))
        .map(|peer| peer.write_id)
        .collect()
    };
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
impl ISocket for XPubSocket {
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

  /// Receives the subscription messages peers sent (`\x01`/`\x00` + topic).
  async fn recv(&self) -> Result<Msg, ZmqError> {
    let timeout = self.rcvtimeo();
    self.incoming.recv_frame(timeout).await.map_err(|e| self.map_closed(e))
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
        self.process_subscription(pipe_id, msg.data().unwrap_or(&[])).await?;
      } else {
        tracing::trace!(handle = self.core.handle, pipe_id, "XPUB dropping inbound data frame");
      }
    }
    Ok(())
  }

  async fn pipe_attached(&self, pipe_read_id: usize, pipe_write_id: usize, _peer_identity: Option<&[u8]>) {
    self.peers.write().insert(
      pipe_read_id,
      XPubPeer {
        write_id: pipe_write_id,
        subscriptions: SubscriptionTrie::new(),
      },
    );
  }

  async fn update_peer_identity(&self, _pipe_read_id: usize, _identity: Option<Blob>) {}

  async fn pipe_detached(&self, pipe_read_id: usize) {
    let removed = self.peers.write().remove(&pipe_read_id);
    let Some(peer) = removed else { return };

    // The departed peer's subscriptions no longer count; emit the final
    // unsubscribe for topics it was the last subscriber of.
    for topic in peer.subscriptions.topics() {
      let became_zero = {
        let mut counts = self.topic_counts.lock();
        match counts.get_mut(&topic) {
          Some(count) if *count > 0 => {
            *count -= 1;
            let last = *count == 0;
            if last {
              counts.remove(&topic);
            }
            last
          }
          _ => false,
        }
      };
      if became_zero {
        let _ = self.deliver_subscription_event(pipe_read_id, false, &topic).await;
      }
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
    if !self.core.is_running() {
      return Err(self.core.closed_error());
    }
    Ok(())
  }
}
