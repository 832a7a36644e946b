use crate::error::ZmqError;
use crate::message::Msg;
use crate::poller::PollEvents;
use crate::runtime::MailboxSender;
use crate::socket::ISocket;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The messaging pattern of a socket. Discriminants follow the classic
/// ZMQ_TYPE numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SocketType {
  /// Exactly one peer, bidirectional, no routing.
  Pair = 0,
  /// Publishes to all matching subscribers; never receives.
  Pub = 1,
  /// Receives publications matching its subscriptions.
  Sub = 2,
  /// Strict send-request / recv-reply alternation.
  Req = 3,
  /// Strict recv-request / send-reply alternation.
  Rep = 4,
  /// Asynchronous REQ: load-balanced sends, fair-queued receives.
  Dealer = 5,
  /// Prefixes received messages with the peer identity; routes sends by it.
  Router = 6,
  /// Fair-queues from upstream pushers; never sends.
  Pull = 7,
  /// Load-balances to downstream pullers; never receives.
  Push = 8,
  /// PUB that also surfaces subscription messages to the user.
  XPub = 9,
  /// SUB with user-visible raw subscription control.
  XSub = 10,
}

impl SocketType {
  /// The name advertised during the connection handshake.
  pub fn name(&self) -> &'static str {
    match self {
      SocketType::Pair => "PAIR",
      SocketType::Pub => "PUB",
      SocketType::Sub => "SUB",
      SocketType::Req => "REQ",
      SocketType::Rep => "REP",
      SocketType::Dealer => "DEALER",
      SocketType::Router => "ROUTER",
      SocketType::Pull => "PULL",
      SocketType::Push => "PUSH",
      SocketType::XPub => "XPUB",
      SocketType::XSub => "XSUB",
    }
  }
}

/// The public handle for one socket. Cloneable (`Arc`-based); operations
/// delegate to the pattern logic and the `SocketCore` actor behind it.
///
/// A handle may move between tasks, but a socket is not meant to be driven
/// from several tasks concurrently; sends interleaving from two tasks are
/// serialized by the pattern but their ordering is unspecified.
#[derive(Clone)]
pub struct Socket {
  pub(crate) inner: Arc<dyn ISocket>,
  #[allow(dead_code)]
  pub(crate) core_command_sender: MailboxSender,
}

impl Socket {
  pub(crate) fn new(socket_impl: Arc<dyn ISocket>, core_command_sender: MailboxSender) -> Self {
    Self {
      inner: socket_impl,
      core_command_sender,
    }
  }

  /// Binds to a local endpoint (`tcp://127.0.0.1:5555`, `ipc:///tmp/sock`,
  /// `inproc://name`). Binding `tcp://host:0` or `tcp://*:port` resolves the
  /// wildcard; read `LAST_ENDPOINT` for the result.
  pub async fn bind(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.inner.bind(endpoint).await
  }

  /// Connects to a remote endpoint. Connection establishment is
  /// asynchronous; sends buffer against the HWM until the peer arrives.
  pub async fn connect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.inner.connect(endpoint).await
  }

  /// Drops the connection previously made to `endpoint`.
  pub async fn disconnect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.inner.disconnect(endpoint).await
  }

  /// Stops listening on `endpoint`.
  pub async fn unbind(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.inner.unbind(endpoint).await
  }

  /// Sends one frame. Set `MsgFlags::MORE` to continue a multi-frame
  /// message. With `SNDTIMEO = 0` a full pipe yields
  /// `ZmqError::WouldBlock` instead of waiting.
  pub async fn send(&self, msg: Msg) -> Result<(), ZmqError> {
    self.inner.send(msg).await
  }

  /// Receives one frame; check `RCVMORE` for continuation. With
  /// `RCVTIMEO = 0` an empty socket yields `ZmqError::WouldBlock`.
  pub async fn recv(&self) -> Result<Msg, ZmqError> {
    self.inner.recv().await
  }

  /// Sends a whole logical message; MORE flags are normalized internally.
  pub async fn send_multipart(&self, frames: Vec<Msg>) -> Result<(), ZmqError> {
    self.inner.send_multipart(frames).await
  }

  /// Receives a whole logical message.
  pub async fn recv_multipart(&self) -> Result<Vec<Msg>, ZmqError> {
    self.inner.recv_multipart().await
  }

  /// Sets a socket option from a typed value.
  pub async fn set_option<T: ToBytes>(&self, option: i32, value: T) -> Result<(), ZmqError> {
    self.set_option_raw(option, &value.to_bytes()).await
  }

  /// Sets a socket option from raw bytes.
  pub async fn set_option_raw(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.inner.set_option(option, value).await
  }

  /// Reads a socket option as raw bytes.
  pub async fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    self.inner.get_option(option).await
  }

  /// Waits until the socket is ready for any of `events`, up to
  /// `timeout_ms` (-1 = wait forever, 0 = immediate probe). Returns the
  /// ready subset, which is empty on timeout.
  pub async fn poll(&self, events: PollEvents, timeout_ms: i64) -> Result<PollEvents, ZmqError> {
    if events.is_empty() {
      return Ok(PollEvents::empty());
    }
    let readiness = async {
      let mut ready = PollEvents::empty();
      tokio::select! {
        res = self.inner.recv_ready(), if events.contains(PollEvents::POLLIN) => {
          res?;
          ready |= PollEvents::POLLIN;
        }
        res = self.inner.send_ready(), if events.contains(PollEvents::POLLOUT) => {
          res?;
          ready |= PollEvents::POLLOUT;
        }
      }
      Ok::<PollEvents, ZmqError>(ready)
    };

    match timeout_ms {
      t if t < 0 => readiness.await,
      t => match tokio::time::timeout(Duration::from_millis(t as u64), readiness).await {
        Ok(result) => result,
        Err(_) => Ok(PollEvents::empty()),
      },
    }
  }

  /// Initiates a graceful shutdown of the socket.
  pub async fn close(&self) -> Result<(), ZmqError> {
    self.inner.close().await
  }
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket").finish_non_exhaustive()
  }
}

/// Typed values accepted by `Socket::set_option`.
pub trait ToBytes {
  fn to_bytes(&self) -> Vec<u8>;
}

impl ToBytes for Vec<u8> {
  fn to_bytes(&self) -> Vec<u8> {
    self.to_vec()
  }
}

impl ToBytes for &[u8] {
  fn to_bytes(&self) -> Vec<u8> {
    self.to_vec()
  }
}

impl<const N: usize> ToBytes for &[u8; N] {
  fn to_bytes(&self) -> Vec<u8> {
    self.to_vec()
  }
}

impl ToBytes for i32 {
  fn to_bytes(&self) -> Vec<u8> {
    self.to_ne_bytes().to_vec()
  }
}

impl ToBytes for u32 {
  fn to_bytes(&self) -> Vec<u8> {
    self.to_ne_bytes().to_vec()
  }
}

impl ToBytes for bool {
  fn to_bytes(&self) -> Vec<u8> {
    let int_val = if *self { 1i32 } else { 0i32 };
    int_val.to_ne_bytes().to_vec()
  }
}

impl ToBytes for String {
  fn to_bytes(&self) -> Vec<u8> {
    self.as_bytes().to_vec()
  }
}

impl ToBytes for &str {
  fn to_bytes(&self) -> Vec<u8> {
    self.as_bytes().to_vec()
  }
}
