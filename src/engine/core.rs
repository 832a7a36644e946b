use crate::context::Context;
use crate::engine::{EngineConfig, EngineStream};
use crate::error::ZmqError;
use crate::message::Blob;
use crate::protocol::zmtp::command::{PROP_IDENTITY, PROP_SOCKET_TYPE};
use crate::protocol::zmtp::{ZmtpCodec, ZmtpCommand, ZmtpGreeting, ZmtpReady};
use crate::runtime::{ActorType, Command, MailboxReceiver, MailboxSender};

use bytes::BytesMut;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::Framed;

/// A peer that never completes the handshake must not pin the engine.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Core engine logic, generic over the underlying stream type.
///
/// Lifecycle: greeting exchange, READY exchange (identity + socket type),
/// then a select loop moving frames between the session mailbox and the
/// framed stream. Post-handshake COMMAND frames (subscriptions) are passed
/// through to the session like data.
pub(crate) struct EngineCore<S: EngineStream> {
  handle: usize,
  context: Context,
  session_mailbox: MailboxSender,
  mailbox_receiver: MailboxReceiver,
  framed: Framed<S, ZmtpCodec>,
  config: EngineConfig,
  is_server: bool,
}

impl<S: EngineStream> EngineCore<S> {
  pub fn new(
    handle: usize,
    context: Context,
    session_mailbox: MailboxSender,
    mailbox_receiver: MailboxReceiver,
    stream: S,
    config: EngineConfig,
    is_server: bool,
  ) -> Self {
    Self {
      handle,
      context,
      session_mailbox,
      mailbox_receiver,
      framed: Framed::new(stream, ZmtpCodec::new()),
      config,
      is_server,
    }
  }

  pub async fn run_loop(mut self) {
    let handle = self.handle;
    tracing::debug!(handle, server = self.is_server, "engine started");

    let mut error_on_stop: Option<ZmqError> = None;

    // The handshake stays responsive to Stop (session teardown, context
    // termination) and is bounded in time.
    let handshake = tokio::select! {
      biased;
      cmd = self.mailbox_receiver.recv() => {
        match cmd {
          Ok(Command::Stop) | Err(_) => Err(ZmqError::Disconnected),
          Ok(_) => Err(ZmqError::ProtocolFault("Unexpected command during handshake".into())),
        }
      }
      result = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        perform_handshake(&mut self.framed, &self.config, self.is_server),
      ) => {
        match result {
          Ok(inner) => inner,
          Err(_) => Err(ZmqError::TimedOut),
        }
      }
    };

    match handshake {
      Ok(peer_identity) => {
        if self
          .session_mailbox
          .send(Command::EngineReady { peer_identity })
          .await
          .is_err()
        {
          tracing::warn!(handle, "session gone after handshake, stopping engine");
          let _ = self.framed.close().await;
          self
            .context
            .publish_actor_stopping(handle, ActorType::Engine, None, None);
          return;
        }
      }
      Err(e) => {
        tracing::debug!(handle, error = %e, "handshake failed");
        let error_msg = e.to_string();
        let _ = self.session_mailbox.send(Command::EngineError { error: e }).await;
        let _ = self.framed.close().await;
        let _ = self.session_mailbox.send(Command::EngineStopped).await;
        self.context.publish_actor_stopping(
          handle,
          ActorType::Engine,
          None,
          Some(ZmqError::Internal(error_msg)),
        );
        return;
      }
    }

    let mut should_break = false;
    while !should_break {
      tokio::select! {
        biased;

        cmd_result = self.mailbox_receiver.recv() => {
          match cmd_result {
            Ok(Command::SessionPushCmd { msg }) => {
              if let Err(e) = self.framed.send(msg).await {
                tracing::debug!(handle, error = %e, "engine send failed");
                let _ = self.session_mailbox.send(Command::EngineError { error: e }).await;
                should_break = true;
              }
            }
            Ok(Command::Stop) => {
              should_break = true;
            }
            Ok(other) => {
              tracing::warn!(handle, cmd = other.variant_name(), "engine received unhandled command");
            }
            Err(_) => {
              // Mailbox closed: session initiated a clean stop.
              should_break = true;
            }
          }
        }

        frame_result = self.framed.next() => {
          match frame_result {
            Some(Ok(msg)) => {
              // Subscription control frames ride the same path as data;
              // the pattern logic tells them apart by the COMMAND flag.
              if self.session_mailbox.send(Command::EnginePushCmd { msg }).await.is_err() {
                tracing::warn!(handle, "session mailbox closed, stopping engine");
                should_break = true;
              }
            }
            Some(Err(e)) => {
              tracing::debug!(handle, error = %e, "engine read/decode error");
              error_on_stop = Some(ZmqError::Internal(e.to_string()));
              let _ = self.session_mailbox.send(Command::EngineError { error: e }).await;
              should_break = true;
            }
            None => {
              tracing::debug!(handle, "stream closed by peer");
              should_break = true;
            }
          }
        }
      }
    }

    let _ = self.framed.close().await;
    let _ = self.session_mailbox.send(Command::EngineStopped).await;
    self
      .context
      .publish_actor_stopping(handle, ActorType::Engine, None, error_on_stop);
    tracing::debug!(handle, "engine stopped");
  }
}

/// Greeting + READY exchange. Returns the peer identity, if any.
async fn perform_handshake<S: EngineStream>(
  framed: &mut Framed<S, ZmtpCodec>,
  config: &EngineConfig,
  is_server: bool,
) -> Result<Option<Blob>, ZmqError> {
  // Greeting goes over the raw stream, before the codec sees any bytes.
  let mut greeting_buf = BytesMut::new();
  ZmtpGreeting::new(is_server).encode(&mut greeting_buf);
  framed.get_mut().write_all(&greeting_buf).await?;
  framed.get_mut().flush().await?;

  let mut read_buf = BytesMut::with_capacity(crate::protocol::zmtp::GREETING_LENGTH * 2);
  let peer_greeting = loop {
    if let Some(greeting) = ZmtpGreeting::decode(&mut read_buf)? {
      break greeting;
    }
    let n = framed.get_mut().read_buf(&mut read_buf).await?;
    if n == 0 {
      return Err(ZmqError::Disconnected);
    }
  };
  // Whatever arrived beyond the greeting belongs to the frame layer.
  if !read_buf.is_empty() {
    framed.read_buffer_mut().extend_from_slice(&read_buf);
  }

  if peer_greeting.version.0 < 3 {
    return Err(ZmqError::ProtocolFault(format!(
      "Unsupported protocol version {}.{}",
      peer_greeting.version.0, peer_greeting.version.1
    )));
  }
  if peer_greeting.as_server == is_server {
    return Err(ZmqError::ProtocolFault("Connection role mismatch".into()));
  }

  let ready_msg = {
    let mut props = HashMap::new();
    props.insert(PROP_SOCKET_TYPE.to_string(), config.socket_type_name.as_bytes().to_vec());
    if let Some(id) = &config.routing_id {
      if !id.is_empty() && id.len() <= 255 {
        props.insert(PROP_IDENTITY.to_string(), id.to_vec());
      }
    }
    ZmtpReady::create_msg(props)
  };

  // Client sends READY first, server answers.
  if !is_server {
    framed.send(ready_msg.clone()).await?;
  }

  let peer_ready = loop {
    match framed.next().await {
      Some(Ok(msg)) if msg.is_command() => match ZmtpCommand::parse(&msg) {
        Some(ZmtpCommand::Ready(ready)) => break ready,
        _ => {
          return Err(ZmqError::ProtocolFault("Expected READY command".into()));
        }
      },
      Some(Ok(_)) => {
        return Err(ZmqError::ProtocolFault("Expected READY command, got data".into()));
      }
      Some(Err(e)) => return Err(e),
      None => return Err(ZmqError::Disconnected),
    }
  };

  if is_server {
    framed.send(ready_msg).await?;
  }

  let peer_identity = peer_ready
    .properties
    .get(PROP_IDENTITY)
    .filter(|id| !id.is_empty() && id.len() <= 255)
    .map(|id| Blob::from(id.clone()));
  Ok(peer_identity)
}
