pub(crate) mod command_loop;
pub(crate) mod pipe_manager;
pub(crate) mod shutdown;
pub(crate) mod state;

pub(crate) use state::{CoreState, EndpointInfo, EndpointType};

use crate::context::Context;
use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::{mailbox, ActorType, MailboxReceiver, MailboxSender};
use crate::socket::options::SocketOptions;
use crate::socket::types::SocketType;
use crate::socket::ISocket;

use async_channel::Sender as AsyncSender;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// The actor managing the state and lifecycle of a single socket.
///
/// User calls arrive either as mailbox commands (bind/connect/options/close)
/// or directly through the pattern logic (send/recv), which reads the shared
/// `CoreState` under its lock. All lifecycle mutation happens on the command
/// loop task.
#[derive(Debug)]
pub(crate) struct SocketCore {
  pub(crate) handle: usize,
  pub(crate) context: Context,
  command_sender: MailboxSender,
  command_receiver: Mutex<Option<MailboxReceiver>>,
  pub(crate) core_state: RwLock<CoreState>,
  socket_logic: Mutex<Option<Weak<dyn ISocket>>>,
  running: AtomicBool,
}

impl SocketCore {
  /// Creates the core actor plus the pattern implementation for
  /// `socket_type`, spawns the command loop, and returns the public pieces.
  pub(crate) fn create_and_spawn(
    handle: usize,
    context: Context,
    socket_type: SocketType,
    mut initial_options: SocketOptions,
  ) -> Result<(Arc<dyn ISocket>, MailboxSender), ZmqError> {
    initial_options.socket_type_name = socket_type.name().to_string();

    let (command_sender, command_receiver) = mailbox(crate::runtime::mailbox::DEFAULT_MAILBOX_CAPACITY);
    let core_arc = Arc::new(SocketCore {
      handle,
      context: context.clone(),
      command_sender: command_sender.clone(),
      command_receiver: Mutex::new(Some(command_receiver)),
      core_state: RwLock::new(CoreState::new(socket_type, initial_options)),
      socket_logic: Mutex::new(None),
      running: AtomicBool::new(true),
    });

    let socket_logic_arc: Arc<dyn ISocket> = crate::socket::new_pattern_socket(socket_type, core_arc.clone());
    *core_arc.socket_logic.lock() = Some(Arc::downgrade(&socket_logic_arc));

    tokio::spawn(command_loop::run_command_loop(core_arc.clone(), socket_logic_arc.clone()));
    context.publish_actor_started(handle, ActorType::SocketCore, None);

    Ok((socket_logic_arc, command_sender))
  }

  pub(crate) fn command_sender(&self) -> MailboxSender {
    self.command_sender.clone()
  }

  pub(crate) fn take_command_receiver(&self) -> Option<MailboxReceiver> {
    self.command_receiver.lock().take()
  }

  pub(crate) fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub(crate) fn mark_stopped(&self) {
    self.running.store(false, Ordering::Release);
  }

  /// The error a user call should see when its socket's queues are closed:
  /// `Terminated` if the whole context is going down, `SocketClosed` when
  /// only this socket was shut.
  pub(crate) fn closed_error(&self) -> ZmqError {
    if self.context.inner().is_terminating() {
      ZmqError::Terminated
    } else {
      ZmqError::SocketClosed
    }
  }
}

/// Sends one frame into a pipe, honoring the SNDTIMEO encoding:
/// `None` blocks, `Some(ZERO)` fails fast with EAGAIN, `Some(d)` bounds the
/// wait. A closed pipe surfaces as `Disconnected`.
pub(crate) async fn send_msg_with_timeout(
  sender: &AsyncSender<Msg>,
  msg: Msg,
  timeout_opt: Option<Duration>,
  handle: usize,
  pipe_write_id: usize,
) -> Result<(), ZmqError> {
  match timeout_opt {
    Some(d) if d.is_zero() => match sender.try_send(msg) {
      Ok(()) => Ok(()),
      Err(async_channel::TrySendError::Full(_)) => Err(ZmqError::WouldBlock),
      Err(async_channel::TrySendError::Closed(_)) => Err(ZmqError::Disconnected),
    },
    Some(d) => match tokio::time::timeout(d, sender.send(msg)).await {
      Ok(Ok(())) => Ok(()),
      Ok(Err(_)) => Err(ZmqError::Disconnected),
      Err(_) => {
        tracing::trace!(handle, pipe_id = pipe_write_id, "send timed out at HWM");
        Err(ZmqError::TimedOut)
      }
    },
    None => sender.send(msg).await.map_err(|_| ZmqError::Disconnected),
  }
}

/// Routes one logical message through a load balancer: waits for a peer
/// (honoring the timeout policy), prefers a pipe with room for the whole
/// message, and retries on pipes that turn out closed. Returns the pipe the
/// message went to.
pub(crate) async fn send_via_load_balancer(
  core: &Arc<SocketCore>,
  lb: &crate::socket::patterns::LoadBalancer,
  frames: Vec<Msg>,
  timeout_opt: Option<Duration>,
) -> Result<usize, ZmqError> {
  loop {
    if !core.is_running() {
      return Err(core.closed_error());
    }

    if !lb.has_pipes() {
      match timeout_opt {
        Some(d) if d.is_zero() => return Err(ZmqError::WouldBlock),
        None => {
          if !lb.wait_for_pipe().await {
            return Err(core.closed_error());
          }
          continue;
        }
        Some(d) => match tokio::time::timeout(d, lb.wait_for_pipe()).await {
          Ok(true) => continue,
          Ok(false) => return Err(core.closed_error()),
          Err(_) => return Err(ZmqError::TimedOut),
        },
      }
    }

    // One rotation looking for a pipe that can take the whole message;
    // fall back to the first live pipe and let the timeout policy decide.
    let mut chosen: Option<(usize, AsyncSender<Msg>)> = None;
    for _ in 0..lb.len() {
      let Some(pipe_id) = lb.next_pipe() else { break };
      let Some(sender) = core.core_state.read().get_pipe_sender(pipe_id) else {
        lb.remove_pipe(pipe_id);
        continue;
      };
      let room = sender.capacity().map_or(usize::MAX, |c| c.saturating_sub(sender.len()));
      if room >= frames.len() {
        chosen = Some((pipe_id, sender));
        break;
      }
      if chosen.is_none() {
        chosen = Some((pipe_id, sender));
      }
    }
    let Some((pipe_id, sender)) = chosen else {
      // Every pipe in the rotation was stale; re-enter the wait.
      continue;
    };

    match send_frames_with_timeout(&sender, frames.clone(), timeout_opt, core.handle, pipe_id).await {
      Ok(()) => return Ok(pipe_id),
      Err(ZmqError::Disconnected) => {
        lb.remove_pipe(pipe_id);
        continue;
      }
      Err(e) => return Err(e),
    }
  }
}

/// Sends a whole logical message into one pipe. The timeout policy applies
/// to the first frame; once a message is partially enqueued the remaining
/// frames block until delivered so the frame sequence stays intact.
pub(crate) async fn send_frames_with_timeout(
  sender: &AsyncSender<Msg>,
  frames: Vec<Msg>,
  timeout_opt: Option<Duration>,
  handle: usize,
  pipe_write_id: usize,
) -> Result<(), ZmqError> {
  let mut iter = frames.into_iter();
  let Some(first) = iter.next() else {
    return Ok(());
  };
  send_msg_with_timeout(sender, first, timeout_opt, handle, pipe_write_id).await?;
  for frame in iter {
    sender.send(frame).await.map_err(|_| ZmqError::Disconnected)?;
  }
  Ok(())
}
