use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::socket::patterns::fair_queue::{FairQueue, PushError};

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout as tokio_timeout;

/// Assembles per-pipe frame streams into logical messages and serves them to
/// the user's `recv` / `recv_multipart`.
///
/// Frames accumulate per pipe until one clears MORE; only then is the whole
/// message pushed into the shared incoming queue, so messages from different
/// pipes never interleave. The push blocks at RCVHWM, which parks that
/// pipe's reader task and propagates backpressure to the peer.
#[derive(Debug)]
pub(crate) struct IncomingMessageOrchestrator {
  socket_handle: usize,
  queue: FairQueue<(usize, Vec<Msg>)>,
  partial: Mutex<HashMap<usize, Vec<Msg>>>,
  /// Frames of the logical message currently being doled out frame-by-frame.
  pending: TokioMutex<PendingFrames>,
  rcvmore: AtomicBool,
}

#[derive(Debug, Default)]
struct PendingFrames {
  source_pipe_id: usize,
  frames: VecDeque<Msg>,
}

impl IncomingMessageOrchestrator {
  pub fn new(socket_handle: usize, rcvhwm: usize) -> Self {
    Self {
      socket_handle,
      queue: FairQueue::new(rcvhwm.max(1)),
      partial: Mutex::new(HashMap::new()),
      pending: TokioMutex::new(PendingFrames::default()),
      rcvmore: AtomicBool::new(false),
    }
  }

  /// Accumulates one frame from a pipe. Returns the complete logical message
  /// once its final frame arrives.
  pub fn accumulate_pipe_frame(&self, pipe_read_id: usize, frame: Msg) -> Option<Vec<Msg>> {
    let mut partial = self.partial.lock();
    let buffer = partial.entry(pipe_read_id).or_default();
    let is_last = !frame.is_more();
    buffer.push(frame);
    if is_last {
      partial.remove(&pipe_read_id)
    } else {
      None
    }
  }

  /// Queues a complete logical message for delivery, normalizing MORE flags.
  pub async fn queue_message(&self, pipe_read_id: usize, mut frames: Vec<Msg>) -> Result<(), ZmqError> {
    if frames.is_empty() {
      frames.push(Msg::new());
    }
    let last = frames.len() - 1;
    for (i, frame) in frames.iter_mut().enumerate() {
      if i < last {
        frame.set_flags(frame.flags() | MsgFlags::MORE);
      } else {
        frame.set_flags(frame.flags() & !MsgFlags::MORE);
      }
    }

    match self.queue.push((pipe_read_id, frames)).await {
      Ok(()) => Ok(()),
      Err(PushError::Closed(_)) | Err(PushError::Full(_)) => {
        tracing::debug!(
          handle = self.socket_handle,
          pipe_id = pipe_read_id,
          "incoming queue closed, dropping message"
        );
        Err(ZmqError::SocketClosed)
      }
    }
  }

  /// Returns the next frame of the current (or next) logical message.
  pub async fn recv_frame(&self, rcvtimeo: Option<Duration>) -> Result<Msg, ZmqError> {
    let mut pending = self.pending.lock().await;
    if pending.frames.is_empty() {
      let (source, frames) = self.pop_queue(rcvtimeo).await?;
      pending.source_pipe_id = source;
      pending.frames = frames.into();
    }
    // Normalized above: the final frame always clears MORE.
    let frame = pending
      .frames
      .pop_front()
      .ok_or_else(|| ZmqError::Internal("Empty logical message in queue".into()))?;
    self.rcvmore.store(frame.is_more(), Ordering::Release);
    Ok(frame)
  }

  /// Returns one whole logical message plus its source pipe. If the user
  /// already consumed part of it frame-wise, the remainder is returned.
  pub async fn recv_logical(&self, rcvtimeo: Option<Duration>) -> Result<(usize, Vec<Msg>), ZmqError> {
    let mut pending = self.pending.lock().await;
    if !pending.frames.is_empty() {
      let frames: Vec<Msg> = std::mem::take(&mut pending.frames).into();
      self.rcvmore.store(false, Ordering::Release);
      return Ok((pending.source_pipe_id, frames));
    }
    let out = self.pop_queue(rcvtimeo).await?;
    self.rcvmore.store(false, Ordering::Release);
    Ok(out)
  }

  async fn pop_queue(&self, rcvtimeo: Option<Duration>) -> Result<(usize, Vec<Msg>), ZmqError> {
    match rcvtimeo {
      Some(d) if d.is_zero() => match self.queue.try_pop() {
        Ok(Some(item)) => Ok(item),
        Ok(None) => Err(ZmqError::WouldBlock),
        Err(()) => Err(ZmqError::SocketClosed),
      },
      Some(d) => match tokio_timeout(d, self.queue.pop()).await {
        Ok(Some(item)) => Ok(item),
        Ok(None) => Err(ZmqError::SocketClosed),
        Err(_) => Err(ZmqError::TimedOut),
      },
      None => match self.queue.pop().await {
        Some(item) => Ok(item),
        None => Err(ZmqError::SocketClosed),
      },
    }
  }

  /// Waits until `recv` would not block. Returns false when the queue was
  /// closed and drained (socket closing / context terminating).
  pub async fn wait_readable(&self) -> bool {
    if !self.pending.lock().await.frames.is_empty() {
      return true;
    }
    self.queue.wait_readable().await
  }

  /// Whether the last returned frame has more frames following it.
  pub fn rcvmore(&self) -> bool {
    self.rcvmore.load(Ordering::Acquire)
  }

  /// Drops any partially assembled message from a detached pipe.
  pub fn clear_pipe_state(&self, pipe_read_id: usize) {
    if self.partial.lock().remove(&pipe_read_id).is_some() {
      tracing::debug!(
        handle = self.socket_handle,
        pipe_id = pipe_read_id,
        "cleared partial message for detached pipe"
      );
    }
  }

  /// Closes the incoming queue, waking blocked receivers. Buffered messages
  /// remain poppable until drained.
  pub fn close(&self) {
    self.queue.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(data: &'static [u8], more: bool) -> Msg {
    let mut m = Msg::from_static(data);
    if more {
      m.set_flags(MsgFlags::MORE);
    }
    m
  }

  #[tokio::test]
  async fn accumulates_until_final_frame() {
    let orch = IncomingMessageOrchestrator::new(1, 8);
    assert!(orch.accumulate_pipe_frame(7, frame(b"a", true)).is_none());
    let full = orch.accumulate_pipe_frame(7, frame(b"b", false)).unwrap();
    assert_eq!(full.len(), 2);
  }

  #[tokio::test]
  async fn pipes_do_not_interleave() {
    let orch = IncomingMessageOrchestrator::new(1, 8);
    assert!(orch.accumulate_pipe_frame(1, frame(b"x1", true)).is_none());
    assert!(orch.accumulate_pipe_frame(2, frame(b"y1", true)).is_none());
    let from_two = orch.accumulate_pipe_frame(2, frame(b"y2", false)).unwrap();
    assert_eq!(from_two[0].data().unwrap(), b"y1");
    let from_one = orch.accumulate_pipe_frame(1, frame(b"x2", false)).unwrap();
    assert_eq!(from_one[0].data().unwrap(), b"x1");
  }

  #[tokio::test]
  async fn recv_frame_tracks_rcvmore() {
    let orch = IncomingMessageOrchestrator::new(1, 8);
    orch
      .queue_message(3, vec![frame(b"head", true), frame(b"tail", false)])
      .await
      .unwrap();

    let first = orch.recv_frame(None).await.unwrap();
    assert_eq!(first.data().unwrap(), b"head");
    assert!(orch.rcvmore());

    let second = orch.recv_frame(None).await.unwrap();
    assert_eq!(second.data().unwrap(), b"tail");
    assert!(!orch.rcvmore());
  }

  #[tokio::test]
  async fn zero_timeout_is_nonblocking() {
    let orch = IncomingMessageOrchestrator::new(1, 8);
    let err = orch.recv_frame(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, ZmqError::WouldBlock));
  }
}
