use crate::message::Msg;
use crate::socket::core::SocketCore;

use std::sync::Arc;

/// Fans one logical message out to a set of pipes (PUB / XPUB).
///
/// Distribution never blocks: a peer whose pipe lacks room for the whole
/// message drops the message (publisher-side HWM policy). Messages are only
/// enqueued whole, so a slow peer never observes a partial frame sequence.
///
/// Returns the pipes found closed so the caller can detach them.
pub(crate) fn distribute_to_pipes(targets: &[usize], frames: &[Msg], core: &Arc<SocketCore>) -> Vec<usize> {
  let mut dead_pipes = Vec::new();

  for &pipe_write_id in targets {
    let sender = {
      let state = core.core_state.read();
      state.pipes_tx.get(&pipe_write_id).cloned()
    };
    let Some(sender) = sender else {
      tracing::warn!(handle = core.handle, pipe_id = pipe_write_id, "distribution found stale pipe");
      dead_pipes.push(pipe_write_id);
      continue;
    };

    // Whole-message room check keeps frame sequences atomic per peer.
    let room = sender.capacity().map_or(usize::MAX, |cap| cap.saturating_sub(sender.len()));
    if room < frames.len() {
      tracing::trace!(
        handle = core.handle,
        pipe_id = pipe_write_id,
        "dropping message for peer at HWM"
      );
      continue;
    }

    for frame in frames {
      match sender.try_send(frame.clone()) {
        Ok(()) => {}
        Err(async_channel::TrySendError::Full(_)) => {
          // Raced past the room check; the message is cut short for this
          // peer only when frames outnumber the whole capacity, which the
          // room check excludes.
          tracing::trace!(handle = core.handle, pipe_id = pipe_write_id, "pipe filled mid-message");
          break;
        }
        Err(async_channel::TrySendError::Closed(_)) => {
          dead_pipes.push(pipe_write_id);
          break;
        }
      }
    }
  }

  dead_pipes
}
