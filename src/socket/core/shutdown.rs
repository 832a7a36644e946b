use crate::runtime::{Command, SystemEvent};
use crate::socket::core::SocketCore;
use crate::socket::ISocket;

use std::sync::Arc;
use std::time::Duration;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Tears the socket down:
/// 1. stop accepting user operations and wake anything blocked,
/// 2. drain outbound pipes within the LINGER budget,
/// 3. tell children to stop (SocketClosing + per-endpoint Stop),
/// 4. drop pipe state so sessions observe closed channels.
///
/// Idempotent: a second invocation (e.g. close racing context term) is a
/// no-op.
pub(crate) async fn run(core: &Arc<SocketCore>, socket_logic: &Arc<dyn ISocket>) {
  if !core.is_running() {
    return;
  }
  core.mark_stopped();
  let handle = core.handle;
  tracing::debug!(handle, "socket shutdown starting");

  // Wake blocked recv/send callers; they observe ETERM or a close error.
  socket_logic.stop().await;

  apply_linger(core).await;

  let _ = core.context.event_bus().publish(SystemEvent::SocketClosing { socket_id: handle });

  // Collect children and pipe state under the lock, act on them after.
  let (endpoint_mailboxes, reader_handles, senders) = {
    let mut state = core.core_state.write();
    let mailboxes: Vec<_> = state.endpoints.drain().filter_map(|(_, info)| info.mailbox).collect();
    let readers: Vec<_> = state.pipe_reader_task_handles.drain().map(|(_, h)| h).collect();
    let senders: Vec<_> = state.pipes_tx.drain().map(|(_, tx)| tx).collect();
    state.pipe_read_id_to_endpoint_uri.clear();
    (mailboxes, readers, senders)
  };

  for mailbox in endpoint_mailboxes {
    let _ = mailbox.try_send(Command::Stop);
  }
  // Closing the senders completes the pipe termination handshake towards
  // each session.
  for sender in senders {
    sender.close();
  }
  for reader in reader_handles {
    reader.abort();
  }

  #[cfg(feature = "inproc")]
  {
    let names: Vec<String> = core.core_state.write().bound_inproc_names.drain().collect();
    for name in names {
      core.context.inner().unregister_inproc(&name);
    }
  }

  tracing::debug!(handle, "socket shutdown complete");
}

/// Waits for outbound pipe queues to drain, bounded by the LINGER option:
/// `Some(0)` skips the wait, `Some(d)` bounds it, `None` waits indefinitely.
async fn apply_linger(core: &Arc<SocketCore>) {
  let linger = core.core_state.read().options.linger;
  if linger == Some(Duration::ZERO) {
    return;
  }

  let deadline = linger.map(|d| tokio::time::Instant::now() + d);
  loop {
    let all_drained = {
      let state = core.core_state.read();
      state.pipes_tx.values().all(|tx| tx.is_empty())
    };
    if all_drained {
      return;
    }
    if let Some(deadline) = deadline {
      if tokio::time::Instant::now() >= deadline {
        tracing::debug!(handle = core.handle, "linger expired with frames undelivered");
        return;
      }
    }
    tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
  }
}
