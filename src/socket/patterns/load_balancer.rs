use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Rotates sends across available pipes (by write ID) in round-robin order.
///
/// The rotation only advances over pipes still attached, so a pipe that
/// detaches and later re-attaches resumes wherever the cursor happens to be,
/// matching round-robin-over-currently-eligible semantics.
#[derive(Debug, Default)]
pub(crate) struct LoadBalancer {
  pipes: Mutex<VecDeque<usize>>,
  notify_waiters: Arc<Notify>,
  closed: AtomicBool,
}

impl LoadBalancer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a pipe (by its write ID) to the rotation.
  pub fn add_pipe(&self, pipe_write_id: usize) {
    let mut pipes = self.pipes.lock();
    if !pipes.contains(&pipe_write_id) {
      pipes.push_back(pipe_write_id);
      self.notify_waiters.notify_waiters();
    }
  }

  /// Removes a pipe from the rotation.
  pub fn remove_pipe(&self, pipe_write_id: usize) {
    let mut pipes = self.pipes.lock();
    if let Some(pos) = pipes.iter().position(|id| *id == pipe_write_id) {
      pipes.remove(pos);
    }
  }

  /// Picks the next pipe and rotates it to the back. `None` when empty.
  pub fn next_pipe(&self) -> Option<usize> {
    let mut pipes = self.pipes.lock();
    let id = pipes.pop_front()?;
    pipes.push_back(id);
    Some(id)
  }

  /// Waits until at least one pipe is available. Returns `false` when the
  /// balancer was closed while waiting (socket shutting down).
  pub async fn wait_for_pipe(&self) -> bool {
    loop {
      if self.closed.load(Ordering::Acquire) {
        return false;
      }
      if !self.pipes.lock().is_empty() {
        return true;
      }
      let notified = self.notify_waiters.notified();
      tokio::pin!(notified);
      // Register before the re-check so an add_pipe racing in between
      // still wakes us.
      notified.as_mut().enable();
      if self.closed.load(Ordering::Acquire) || !self.pipes.lock().is_empty() {
        continue;
      }
      notified.await;
    }
  }

  pub fn has_pipes(&self) -> bool {
    !self.pipes.lock().is_empty()
  }

  pub fn len(&self) -> usize {
    self.pipes.lock().len()
  }

  /// Wakes all blocked senders; subsequent waits fail fast.
  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.notify_waiters.notify_waiters();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_robin_rotation() {
    let lb = LoadBalancer::new();
    lb.add_pipe(1);
    lb.add_pipe(2);
    lb.add_pipe(3);
    assert_eq!(lb.next_pipe(), Some(1));
    assert_eq!(lb.next_pipe(), Some(2));
    assert_eq!(lb.next_pipe(), Some(3));
    assert_eq!(lb.next_pipe(), Some(1));
  }

  #[test]
  fn removal_keeps_rotation_consistent() {
    let lb = LoadBalancer::new();
    lb.add_pipe(1);
    lb.add_pipe(2);
    lb.remove_pipe(1);
    assert_eq!(lb.next_pipe(), Some(2));
    assert_eq!(lb.next_pipe(), Some(2));
  }

  #[tokio::test]
  async fn close_unblocks_waiters() {
    let lb = Arc::new(LoadBalancer::new());
    let lb2 = lb.clone();
    let waiter = tokio::spawn(async move { lb2.wait_for_pipe().await });
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    lb.close();
    assert!(!waiter.await.unwrap());
  }
}
