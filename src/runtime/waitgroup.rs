use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// An asynchronous WaitGroup, similar to Go's `sync.WaitGroup`.
///
/// Actors register with `add` when spawned and signal completion with
/// `done`; `Context::term` waits until the counter returns to zero. Each
/// `done` is effectively a term-ack from a finished actor.
#[derive(Debug, Clone)]
pub(crate) struct WaitGroup {
  count: Arc<AtomicUsize>,
  notify_on_zero: Arc<Notify>,
}

impl WaitGroup {
  /// Creates a new WaitGroup with an initial count of zero.
  pub fn new() -> Self {
    Self {
      count: Arc::new(AtomicUsize::new(0)),
      notify_on_zero: Arc::new(Notify::new()),
    }
  }

  /// Adds a delta to the counter.
  pub fn add(&self, delta: usize) {
    if delta == 0 {
      return;
    }
    self.count.fetch_add(delta, Ordering::Relaxed);
  }

  /// Decrements the counter by one, waking waiters when it reaches zero.
  ///
  /// Panics if the counter would drop below zero.
  pub fn done(&self) {
    // AcqRel: done() publishes the actor's final writes to whoever wait()
    // releases.
    let old_count = self.count.fetch_sub(1, Ordering::AcqRel);
    if old_count == 0 {
      self.count.fetch_add(1, Ordering::Relaxed);
      panic!("WaitGroup::done() called when count was already zero");
    } else if old_count == 1 {
      self.notify_on_zero.notify_waiters();
    }
  }

  /// Waits asynchronously until the counter becomes zero. Returns
  /// immediately if it already is.
  pub async fn wait(&self) {
    if self.count.load(Ordering::Acquire) == 0 {
      return;
    }
    loop {
      self.notify_on_zero.notified().await;
      if self.count.load(Ordering::Acquire) == 0 {
        return;
      }
      // Spurious wakeup or a racing add(); keep waiting.
    }
  }

  /// Returns the current count. Primarily for debugging and tests.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tokio::time::timeout;

  #[tokio::test]
  async fn add_done_wait() {
    let wg = WaitGroup::new();
    wg.add(2);
    assert_eq!(wg.get_count(), 2);

    let wg1 = wg.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      wg1.done();
    });

    let notify = Arc::new(Notify::new());
    let notify2 = notify.clone();
    let wg2 = wg.clone();
    tokio::spawn(async move {
      notify2.notified().await;
      wg2.done();
    });

    let wg_wait = wg.clone();
    let mut wait_task = tokio::spawn(async move { wg_wait.wait().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(wg.get_count(), 1);
    assert!(
      timeout(Duration::from_millis(5), &mut wait_task).await.is_err(),
      "wait should still block with one actor outstanding"
    );

    notify.notify_one();
    assert!(timeout(Duration::from_millis(100), wait_task).await.is_ok());
    assert_eq!(wg.get_count(), 0);
  }

  #[tokio::test]
  async fn wait_on_zero_returns_immediately() {
    let wg = WaitGroup::new();
    let start = tokio::time::Instant::now();
    wg.wait().await;
    assert!(start.elapsed() < Duration::from_millis(10));
  }

  #[tokio::test]
  #[should_panic]
  async fn done_panics_on_zero() {
    let wg = WaitGroup::new();
    wg.done();
  }
}
