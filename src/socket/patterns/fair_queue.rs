use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug)]
pub(crate) enum PushError<T> {
  /// Queue was full; the item is returned to the caller.
  Full(T),
  /// Queue was closed; the item is returned to the caller.
  Closed(T),
}

/// Buffers items arriving from multiple pipes in a single bounded queue for
/// fair consumption by the socket's `recv()`. The capacity acts as the
/// effective RCVHWM; per-pipe reader tasks blocked on a full queue propagate
/// backpressure down their pipes.
#[derive(Debug)]
pub(crate) struct FairQueue<T> {
  sender: Sender<T>,
  receiver: Receiver<T>,
  /// Signalled on every push so readiness probes can wait without popping.
  readable: Arc<Notify>,
  capacity: usize,
}

impl<T> FairQueue<T> {
  /// Creates a new fair queue with the given capacity (RCVHWM).
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (sender, receiver) = async_channel::bounded(capacity);
    Self {
      sender,
      receiver,
      readable: Arc::new(Notify::new()),
      capacity,
    }
  }

  /// Pushes an item, waiting while the queue is at capacity.
  /// Errors only when the queue has been closed.
  pub async fn push(&self, item: T) -> Result<(), PushError<T>> {
    match self.sender.send(item).await {
      Ok(()) => {
        self.readable.notify_waiters();
        Ok(())
      }
      Err(async_channel::SendError(item)) => Err(PushError::Closed(item)),
    }
  }

  /// Attempts to push without blocking.
  #[allow(dead_code)]
  pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
    match self.sender.try_send(item) {
      Ok(()) => {
        self.readable.notify_waiters();
        Ok(())
      }
      Err(TrySendError::Full(item)) => Err(PushError::Full(item)),
      Err(TrySendError::Closed(item)) => Err(PushError::Closed(item)),
    }
  }

  /// Pops the next item, waiting while the queue is empty.
  /// Returns `None` once the queue is closed and drained.
  pub async fn pop(&self) -> Option<T> {
    self.receiver.recv().await.ok()
  }

  /// Attempts to pop without blocking. `Ok(None)` means currently empty.
  pub fn try_pop(&self) -> Result<Option<T>, ()> {
    match self.receiver.try_recv() {
      Ok(item) => Ok(Some(item)),
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Closed) => Err(()),
    }
  }

  /// Waits until the queue holds at least one item. Returns false when the
  /// queue was closed and fully drained instead.
  pub async fn wait_readable(&self) -> bool {
    loop {
      if !self.receiver.is_empty() {
        return true;
      }
      if self.receiver.is_closed() {
        return false;
      }
      let notified = self.readable.notified();
      tokio::pin!(notified);
      // Register with the Notify, then re-check: a push between the check
      // above and registration would otherwise be a lost wakeup.
      notified.as_mut().enable();
      if !self.receiver.is_empty() {
        return true;
      }
      if self.receiver.is_closed() {
        return false;
      }
      notified.await;
    }
  }

  /// Closes the queue; blocked pushes fail and pops drain the remainder.
  pub fn close(&self) {
    self.sender.close();
    self.readable.notify_waiters();
  }

  pub fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }

  pub fn len(&self) -> usize {
    self.receiver.len()
  }

  #[allow(dead_code)]
  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn push_pop_fifo() {
    let q: FairQueue<u32> = FairQueue::new(4);
    q.push(1).await.unwrap();
    q.push(2).await.unwrap();
    assert_eq!(q.pop().await, Some(1));
    assert_eq!(q.pop().await, Some(2));
  }

  #[tokio::test]
  async fn try_push_full_returns_item() {
    let q: FairQueue<u32> = FairQueue::new(1);
    q.try_push(1).unwrap();
    match q.try_push(2) {
      Err(PushError::Full(2)) => {}
      other => panic!("expected Full(2), got {:?}", other),
    }
  }

  #[tokio::test]
  async fn close_drains_then_ends() {
    let q: FairQueue<u32> = FairQueue::new(4);
    q.push(7).await.unwrap();
    q.close();
    assert_eq!(q.pop().await, Some(7));
    assert_eq!(q.pop().await, None);
  }

  #[tokio::test]
  async fn wait_readable_wakes_on_push() {
    let q = Arc::new(FairQueue::<u32>::new(4));
    let q2 = q.clone();
    let waiter = tokio::spawn(async move { q2.wait_readable().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    q.push(1).await.unwrap();
    let readable = tokio::time::timeout(Duration::from_millis(100), waiter)
      .await
      .expect("wait_readable should wake")
      .unwrap();
    assert!(readable);
  }

  #[tokio::test]
  async fn wait_readable_reports_closed() {
    let q: FairQueue<u32> = FairQueue::new(4);
    q.close();
    assert!(!q.wait_readable().await);
  }
}
