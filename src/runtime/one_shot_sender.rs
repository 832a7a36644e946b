use crate::error::ZmqError;
use crate::message::Blob;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reply channel for inproc connect requests.
///
/// `oneshot::Sender` is not `Clone`, but system events on the broadcast bus
/// must be. The sender is parked behind a shared cell and consumed by
/// whichever binder core picks the request up.
#[derive(Debug, Clone)]
pub struct OneShotSender {
  inner: Arc<Mutex<Option<oneshot::Sender<Result<Option<Blob>, ZmqError>>>>>,
}

impl OneShotSender {
  pub fn new(tx: oneshot::Sender<Result<Option<Blob>, ZmqError>>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Some(tx))),
    }
  }

  /// Consumes the sender and delivers the reply. Subsequent calls are no-ops.
  pub fn take_and_send(&self, value: Result<Option<Blob>, ZmqError>) {
    if let Some(tx) = self.inner.lock().take() {
      let _ = tx.send(value);
    }
  }
}
