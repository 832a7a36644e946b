//! Devices: two complementary sockets bridged by a poller that pumps one
//! logical message per readiness event, preserving frame boundaries.
//!
//! - Queue:     frontend ROUTER <-> backend DEALER (both directions)
//! - Forwarder: frontend XSUB -> backend XPUB for data, XPUB -> XSUB for
//!   subscription messages
//! - Streamer:  frontend PULL -> backend PUSH (one direction)

use crate::context::Context;
use crate::error::ZmqError;
use crate::poller::{PollEvents, Poller, PollerHandle};
use crate::socket::{Socket, SocketType};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

/// Where the device loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
  /// The caller drives the loop by awaiting [`Device::run`].
  InProc,
  /// A dedicated task is spawned; stop it with [`Device::stop`].
  Threaded,
}

enum DeviceRuntime {
  InProc {
    poller: Poller,
    frontend: Socket,
    backend: Socket,
  },
  Threaded {
    join: JoinHandle<Result<(), ZmqError>>,
  },
}

/// A running (or runnable) device.
pub struct Device {
  handle: PollerHandle,
  runtime: DeviceRuntime,
}

impl Device {
  /// Queue device: ROUTER frontend, DEALER backend, identity prefixes
  /// preserved in both directions.
  pub async fn queue(ctx: &Context, frontend_endpoint: &str, backend_endpoint: &str, mode: DeviceMode) -> Result<Device, ZmqError> {
    let frontend = ctx.socket(SocketType::Router)?;
    let backend = ctx.socket(SocketType::Dealer)?;
    frontend.bind(frontend_endpoint).await?;
    backend.bind(backend_endpoint).await?;
    Self::build(ctx, frontend, backend, true, mode)
  }

  /// Forwarder device: XSUB frontend, XPUB backend. Publications flow
  /// frontend to backend; subscriptions propagate backend to frontend.
  pub async fn forwarder(
    ctx: &Context,
    frontend_endpoint: &str,
    backend_endpoint: &str,
    mode: DeviceMode,
  ) -> Result<Device, ZmqError> {
    let frontend = ctx.socket(SocketType::XSub)?;
    let backend = ctx.socket(SocketType::XPub)?;
    frontend.bind(frontend_endpoint).await?;
    backend.bind(backend_endpoint).await?;
    Self::build(ctx, frontend, backend, true, mode)
  }

  /// Streamer device: PULL frontend, PUSH backend, one direction only.
  pub async fn streamer(
    ctx: &Context,
    frontend_endpoint: &str,
    backend_endpoint: &str,
    mode: DeviceMode,
  ) -> Result<Device, ZmqError> {
    let frontend = ctx.socket(SocketType::Pull)?;
    let backend = ctx.socket(SocketType::Push)?;
    frontend.bind(frontend_endpoint).await?;
    backend.bind(backend_endpoint).await?;
    Self::build(ctx, frontend, backend, false, mode)
  }

  fn build(ctx: &Context, frontend: Socket, backend: Socket, bidirectional: bool, mode: DeviceMode) -> Result<Device, ZmqError> {
    let mut poller = Poller::new(ctx);
    poller.add(&frontend, PollEvents::POLLIN, pump_into(backend.clone()));
    if bidirectional {
      poller.add(&backend, PollEvents::POLLIN, pump_into(frontend.clone()));
    }
    let handle = poller.handle();

    let runtime = match mode {
      DeviceMode::InProc => DeviceRuntime::InProc { poller, frontend, backend },
      DeviceMode::Threaded => {
        let join = tokio::spawn(run_device_loop(poller, frontend, backend));
        DeviceRuntime::Threaded { join }
      }
    };
    Ok(Device { handle, runtime })
  }

  /// Drives the device until stopped or until the context terminates.
  /// For a threaded device this awaits the spawned loop instead.
  pub async fn run(self) -> Result<(), ZmqError> {
    match self.runtime {
      DeviceRuntime::InProc { poller, frontend, backend } => run_device_loop(poller, frontend, backend).await,
      DeviceRuntime::Threaded { join } => join
        .await
        .map_err(|e| ZmqError::Internal(format!("Device task panicked: {:?}", e)))?,
    }
  }

  /// A clonable handle that can stop the device from another task, useful
  /// when `run` consumes the device in in-proc mode.
  pub fn stop_handle(&self) -> PollerHandle {
    self.handle.clone()
  }

  /// Stops the device. With `wait` the call returns only after the loop has
  /// exited and the device sockets are closed.
  pub async fn stop(self, wait: bool) -> Result<(), ZmqError> {
    self.handle.stop(wait).await;
    if let DeviceRuntime::Threaded { join } = self.runtime {
      if wait {
        return join
          .await
          .map_err(|e| ZmqError::Internal(format!("Device task panicked: {:?}", e)))?;
      }
    }
    Ok(())
  }
}

async fn run_device_loop(poller: Poller, frontend: Socket, backend: Socket) -> Result<(), ZmqError> {
  let result = poller.run().await;
  // The device owns its sockets; close them on the way out.
  let _ = frontend.close().await;
  let _ = backend.close().await;
  result
}

/// Handler moving one logical message from the ready socket to `other`.
fn pump_into(other: Socket) -> impl FnMut(Socket, PollEvents) -> BoxFuture<'static, ()> + Send + 'static {
  move |ready: Socket, _events: PollEvents| {
    let other = other.clone();
    Box::pin(async move {
      match ready.recv_multipart().await {
        Ok(frames) => {
          if let Err(e) = other.send_multipart(frames).await {
            tracing::debug!(error = %e, "device failed to forward message");
          }
        }
        Err(e) => {
          tracing::debug!(error = %e, "device recv failed");
        }
      }
    })
  }
}
