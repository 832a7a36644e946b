#![allow(dead_code)]

use azmq::{Context, Msg, Socket, ZmqError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use tokio::time::timeout;

static IPC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);
static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "azmq=info,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_test_writer()
      .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

/// Creates a context with tracing initialized.
pub fn test_context() -> Context {
  setup_tracing();
  azmq::context().expect("Failed to create test context")
}

/// Unique IPC endpoint per call so parallel tests do not collide.
pub fn unique_ipc_endpoint() -> String {
  let pid = std::process::id();
  let count = IPC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("ipc:///tmp/azmq_test_{}_{}", pid, count)
}

/// Unique inproc endpoint per call.
pub fn unique_inproc_endpoint() -> String {
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://azmq_test_{}", count)
}

/// recv with an outer timeout, mapped onto `ZmqError::TimedOut`.
pub async fn recv_timeout(socket: &Socket, duration: Duration) -> Result<Msg, ZmqError> {
  match timeout(duration, socket.recv()).await {
    Ok(result) => result,
    Err(_) => Err(ZmqError::TimedOut),
  }
}

/// recv_multipart with an outer timeout.
pub async fn recv_multipart_timeout(socket: &Socket, duration: Duration) -> Result<Vec<Msg>, ZmqError> {
  match timeout(duration, socket.recv_multipart()).await {
    Ok(result) => result,
    Err(_) => Err(ZmqError::TimedOut),
  }
}

/// send with an outer timeout.
pub async fn send_timeout(socket: &Socket, msg: Msg, duration: Duration) -> Result<(), ZmqError> {
  match timeout(duration, socket.send(msg)).await {
    Ok(result) => result,
    Err(_) => Err(ZmqError::TimedOut),
  }
}

/// Binds to a TCP wildcard port and returns the resolved endpoint.
pub async fn bind_wildcard_tcp(socket: &Socket) -> Result<String, ZmqError> {
  socket.bind("tcp://127.0.0.1:0").await?;
  let resolved = socket.get_option(azmq::socket::options::LAST_ENDPOINT).await?;
  Ok(String::from_utf8(resolved).expect("endpoint is not UTF-8"))
}
