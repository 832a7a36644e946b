use azmq::context::{IO_THREADS, MAX_SOCKETS};
use azmq::socket::options::{LINGER, SUBSCRIBE, TYPE};
use azmq::{Device, DeviceMode, SocketType, ZmqError};
use std::time::Duration;

mod common;

const TERM_BUDGET: Duration = Duration::from_secs(5);

#[tokio::test]
async fn create_close_and_terminate() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let socket = ctx.socket(SocketType::Dealer)?;
  socket.close().await?;
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn double_terminate_is_a_noop() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let _socket = ctx.socket(SocketType::Pull)?;
  ctx.term().await?;
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn socket_creation_fails_after_terminate() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  ctx.term().await?;
  let result = ctx.socket(SocketType::Pub);
  assert!(matches!(result, Err(ZmqError::Terminated)));
  Ok(())
}

#[tokio::test]
async fn context_options_validate() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  ctx.set_option(IO_THREADS, 4)?;
  assert_eq!(ctx.get_option(IO_THREADS)?, 4);
  assert!(matches!(ctx.set_option(IO_THREADS, 0), Err(ZmqError::BadOptionValue(_))));
  assert!(matches!(ctx.set_option(IO_THREADS, 10_000), Err(ZmqError::TooManyIoThreads(_))));

  ctx.set_option(MAX_SOCKETS, 2)?;
  let _one = ctx.socket(SocketType::Pull)?;
  let _two = ctx.socket(SocketType::Pull)?;
  assert!(matches!(ctx.socket(SocketType::Pull), Err(ZmqError::TooManySockets(_))));
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn type_option_reads_back() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let socket = ctx.socket(SocketType::Router)?;
    let value = socket.get_option(TYPE).await?;
    let type_id = i32::from_ne_bytes(value.try_into().unwrap());
    assert_eq!(type_id, SocketType::Router as i32);
  }
  ctx.term().await?;
  Ok(())
}

/// A recv blocked on an idle socket observes context termination.
#[tokio::test]
async fn blocked_recv_returns_eterm() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let subscriber = ctx.socket(SocketType::Sub)?;
  let endpoint = common::unique_inproc_endpoint();
  let publisher = ctx.socket(SocketType::Pub)?;
  publisher.bind(&endpoint).await?;
  subscriber.connect(&endpoint).await?;
  subscriber.set_option(SUBSCRIBE, b"x").await?;

  let sub_clone = subscriber.clone();
  let blocked = tokio::spawn(async move { sub_clone.recv().await });
  tokio::time::sleep(Duration::from_millis(100)).await;

  tokio::time::timeout(TERM_BUDGET, ctx.term())
    .await
    .expect("terminate timed out")?;

  let result = blocked.await.expect("recv task panicked");
  assert!(matches!(result, Err(ZmqError::Terminated)), "got {:?}", result);
  assert_eq!(result.unwrap_err().kind(), azmq::ErrorKind::Terminated);
  Ok(())
}

/// Terminating a context with a running device must not hang: the device
/// loop exits within the linger budget without an explicit stop().
#[tokio::test]
async fn terminate_with_running_forwarder() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();

  let subscriber = ctx.socket(SocketType::Sub)?;
  let _device = Device::forwarder(&ctx, &frontend, &backend, DeviceMode::Threaded).await?;
  subscriber.connect(&backend).await?;
  subscriber.set_option(SUBSCRIBE, b"x").await?;

  tokio::time::timeout(TERM_BUDGET, ctx.term())
    .await
    .expect("terminate hung with a running device")?;
  Ok(())
}

#[tokio::test]
async fn linger_option_round_trips() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let socket = ctx.socket(SocketType::Push)?;
    socket.set_option(LINGER, 250i32).await?;
    let value = socket.get_option(LINGER).await?;
    assert_eq!(i32::from_ne_bytes(value.try_into().unwrap()), 250);

    socket.set_option(LINGER, -1i32).await?;
    let value = socket.get_option(LINGER).await?;
    assert_eq!(i32::from_ne_bytes(value.try_into().unwrap()), -1);
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn invalid_endpoints_are_rejected() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let socket = ctx.socket(SocketType::Pair)?;
    assert!(matches!(
      socket.bind("not-an-endpoint").await,
      Err(ZmqError::MalformedEndpoint(_))
    ));
    assert!(matches!(
      socket.bind("pgm://eth0;239.192.1.1:5555").await,
      Err(ZmqError::TransportNotSupported(_))
    ));
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn bind_collision_reports_addr_in_use() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let first = ctx.socket(SocketType::Pull)?;
    let second = ctx.socket(SocketType::Pull)?;
    let endpoint = common::unique_inproc_endpoint();
    first.bind(&endpoint).await?;
    let result = second.bind(&endpoint).await;
    assert!(matches!(result, Err(ZmqError::AddressInUse(_))));
  }
  ctx.term().await?;
  Ok(())
}
