use azmq::{Msg, SocketType, ZmqError};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn pair_is_bidirectional() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let left = ctx.socket(SocketType::Pair)?;
    let right = ctx.socket(SocketType::Pair)?;
    let endpoint = common::unique_inproc_endpoint();

    left.bind(&endpoint).await?;
    right.connect(&endpoint).await?;

    left.send(Msg::from_static(b"ping")).await?;
    assert_eq!(common::recv_timeout(&right, LONG_TIMEOUT).await?.data().unwrap(), b"ping");

    right.send(Msg::from_static(b"pong")).await?;
    assert_eq!(common::recv_timeout(&left, LONG_TIMEOUT).await?.data().unwrap(), b"pong");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn pair_multipart_stays_intact() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let left = ctx.socket(SocketType::Pair)?;
    let right = ctx.socket(SocketType::Pair)?;
    let endpoint = common::unique_inproc_endpoint();

    left.bind(&endpoint).await?;
    right.connect(&endpoint).await?;

    left
      .send_multipart(vec![
        Msg::from_static(b"one"),
        Msg::from_static(b"two"),
        Msg::from_static(b"three"),
      ])
      .await?;

    let frames = common::recv_multipart_timeout(&right, LONG_TIMEOUT).await?;
    assert_eq!(frames.len(), 3);
    assert!(frames[0].is_more());
    assert!(frames[1].is_more());
    assert!(!frames[2].is_more());
    assert_eq!(frames[2].data().unwrap(), b"three");
  }
  ctx.term().await?;
  Ok(())
}

/// A second connector is refused: the first peer keeps the socket.
#[tokio::test]
async fn pair_refuses_second_peer() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let bound = ctx.socket(SocketType::Pair)?;
    let first = ctx.socket(SocketType::Pair)?;
    let second = ctx.socket(SocketType::Pair)?;
    let endpoint = common::unique_inproc_endpoint();

    bound.bind(&endpoint).await?;
    first.connect(&endpoint).await?;
    second.connect(&endpoint).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Traffic from the refused peer is dropped; the first peer works.
    second.send(Msg::from_static(b"ignored")).await?;
    first.send(Msg::from_static(b"kept")).await?;

    let received = common::recv_timeout(&bound, LONG_TIMEOUT).await?;
    assert_eq!(received.data().unwrap(), b"kept");
    let nothing = common::recv_timeout(&bound, Duration::from_millis(200)).await;
    assert!(matches!(nothing, Err(ZmqError::TimedOut)));
  }
  ctx.term().await?;
  Ok(())
}
