use azmq::socket::options::{SUBSCRIBE, UNSUBSCRIBE};
use azmq::{Msg, MsgFlags, SocketType, ZmqError};
use std::time::Duration;

mod common;

const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
const LONG_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(150);

#[tokio::test]
async fn sub_receives_only_matching_prefix() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let subscriber = ctx.socket(SocketType::Sub)?;
    let endpoint = common::unique_inproc_endpoint();

    publisher.bind(&endpoint).await?;
    subscriber.connect(&endpoint).await?;
    subscriber.set_option(SUBSCRIBE, b"A").await?;
    tokio::time::sleep(SETTLE).await;

    // Two 2-frame messages; only the "A" topic matches.
    let mut topic_a = Msg::from_static(b"A");
    topic_a.set_flags(MsgFlags::MORE);
    publisher.send(topic_a).await?;
    publisher.send(Msg::from_static(b"payload1")).await?;

    let mut topic_b = Msg::from_static(b"B");
    topic_b.set_flags(MsgFlags::MORE);
    publisher.send(topic_b).await?;
    publisher.send(Msg::from_static(b"payload2")).await?;

    let received = common::recv_multipart_timeout(&subscriber, LONG_TIMEOUT).await?;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].data().unwrap(), b"A");
    assert_eq!(received[1].data().unwrap(), b"payload1");

    // The "B" message never arrives.
    let nothing = common::recv_timeout(&subscriber, SHORT_TIMEOUT).await;
    assert!(matches!(nothing, Err(ZmqError::TimedOut)));
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn sub_without_subscription_receives_nothing() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let subscriber = ctx.socket(SocketType::Sub)?;
    let endpoint = common::unique_inproc_endpoint();

    publisher.bind(&endpoint).await?;
    subscriber.connect(&endpoint).await?;
    tokio::time::sleep(SETTLE).await;

    publisher.send(Msg::from_static(b"anything")).await?;
    let nothing = common::recv_timeout(&subscriber, SHORT_TIMEOUT).await;
    assert!(matches!(nothing, Err(ZmqError::TimedOut)));
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn empty_subscription_matches_everything() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let subscriber = ctx.socket(SocketType::Sub)?;
    let endpoint = common::unique_inproc_endpoint();

    publisher.bind(&endpoint).await?;
    subscriber.connect(&endpoint).await?;
    subscriber.set_option(SUBSCRIBE, b"").await?;
    tokio::time::sleep(SETTLE).await;

    publisher.send(Msg::from_static(b"broadcast")).await?;
    let received = common::recv_timeout(&subscriber, LONG_TIMEOUT).await?;
    assert_eq!(received.data().unwrap(), b"broadcast");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn unsubscribe_stops_delivery() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let subscriber = ctx.socket(SocketType::Sub)?;
    let endpoint = common::unique_inproc_endpoint();

    publisher.bind(&endpoint).await?;
    subscriber.connect(&endpoint).await?;
    subscriber.set_option(SUBSCRIBE, b"topic").await?;
    tokio::time::sleep(SETTLE).await;

    publisher.send(Msg::from_static(b"topic.1")).await?;
    let received = common::recv_timeout(&subscriber, LONG_TIMEOUT).await?;
    assert_eq!(received.data().unwrap(), b"topic.1");

    subscriber.set_option(UNSUBSCRIBE, b"topic").await?;
    tokio::time::sleep(SETTLE).await;

    publisher.send(Msg::from_static(b"topic.2")).await?;
    let nothing = common::recv_timeout(&subscriber, SHORT_TIMEOUT).await;
    assert!(matches!(nothing, Err(ZmqError::TimedOut)));
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn pub_sub_over_tcp() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let subscriber = ctx.socket(SocketType::Sub)?;

    let endpoint = common::bind_wildcard_tcp(&publisher).await?;
    subscriber.connect(&endpoint).await?;
    subscriber.set_option(SUBSCRIBE, b"").await?;
    // TCP needs the connection plus the subscription to propagate.
    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher.send(Msg::from_static(b"over tcp")).await?;
    let received = common::recv_timeout(&subscriber, LONG_TIMEOUT).await?;
    assert_eq!(received.data().unwrap(), b"over tcp");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn two_subscribers_both_receive() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let sub1 = ctx.socket(SocketType::Sub)?;
    let sub2 = ctx.socket(SocketType::Sub)?;
    let endpoint = common::unique_inproc_endpoint();

    publisher.bind(&endpoint).await?;
    sub1.connect(&endpoint).await?;
    sub2.connect(&endpoint).await?;
    sub1.set_option(SUBSCRIBE, b"").await?;
    sub2.set_option(SUBSCRIBE, b"").await?;
    tokio::time::sleep(SETTLE).await;

    publisher.send(Msg::from_static(b"both")).await?;
    assert_eq!(common::recv_timeout(&sub1, LONG_TIMEOUT).await?.data().unwrap(), b"both");
    assert_eq!(common::recv_timeout(&sub2, LONG_TIMEOUT).await?.data().unwrap(), b"both");
  }
  ctx.term().await?;
  Ok(())
}
