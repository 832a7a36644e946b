use azmq::socket::options::SUBSCRIBE;
use azmq::{Device, DeviceMode, Msg, MsgFlags, SocketType, ZmqError};
use std::time::Duration;

mod common;

const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
const LONG_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(200);

/// REQ/REP through a Queue device: the identity envelope survives the
/// round trip, so the reply lands at the right client.
#[tokio::test]
async fn queue_device_round_trips_requests() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();

  let device = Device::queue(&ctx, &frontend, &backend, DeviceMode::Threaded).await?;

  {
    let client = ctx.socket(SocketType::Req)?;
    let worker = ctx.socket(SocketType::Rep)?;
    client.connect(&frontend).await?;
    worker.connect(&backend).await?;
    tokio::time::sleep(SETTLE).await;

    client.send(Msg::from_static(b"task")).await?;
    let request = common::recv_timeout(&worker, LONG_TIMEOUT).await?;
    assert_eq!(request.data().unwrap(), b"task");

    worker.send(Msg::from_static(b"done")).await?;
    let reply = common::recv_timeout(&client, LONG_TIMEOUT).await?;
    assert_eq!(reply.data().unwrap(), b"done");
  }

  device.stop(true).await?;
  ctx.term().await?;
  Ok(())
}

/// XSUB/XPUB forwarder: subscriptions propagate backend-to-frontend and
/// publications flow the other way, still filtered.
#[tokio::test]
async fn forwarder_device_propagates_subscriptions() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();

  let device = Device::forwarder(&ctx, &frontend, &backend, DeviceMode::Threaded).await?;

  {
    let publisher = ctx.socket(SocketType::Pub)?;
    let subscriber = ctx.socket(SocketType::Sub)?;
    publisher.connect(&frontend).await?;
    subscriber.connect(&backend).await?;
    subscriber.set_option(SUBSCRIBE, b"T").await?;
    tokio::time::sleep(SETTLE).await;

    let mut topic_t = Msg::from_static(b"T");
    topic_t.set_flags(MsgFlags::MORE);
    publisher.send(topic_t).await?;
    publisher.send(Msg::from_static(b"msg")).await?;

    let mut topic_u = Msg::from_static(b"U");
    topic_u.set_flags(MsgFlags::MORE);
    publisher.send(topic_u).await?;
    publisher.send(Msg::from_static(b"msg")).await?;

    let received = common::recv_multipart_timeout(&subscriber, LONG_TIMEOUT).await?;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].data().unwrap(), b"T");
    assert_eq!(received[1].data().unwrap(), b"msg");

    let nothing = common::recv_timeout(&subscriber, SHORT_TIMEOUT).await;
    assert!(matches!(nothing, Err(ZmqError::TimedOut)));
  }

  device.stop(true).await?;
  ctx.term().await?;
  Ok(())
}

/// PULL/PUSH streamer: messages pass straight through.
#[tokio::test]
async fn streamer_device_pumps_one_direction() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();

  let device = Device::streamer(&ctx, &frontend, &backend, DeviceMode::Threaded).await?;

  {
    let producer = ctx.socket(SocketType::Push)?;
    let consumer = ctx.socket(SocketType::Pull)?;
    producer.connect(&frontend).await?;
    consumer.connect(&backend).await?;
    tokio::time::sleep(SETTLE).await;

    for i in 0..5u8 {
      producer.send(Msg::from_vec(vec![i])).await?;
    }
    for i in 0..5u8 {
      let msg = common::recv_timeout(&consumer, LONG_TIMEOUT).await?;
      assert_eq!(msg.data().unwrap(), &[i]);
    }
  }

  device.stop(true).await?;
  ctx.term().await?;
  Ok(())
}

/// An in-proc mode device runs on the caller's task and stops via its
/// handle from another task.
#[tokio::test]
async fn inproc_mode_device_runs_until_stopped() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let frontend = common::unique_inproc_endpoint();
  let backend = common::unique_inproc_endpoint();

  let device = Device::streamer(&ctx, &frontend, &backend, DeviceMode::InProc).await?;
  let run_task = tokio::spawn(device.run());

  let producer = ctx.socket(SocketType::Push)?;
  let consumer = ctx.socket(SocketType::Pull)?;
  producer.connect(&frontend).await?;
  consumer.connect(&backend).await?;
  tokio::time::sleep(SETTLE).await;

  producer.send(Msg::from_static(b"through")).await?;
  let msg = common::recv_timeout(&consumer, LONG_TIMEOUT).await?;
  assert_eq!(msg.data().unwrap(), b"through");

  // Context termination unblocks the running device loop.
  ctx.term().await?;
  let joined = tokio::time::timeout(LONG_TIMEOUT, run_task).await;
  assert!(joined.is_ok(), "device loop did not exit on context termination");
  Ok(())
}
