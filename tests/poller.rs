use azmq::poller::{poll, PollEvents, PollItem, Poller};
use azmq::{Msg, SocketType, ZmqError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;

#[tokio::test]
async fn poll_reports_timeout_then_readiness() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let left = ctx.socket(SocketType::Pair)?;
    let right = ctx.socket(SocketType::Pair)?;
    let endpoint = common::unique_inproc_endpoint();
    left.bind(&endpoint).await?;
    right.connect(&endpoint).await?;

    // Nothing to read yet.
    let mut items = [PollItem::new(&left, PollEvents::POLLIN)];
    let ready = poll(&mut items, 100).await?;
    assert_eq!(ready, 0);
    assert!(items[0].revents().is_empty());

    right.send(Msg::from_static(b"wake")).await?;

    let mut items = [PollItem::new(&left, PollEvents::POLLIN)];
    let ready = poll(&mut items, 1000).await?;
    assert_eq!(ready, 1);
    assert!(items[0].is_readable());

    let msg = left.recv().await?;
    assert_eq!(msg.data().unwrap(), b"wake");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn poll_sees_write_readiness() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let push = ctx.socket(SocketType::Push)?;
    let pull = ctx.socket(SocketType::Pull)?;
    let endpoint = common::unique_inproc_endpoint();
    pull.bind(&endpoint).await?;
    push.connect(&endpoint).await?;

    let mut items = [PollItem::new(&push, PollEvents::POLLOUT)];
    let ready = poll(&mut items, 1000).await?;
    assert_eq!(ready, 1);
    assert!(items[0].is_writable());
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn poller_dispatches_handlers_and_timers() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let left = ctx.socket(SocketType::Pair)?;
    let right = ctx.socket(SocketType::Pair)?;
    let endpoint = common::unique_inproc_endpoint();
    left.bind(&endpoint).await?;
    right.connect(&endpoint).await?;

    let received = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));

    let mut poller = Poller::new(&ctx);
    {
      let received = received.clone();
      poller.add(&left, PollEvents::POLLIN, move |socket, _events| {
        let received = received.clone();
        Box::pin(async move {
          if socket.recv().await.is_ok() {
            received.fetch_add(1, Ordering::Relaxed);
          }
        })
      });
    }
    {
      let ticks = ticks.clone();
      poller.add_timer(Duration::from_millis(30), move || {
        let ticks = ticks.clone();
        Box::pin(async move {
          ticks.fetch_add(1, Ordering::Relaxed);
        })
      });
    }

    let handle = poller.handle();
    let run_task = tokio::spawn(poller.run());

    for _ in 0..3 {
      right.send(Msg::from_static(b"event")).await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    handle.stop(true).await;
    run_task.await.expect("poller task panicked")?;

    assert_eq!(received.load(Ordering::Relaxed), 3);
    assert!(ticks.load(Ordering::Relaxed) >= 2, "timer fired too rarely");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn socket_poll_probe_is_nonblocking() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let pull = ctx.socket(SocketType::Pull)?;
    let endpoint = common::unique_inproc_endpoint();
    pull.bind(&endpoint).await?;

    let start = tokio::time::Instant::now();
    let events = pull.poll(PollEvents::POLLIN, 0).await?;
    assert!(events.is_empty());
    assert!(start.elapsed() < Duration::from_millis(50));
  }
  ctx.term().await?;
  Ok(())
}
