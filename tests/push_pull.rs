use azmq::socket::options::{RCVHWM, SNDHWM, SNDTIMEO};
use azmq::{Msg, SocketType, ZmqError};
use std::collections::HashSet;
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn push_pull_basic() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let push = ctx.socket(SocketType::Push)?;
    let pull = ctx.socket(SocketType::Pull)?;
    let endpoint = common::unique_inproc_endpoint();

    pull.bind(&endpoint).await?;
    push.connect(&endpoint).await?;

    push.send(Msg::from_static(b"work")).await?;
    let received = common::recv_timeout(&pull, LONG_TIMEOUT).await?;
    assert_eq!(received.data().unwrap(), b"work");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn send_on_pull_and_recv_on_push_are_rejected() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let push = ctx.socket(SocketType::Push)?;
    let pull = ctx.socket(SocketType::Pull)?;

    assert!(matches!(
      pull.send(Msg::from_static(b"nope")).await,
      Err(ZmqError::WrongSocketType("PULL"))
    ));
    assert!(matches!(push.recv().await, Err(ZmqError::WrongSocketType("PUSH"))));
  }
  ctx.term().await?;
  Ok(())
}

/// One PUSH to three PULL workers over TCP: the rotation gives each worker
/// exactly a third, and every payload arrives exactly once.
#[tokio::test]
async fn push_balances_across_three_pulls() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let push = ctx.socket(SocketType::Push)?;
    let endpoint = common::bind_wildcard_tcp(&push).await?;

    let pulls = [
      ctx.socket(SocketType::Pull)?,
      ctx.socket(SocketType::Pull)?,
      ctx.socket(SocketType::Pull)?,
    ];
    for pull in &pulls {
      pull.connect(&endpoint).await?;
    }
    // Let all three connections finish their handshakes before sending, so
    // the rotation covers the full worker set.
    tokio::time::sleep(Duration::from_millis(500)).await;

    for i in 0..300u32 {
      push.send(Msg::from_vec(i.to_be_bytes().to_vec())).await?;
    }

    let mut seen: HashSet<u32> = HashSet::new();
    for pull in &pulls {
      let mut count = 0;
      loop {
        match common::recv_timeout(pull, LONG_TIMEOUT).await {
          Ok(msg) => {
            let value = u32::from_be_bytes(msg.data().unwrap().try_into().unwrap());
            assert!(seen.insert(value), "payload {} delivered twice", value);
            count += 1;
            if count == 100 {
              break;
            }
          }
          Err(e) => panic!("worker starved after {} messages: {}", count, e),
        }
      }
      assert_eq!(count, 100);
    }
    assert_eq!(seen.len(), 300);
    assert!(seen.iter().all(|v| *v < 300));
  }
  ctx.term().await?;
  Ok(())
}

/// Backpressure: with small HWMs and a stalled reader, non-blocking sends
/// eventually fail with EAGAIN and resume after the reader drains.
#[tokio::test]
async fn hwm_backpressure_and_resume() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let push = ctx.socket(SocketType::Push)?;
    let pull = ctx.socket(SocketType::Pull)?;
    let endpoint = common::unique_inproc_endpoint();

    push.set_option(SNDHWM, 2i32).await?;
    push.set_option(SNDTIMEO, 0i32).await?;
    pull.set_option(RCVHWM, 2i32).await?;

    pull.bind(&endpoint).await?;
    push.connect(&endpoint).await?;

    // The pipe plus the receive queue bound the in-flight total; without a
    // reader the writer must hit EAGAIN within a handful of sends.
    let mut accepted = 0;
    let mut hit_hwm = false;
    for i in 0..20u8 {
      match push.send(Msg::from_vec(vec![i])).await {
        Ok(()) => accepted += 1,
        Err(ZmqError::WouldBlock) => {
          hit_hwm = true;
          break;
        }
        Err(e) => return Err(e),
      }
      // Give the reader task a chance to move frames into the queue.
      tokio::task::yield_now().await;
    }
    assert!(hit_hwm, "send never hit the high-water mark ({} accepted)", accepted);
    assert!(accepted >= 2, "HWM hit before the pipe could hold anything");

    // Drain everything buffered; the writer becomes writable again.
    for _ in 0..accepted {
      common::recv_timeout(&pull, LONG_TIMEOUT).await?;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    push.send(Msg::from_static(b"resumed")).await?;
    let resumed = common::recv_timeout(&pull, LONG_TIMEOUT).await?;
    assert_eq!(resumed.data().unwrap(), b"resumed");
  }
  ctx.term().await?;
  Ok(())
}
