use azmq::socket::options::{ROUTER_MANDATORY, ROUTING_ID};
use azmq::{Msg, MsgFlags, SocketType, ZmqError};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(2);

fn more(data: &'static [u8]) -> Msg {
  let mut msg = Msg::from_static(data);
  msg.set_flags(MsgFlags::MORE);
  msg
}

/// Two DEALERs with explicit identities talk through a ROUTER; replies are
/// routed back by identity.
#[tokio::test]
async fn router_prefixes_and_routes_by_identity() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let router = ctx.socket(SocketType::Router)?;
    let endpoint = common::unique_inproc_endpoint();
    router.bind(&endpoint).await?;

    let dealer_a = ctx.socket(SocketType::Dealer)?;
    dealer_a.set_option(ROUTING_ID, b"A").await?;
    dealer_a.connect(&endpoint).await?;

    let dealer_b = ctx.socket(SocketType::Dealer)?;
    dealer_b.set_option(ROUTING_ID, b"B").await?;
    dealer_b.connect(&endpoint).await?;

    dealer_a.send(Msg::from_static(b"hi")).await?;
    dealer_b.send(Msg::from_static(b"hi")).await?;

    // The router observes (identity, "hi") twice, in some order.
    let mut replies = Vec::new();
    for _ in 0..2 {
      let frames = common::recv_multipart_timeout(&router, LONG_TIMEOUT).await?;
      assert_eq!(frames.len(), 2);
      assert_eq!(frames[1].data().unwrap(), b"hi");
      let identity = frames[0].data().unwrap().to_vec();
      assert!(identity == b"A" || identity == b"B");
      replies.push(identity);
    }
    assert_ne!(replies[0], replies[1]);

    // Reply "1" to A and "2" to B regardless of arrival order.
    router
      .send_multipart(vec![Msg::from_vec(b"A".to_vec()), Msg::from_static(b"1")])
      .await?;
    router
      .send_multipart(vec![Msg::from_vec(b"B".to_vec()), Msg::from_static(b"2")])
      .await?;

    let at_a = common::recv_timeout(&dealer_a, LONG_TIMEOUT).await?;
    assert_eq!(at_a.data().unwrap(), b"1");
    let at_b = common::recv_timeout(&dealer_b, LONG_TIMEOUT).await?;
    assert_eq!(at_b.data().unwrap(), b"2");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn router_mandatory_reports_unroutable() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let router = ctx.socket(SocketType::Router)?;
    let endpoint = common::unique_inproc_endpoint();
    router.bind(&endpoint).await?;

    // Default: silently dropped.
    router
      .send_multipart(vec![Msg::from_static(b"ghost"), Msg::from_static(b"lost")])
      .await?;

    router.set_option(ROUTER_MANDATORY, true).await?;
    let result = router
      .send_multipart(vec![Msg::from_static(b"ghost"), Msg::from_static(b"lost")])
      .await;
    assert!(matches!(result, Err(ZmqError::UnroutablePeer(_))), "got {:?}", result);
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn router_frame_wise_send() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let router = ctx.socket(SocketType::Router)?;
    let endpoint = common::unique_inproc_endpoint();
    router.bind(&endpoint).await?;

    let dealer = ctx.socket(SocketType::Dealer)?;
    dealer.set_option(ROUTING_ID, b"W").await?;
    dealer.connect(&endpoint).await?;

    dealer.send(Msg::from_static(b"job")).await?;
    let frames = common::recv_multipart_timeout(&router, LONG_TIMEOUT).await?;
    assert_eq!(frames[0].data().unwrap(), b"W");

    router.send(more(b"W")).await?;
    router.send(more(b"result")).await?;
    router.send(Msg::from_static(b"tail")).await?;

    let reply = common::recv_multipart_timeout(&dealer, LONG_TIMEOUT).await?;
    assert_eq!(reply.len(), 2);
    assert_eq!(reply[0].data().unwrap(), b"result");
    assert_eq!(reply[1].data().unwrap(), b"tail");
  }
  ctx.term().await?;
  Ok(())
}

/// Identities travel through the wire handshake on TCP as well.
#[tokio::test]
async fn dealer_router_over_tcp() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let router = ctx.socket(SocketType::Router)?;
    let endpoint = common::bind_wildcard_tcp(&router).await?;

    let dealer = ctx.socket(SocketType::Dealer)?;
    dealer.set_option(ROUTING_ID, b"tcp-peer").await?;
    dealer.connect(&endpoint).await?;

    dealer.send(Msg::from_static(b"hello router")).await?;
    let frames = common::recv_multipart_timeout(&router, LONG_TIMEOUT).await?;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].data().unwrap(), b"tcp-peer");
    assert_eq!(frames[1].data().unwrap(), b"hello router");

    router
      .send_multipart(vec![Msg::from_vec(b"tcp-peer".to_vec()), Msg::from_static(b"hello dealer")])
      .await?;
    let reply = common::recv_timeout(&dealer, LONG_TIMEOUT).await?;
    assert_eq!(reply.data().unwrap(), b"hello dealer");
  }
  ctx.term().await?;
  Ok(())
}
