use azmq::{Msg, MsgFlags, SocketType, ZmqError};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn req_rep_inproc_echo() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let server = ctx.socket(SocketType::Rep)?;
    let client = ctx.socket(SocketType::Req)?;
    let endpoint = common::unique_inproc_endpoint();

    server.bind(&endpoint).await?;
    client.connect(&endpoint).await?;

    client.send(Msg::from_static(b"Hello")).await?;
    let request = common::recv_timeout(&server, LONG_TIMEOUT).await?;
    assert_eq!(request.data().unwrap(), b"Hello");

    server.send(Msg::from_static(b"World")).await?;
    let reply = common::recv_timeout(&client, LONG_TIMEOUT).await?;
    assert_eq!(reply.data().unwrap(), b"World");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn req_double_send_is_a_state_error() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let server = ctx.socket(SocketType::Rep)?;
    let client = ctx.socket(SocketType::Req)?;
    let endpoint = common::unique_inproc_endpoint();

    server.bind(&endpoint).await?;
    client.connect(&endpoint).await?;

    client.send(Msg::from_static(b"first")).await?;
    let second = client.send(Msg::from_static(b"second")).await;
    assert!(matches!(second, Err(ZmqError::StateMachineViolation(_))), "got {:?}", second);

    // The socket stays usable: finish the cycle normally.
    let request = common::recv_timeout(&server, LONG_TIMEOUT).await?;
    assert_eq!(request.data().unwrap(), b"first");
    server.send(Msg::from_static(b"ok")).await?;
    let reply = common::recv_timeout(&client, LONG_TIMEOUT).await?;
    assert_eq!(reply.data().unwrap(), b"ok");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn req_recv_before_send_is_a_state_error() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let client = ctx.socket(SocketType::Req)?;
    let endpoint = common::unique_inproc_endpoint();
    let server = ctx.socket(SocketType::Rep)?;
    server.bind(&endpoint).await?;
    client.connect(&endpoint).await?;

    let result = client.recv().await;
    assert!(matches!(result, Err(ZmqError::StateMachineViolation(_))));
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn rep_send_before_recv_is_a_state_error() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let server = ctx.socket(SocketType::Rep)?;
    let endpoint = common::unique_inproc_endpoint();
    server.bind(&endpoint).await?;

    let result = server.send(Msg::from_static(b"unsolicited")).await;
    assert!(matches!(result, Err(ZmqError::StateMachineViolation(_))));
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn multi_frame_request_and_reply() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let server = ctx.socket(SocketType::Rep)?;
    let client = ctx.socket(SocketType::Req)?;
    let endpoint = common::unique_inproc_endpoint();

    server.bind(&endpoint).await?;
    client.connect(&endpoint).await?;

    let mut head = Msg::from_static(b"part1");
    head.set_flags(MsgFlags::MORE);
    client.send(head).await?;
    client.send(Msg::from_static(b"part2")).await?;

    let request = common::recv_multipart_timeout(&server, LONG_TIMEOUT).await?;
    assert_eq!(request.len(), 2);
    assert_eq!(request[0].data().unwrap(), b"part1");
    assert!(request[0].is_more());
    assert_eq!(request[1].data().unwrap(), b"part2");
    assert!(!request[1].is_more());

    server
      .send_multipart(vec![Msg::from_static(b"re1"), Msg::from_static(b"re2")])
      .await?;
    let reply = common::recv_multipart_timeout(&client, LONG_TIMEOUT).await?;
    assert_eq!(reply.len(), 2);
    assert_eq!(reply[0].data().unwrap(), b"re1");
    assert_eq!(reply[1].data().unwrap(), b"re2");
  }
  ctx.term().await?;
  Ok(())
}

#[tokio::test]
async fn req_rep_over_tcp_with_wildcard_port() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  {
    let server = ctx.socket(SocketType::Rep)?;
    let client = ctx.socket(SocketType::Req)?;

    let endpoint = common::bind_wildcard_tcp(&server).await?;
    assert!(endpoint.starts_with("tcp://127.0.0.1:"));
    assert!(!endpoint.ends_with(":0"));

    client.connect(&endpoint).await?;

    client.send(Msg::from_static(b"ping")).await?;
    let request = common::recv_timeout(&server, LONG_TIMEOUT).await?;
    assert_eq!(request.data().unwrap(), b"ping");
    server.send(Msg::from_static(b"pong")).await?;
    let reply = common::recv_timeout(&client, LONG_TIMEOUT).await?;
    assert_eq!(reply.data().unwrap(), b"pong");
  }
  ctx.term().await?;
  Ok(())
}
