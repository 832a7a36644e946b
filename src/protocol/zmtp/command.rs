use crate::message::{Msg, MsgFlags};
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

/// Wire flag bits in a frame header.
pub(crate) const ZMTP_FLAG_MORE: u8 = 0b0000_0001;
pub(crate) const ZMTP_FLAG_LONG: u8 = 0b0000_0010;
pub(crate) const ZMTP_FLAG_COMMAND: u8 = 0b0000_0100;

/// First byte of a subscription control frame.
pub(crate) const SUBSCRIBE_PREFIX: u8 = 0x01;
pub(crate) const CANCEL_PREFIX: u8 = 0x00;

const READY_NAME: &[u8] = b"READY";

/// Property names exchanged in the READY command.
pub(crate) const PROP_SOCKET_TYPE: &str = "Socket-Type";
pub(crate) const PROP_IDENTITY: &str = "Identity";

/// A parsed command frame.
#[derive(Debug)]
pub(crate) enum ZmtpCommand {
  Ready(ZmtpReady),
  Unknown(Vec<u8>),
}

/// The READY handshake command: a property map, of which `Socket-Type` and
/// `Identity` are understood here.
#[derive(Debug, Default)]
pub(crate) struct ZmtpReady {
  pub properties: HashMap<String, Vec<u8>>,
}

impl ZmtpCommand {
  /// Parses a COMMAND-flagged frame body. Command body layout:
  /// `name-len(u8) | name | properties`.
  pub fn parse(msg: &Msg) -> Option<ZmtpCommand> {
    let body = msg.data()?;
    let name_len = *body.first()? as usize;
    if body.len() < 1 + name_len {
      return None;
    }
    let name = &body[1..1 + name_len];
    let rest = &body[1 + name_len..];
    if name == READY_NAME {
      ZmtpReady::parse_properties(rest).map(ZmtpCommand::Ready)
    } else {
      Some(ZmtpCommand::Unknown(body.to_vec()))
    }
  }
}

impl ZmtpReady {
  /// Builds a READY command frame from a property map.
  ///
  /// Property layout: `name-len(u8) | name | value-len(u32 BE) | value`,
  /// repeated.
  pub fn create_msg(properties: HashMap<String, Vec<u8>>) -> Msg {
    let mut buf = BytesMut::new();
    buf.put_u8(READY_NAME.len() as u8);
    buf.put_slice(READY_NAME);
    for (name, value) in &properties {
      buf.put_u8(name.len() as u8);
      buf.put_slice(name.as_bytes());
      buf.put_u32(value.len() as u32);
      buf.put_slice(value);
    }
    let mut msg = Msg::from_bytes(buf.freeze());
    msg.set_flags(MsgFlags::COMMAND);
    msg
  }

  fn parse_properties(mut rest: &[u8]) -> Option<ZmtpReady> {
    let mut properties = HashMap::new();
    while !rest.is_empty() {
      let name_len = *rest.first()? as usize;
      if rest.len() < 1 + name_len + 4 {
        return None;
      }
      let name = String::from_utf8(rest[1..1 + name_len].to_vec()).ok()?;
      let value_len = u32::from_be_bytes(rest[1 + name_len..1 + name_len + 4].try_into().ok()?) as usize;
      rest = &rest[1 + name_len + 4..];
      if rest.len() < value_len {
        return None;
      }
      properties.insert(name, rest[..value_len].to_vec());
      rest = &rest[value_len..];
    }
    Some(ZmtpReady { properties })
  }
}

/// Builds a subscribe control frame (`\x01` + topic), COMMAND-flagged.
pub(crate) fn subscribe_frame(topic: &[u8]) -> Msg {
  control_frame(SUBSCRIBE_PREFIX, topic)
}

/// Builds an unsubscribe control frame (`\x00` + topic), COMMAND-flagged.
pub(crate) fn cancel_frame(topic: &[u8]) -> Msg {
  control_frame(CANCEL_PREFIX, topic)
}

fn control_frame(prefix: u8, topic: &[u8]) -> Msg {
  let mut body = Vec::with_capacity(1 + topic.len());
  body.push(prefix);
  body.extend_from_slice(topic);
  let mut msg = Msg::from_vec(body);
  msg.set_flags(MsgFlags::COMMAND);
  msg
}

/// Splits a subscription control frame into (is_subscribe, topic).
/// Returns `None` for frames that are not subscription messages.
pub(crate) fn parse_subscription(body: &[u8]) -> Option<(bool, &[u8])> {
  match body.first() {
    Some(&SUBSCRIBE_PREFIX) => Some((true, &body[1..])),
    Some(&CANCEL_PREFIX) => Some((false, &body[1..])),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ready_round_trip_with_identity() {
    let mut props = HashMap::new();
    props.insert(PROP_SOCKET_TYPE.to_string(), b"DEALER".to_vec());
    props.insert(PROP_IDENTITY.to_string(), b"peer-1".to_vec());
    let msg = ZmtpReady::create_msg(props);
    assert!(msg.is_command());

    match ZmtpCommand::parse(&msg) {
      Some(ZmtpCommand::Ready(ready)) => {
        assert_eq!(ready.properties.get(PROP_SOCKET_TYPE).unwrap(), b"DEALER");
        assert_eq!(ready.properties.get(PROP_IDENTITY).unwrap(), b"peer-1");
      }
      other => panic!("expected READY, got {:?}", other),
    }
  }

  #[test]
  fn subscription_frames_parse_back() {
    let sub = subscribe_frame(b"topic");
    let (is_sub, topic) = parse_subscription(sub.data().unwrap()).unwrap();
    assert!(is_sub);
    assert_eq!(topic, b"topic");

    let cancel = cancel_frame(b"");
    let (is_sub, topic) = parse_subscription(cancel.data().unwrap()).unwrap();
    assert!(!is_sub);
    assert!(topic.is_empty());
  }
}
