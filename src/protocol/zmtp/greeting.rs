use crate::error::ZmqError;
use bytes::{Buf, BufMut, BytesMut};

/// Fixed-size connection preamble exchanged before any frames.
///
/// Layout: 10-byte signature (0xFF, 8 padding bytes, 0x7F), version
/// major/minor, and a role octet (1 = listener side). 13 bytes total.
pub(crate) const GREETING_LENGTH: usize = 13;

const SIGNATURE_HEAD: u8 = 0xFF;
const SIGNATURE_TAIL: u8 = 0x7F;

pub(crate) const VERSION_MAJOR: u8 = 3;
pub(crate) const VERSION_MINOR: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ZmtpGreeting {
  pub version: (u8, u8),
  /// True for the side that accepted the connection.
  pub as_server: bool,
}

impl ZmtpGreeting {
  pub fn new(as_server: bool) -> Self {
    Self {
      version: (VERSION_MAJOR, VERSION_MINOR),
      as_server,
    }
  }

  /// Writes the greeting into `dst`.
  pub fn encode(&self, dst: &mut BytesMut) {
    dst.reserve(GREETING_LENGTH);
    dst.put_u8(SIGNATURE_HEAD);
    dst.put_bytes(0, 8);
    dst.put_u8(SIGNATURE_TAIL);
    dst.put_u8(self.version.0);
    dst.put_u8(self.version.1);
    dst.put_u8(self.as_server as u8);
  }

  /// Attempts to decode a greeting from `src`. Returns `Ok(None)` until
  /// enough bytes have arrived; consumes them on success.
  pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ZmqError> {
    if src.len() < GREETING_LENGTH {
      return Ok(None);
    }
    if src[0] != SIGNATURE_HEAD || src[9] != SIGNATURE_TAIL {
      return Err(ZmqError::ProtocolFault("Bad greeting signature".into()));
    }
    src.advance(10);
    let major = src.get_u8();
    let minor = src.get_u8();
    let as_server = src.get_u8() != 0;
    Ok(Some(Self {
      version: (major, minor),
      as_server,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn greeting_round_trip() {
    let greeting = ZmtpGreeting::new(true);
    let mut buf = BytesMut::new();
    greeting.encode(&mut buf);
    assert_eq!(buf.len(), GREETING_LENGTH);
    let decoded = ZmtpGreeting::decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, greeting);
    assert!(buf.is_empty());
  }

  #[test]
  fn partial_greeting_needs_more_bytes() {
    let mut buf = BytesMut::from(&[0xFFu8, 0, 0][..]);
    assert!(ZmtpGreeting::decode(&mut buf).unwrap().is_none());
  }

  #[test]
  fn bad_signature_is_rejected() {
    let mut buf = BytesMut::from(&[0u8; GREETING_LENGTH][..]);
    assert!(ZmtpGreeting::decode(&mut buf).is_err());
  }
}
