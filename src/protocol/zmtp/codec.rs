use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::protocol::zmtp::command::{ZMTP_FLAG_COMMAND, ZMTP_FLAG_LONG, ZMTP_FLAG_MORE};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for the frame layer: `flags(1) + length(1 or 8) + body`.
///
/// Short frames carry a u8 length; frames over 255 bytes set the LONG flag
/// bit and carry a u64 length. The MORE and COMMAND flag bits map directly
/// onto `MsgFlags`.
#[derive(Debug, Default)]
pub(crate) struct ZmtpCodec {
  decoding_state: DecodingState,
}

#[derive(Debug, Default, Clone, Copy)]
enum DecodingState {
  #[default]
  ReadHeader,
  ReadBody(FrameHeader),
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
  flags: u8,
  size: usize,
}

impl ZmtpCodec {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Encoder<Msg> for ZmtpCodec {
  type Error = ZmqError;

  fn encode(&mut self, item: Msg, dst: &mut BytesMut) -> Result<(), Self::Error> {
    let data = item.data().unwrap_or(&[]);
    let size = data.len();
    let msg_flags = item.flags();

    let mut wire_flags = 0u8;
    if msg_flags.contains(MsgFlags::MORE) {
      wire_flags |= ZMTP_FLAG_MORE;
    }
    if msg_flags.contains(MsgFlags::COMMAND) {
      wire_flags |= ZMTP_FLAG_COMMAND;
    }

    if size <= 255 {
      dst.reserve(2 + size);
      dst.put_u8(wire_flags);
      dst.put_u8(size as u8);
    } else {
      wire_flags |= ZMTP_FLAG_LONG;
      dst.reserve(9 + size);
      dst.put_u8(wire_flags);
      dst.put_u64(size as u64);
    }
    dst.put_slice(data);
    Ok(())
  }
}

impl Decoder for ZmtpCodec {
  type Item = Msg;
  type Error = ZmqError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    loop {
      match self.decoding_state {
        DecodingState::ReadHeader => {
          if src.is_empty() {
            return Ok(None);
          }

          let flags = src[0];
          let is_long = (flags & ZMTP_FLAG_LONG) != 0;
          let header_len = if is_long { 1 + 8 } else { 1 + 1 };
          if src.len() < header_len {
            return Ok(None);
          }

          let header_bytes = src.split_to(header_len);
          let size = if is_long {
            let mut len_bytes = &header_bytes[1..];
            len_bytes.get_u64() as usize
          } else {
            header_bytes[1] as usize
          };

          self.decoding_state = DecodingState::ReadBody(FrameHeader { flags, size });
          // Fall through and try the body immediately.
        }

        DecodingState::ReadBody(header) => {
          if src.len() < header.size {
            src.reserve(header.size - src.len());
            return Ok(None);
          }

          let body = src.split_to(header.size).freeze();
          self.decoding_state = DecodingState::ReadHeader;

          let mut msg = Msg::from_bytes(body);
          let mut msg_flags = MsgFlags::empty();
          if (header.flags & ZMTP_FLAG_MORE) != 0 {
            msg_flags |= MsgFlags::MORE;
          }
          if (header.flags & ZMTP_FLAG_COMMAND) != 0 {
            msg_flags |= MsgFlags::COMMAND;
          }
          msg.set_flags(msg_flags);
          return Ok(Some(msg));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_frame_round_trip() {
    let mut codec = ZmtpCodec::new();
    let mut buf = BytesMut::new();
    let mut msg = Msg::from_static(b"hello");
    msg.set_flags(MsgFlags::MORE);
    codec.encode(msg, &mut buf).unwrap();

    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded.data().unwrap(), b"hello");
    assert!(decoded.is_more());
    assert!(buf.is_empty());
  }

  #[test]
  fn long_frame_round_trip() {
    let mut codec = ZmtpCodec::new();
    let mut buf = BytesMut::new();
    let payload = vec![0xAB; 300];
    codec.encode(Msg::from_vec(payload.clone()), &mut buf).unwrap();

    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded.data().unwrap(), payload.as_slice());
    assert!(!decoded.is_more());
  }

  #[test]
  fn fragmented_input_yields_none_until_complete() {
    let mut codec = ZmtpCodec::new();
    let mut full = BytesMut::new();
    codec.encode(Msg::from_static(b"fragmented"), &mut full).unwrap();

    let mut partial = BytesMut::new();
    partial.extend_from_slice(&full[..3]);
    assert!(codec.decode(&mut partial).unwrap().is_none());

    partial.extend_from_slice(&full[3..]);
    let decoded = codec.decode(&mut partial).unwrap().unwrap();
    assert_eq!(decoded.data().unwrap(), b"fragmented");
  }

  #[test]
  fn command_flag_survives_the_wire() {
    let mut codec = ZmtpCodec::new();
    let mut buf = BytesMut::new();
    let mut msg = Msg::from_static(b"\x01topic");
    msg.set_flags(MsgFlags::COMMAND);
    codec.encode(msg, &mut buf).unwrap();

    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert!(decoded.is_command());
  }
}
