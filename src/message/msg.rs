use crate::message::flags::MsgFlags;
use bytes::Bytes;
use std::fmt;

/// A single message part (frame).
///
/// Payload bytes live in a `Bytes` buffer, so cloning a frame bumps a
/// refcount rather than copying the body. A logical message is a sequence of
/// frames terminated by one whose `MORE` flag is clear.
#[derive(Clone, Default)]
pub struct Msg {
  data: Option<Bytes>,
  flags: MsgFlags,
}

impl Msg {
  /// Creates an empty message with no data.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates an empty delimiter frame (the REQ/REP envelope boundary).
  pub fn delimiter() -> Self {
    Self {
      data: Some(Bytes::new()),
      flags: MsgFlags::empty(),
    }
  }

  /// Creates a zero-filled message of the given size.
  pub fn with_size(size: usize) -> Self {
    Self {
      data: Some(Bytes::from(vec![0u8; size])),
      ..Default::default()
    }
  }

  /// Creates a message from a `Vec<u8>`, taking ownership.
  pub fn from_vec(data: Vec<u8>) -> Self {
    Self {
      data: Some(Bytes::from(data)),
      ..Default::default()
    }
  }

  /// Creates a message from `bytes::Bytes` (zero-copy).
  pub fn from_bytes(data: Bytes) -> Self {
    Self {
      data: Some(data),
      ..Default::default()
    }
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(data: &'static [u8]) -> Self {
    Self {
      data: Some(Bytes::from_static(data)),
      ..Default::default()
    }
  }

  /// Returns a reference to the message payload bytes, if any.
  pub fn data(&self) -> Option<&[u8]> {
    self.data.as_deref()
  }

  /// Returns the internal `Bytes` object if data is present. Cloning `Bytes`
  /// is cheap as it is reference-counted.
  pub fn data_bytes(&self) -> Option<Bytes> {
    self.data.clone()
  }

  /// Returns the size of the message payload in bytes.
  pub fn size(&self) -> usize {
    self.data.as_ref().map_or(0, |d| d.len())
  }

  /// Returns the flags associated with the message.
  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  /// Sets the flags for the message (e.g., `MsgFlags::MORE`).
  pub fn set_flags(&mut self, flags: MsgFlags) {
    self.flags = flags;
  }

  /// Checks if the `MORE` flag is set.
  pub fn is_more(&self) -> bool {
    self.flags.contains(MsgFlags::MORE)
  }

  /// Checks if the `COMMAND` flag is set.
  pub fn is_command(&self) -> bool {
    self.flags.contains(MsgFlags::COMMAND)
  }

  /// Returns true if this frame is an empty delimiter.
  pub fn is_delimiter(&self) -> bool {
    self.size() == 0 && !self.is_command()
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("size", &self.size())
      .field("flags", &self.flags)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clone_shares_payload() {
    let msg = Msg::from_vec(vec![1, 2, 3]);
    let copy = msg.clone();
    assert_eq!(msg.data(), copy.data());
    assert_eq!(copy.size(), 3);
  }

  #[test]
  fn delimiter_copy_is_delimiter() {
    let d = Msg::delimiter();
    let c = d.clone();
    assert!(c.is_delimiter());
    assert_eq!(c.size(), 0);
  }
}
