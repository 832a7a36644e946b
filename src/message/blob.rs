use bytes::Bytes;
use std::fmt;
use std::ops::Deref;

/// An immutable byte string used for peer identities and topic prefixes.
///
/// Backed by `bytes::Bytes`, so clones share one allocation; equality and
/// hashing go by content, which is exactly what identity-keyed routing maps
/// need. A `Blob` dereferences to `[u8]`, so slice methods apply directly.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Bytes);

impl Blob {
  /// Number of bytes.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.0
  }

  /// Copies a borrowed slice into a new blob.
  pub fn copy_from_slice(data: &[u8]) -> Self {
    Self(Bytes::copy_from_slice(data))
  }
}

impl Deref for Blob {
  type Target = [u8];
  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl AsRef<[u8]> for Blob {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl From<Bytes> for Blob {
  fn from(bytes: Bytes) -> Self {
    Self(bytes)
  }
}

impl From<Vec<u8>> for Blob {
  fn from(vec: Vec<u8>) -> Self {
    Self(Bytes::from(vec))
  }
}

impl fmt::Debug for Blob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Identities are short and often printable; show a bounded preview.
    const PREVIEW: usize = 8;
    write!(f, "Blob[{}; ", self.0.len())?;
    for byte in self.0.iter().take(PREVIEW) {
      write!(f, "{:02x}", byte)?;
    }
    if self.0.len() > PREVIEW {
      write!(f, "..")?;
    }
    write!(f, "]")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn equality_and_hashing_are_by_content() {
    let a = Blob::from(b"peer".to_vec());
    let b = Blob::copy_from_slice(b"peer");
    assert_eq!(a, b);

    let mut set = HashSet::new();
    set.insert(a);
    assert!(set.contains(&b));
  }

  #[test]
  fn clones_share_the_allocation() {
    let original = Blob::from(vec![1u8, 2, 3]);
    let copy = original.clone();
    assert_eq!(original.as_slice().as_ptr(), copy.as_slice().as_ptr());
  }

  #[test]
  fn debug_preview_is_bounded() {
    let long = Blob::from(vec![0xABu8; 32]);
    let rendered = format!("{:?}", long);
    assert!(rendered.starts_with("Blob[32; "));
    assert!(rendered.ends_with("..]"));
  }
}
