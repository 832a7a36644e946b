use crate::message::Blob;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Identity bookkeeping for ROUTER sockets: identity -> write pipe for
/// outgoing routing, read pipe -> identity for prefixing incoming frames.
#[derive(Debug, Default)]
pub(crate) struct RouterMap {
  identity_to_pipe: RwLock<HashMap<Blob, usize>>,
  read_pipe_to_identity: RwLock<HashMap<usize, Blob>>,
}

impl RouterMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers or re-registers a peer. An identity collision re-routes the
  /// identity to the newer pipe.
  pub fn add_peer(&self, identity: Blob, pipe_read_id: usize, pipe_write_id: usize) {
    let mut id_map = self.identity_to_pipe.write();
    let mut pipe_map = self.read_pipe_to_identity.write();

    if let Some(old_pipe) = id_map.insert(identity.clone(), pipe_write_id) {
      if old_pipe != pipe_write_id {
        tracing::warn!(?identity, old_pipe, new_pipe = pipe_write_id, "identity re-routed to new pipe");
      }
    }
    if let Some(old_identity) = pipe_map.insert(pipe_read_id, identity.clone()) {
      if old_identity != identity {
        id_map.remove(&old_identity);
      }
    }
  }

  /// Drops a peer by its read pipe; both directions are cleaned up.
  pub fn remove_peer_by_read_pipe(&self, pipe_read_id: usize) {
    let identity = self.read_pipe_to_identity.write().remove(&pipe_read_id);
    if let Some(identity) = identity {
      self.identity_to_pipe.write().remove(&identity);
    }
  }

  /// Drops the forward mapping for whatever identity points at this write
  /// pipe (stale-pipe cleanup during send).
  pub fn remove_peer_by_write_pipe(&self, pipe_write_id: usize) {
    let mut id_map = self.identity_to_pipe.write();
    id_map.retain(|_, pipe| *pipe != pipe_write_id);
  }

  pub fn pipe_for_identity(&self, identity: &Blob) -> Option<usize> {
    self.identity_to_pipe.read().get(identity).copied()
  }

  pub fn identity_for_read_pipe(&self, pipe_read_id: usize) -> Option<Blob> {
    self.read_pipe_to_identity.read().get(&pipe_read_id).cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_lookup_remove() {
    let map = RouterMap::new();
    let id = Blob::from(b"peer-a".to_vec());
    map.add_peer(id.clone(), 10, 11);
    assert_eq!(map.pipe_for_identity(&id), Some(11));
    assert_eq!(map.identity_for_read_pipe(10), Some(id.clone()));

    map.remove_peer_by_read_pipe(10);
    assert_eq!(map.pipe_for_identity(&id), None);
    assert_eq!(map.identity_for_read_pipe(10), None);
  }

  #[test]
  fn identity_collision_moves_to_new_pipe() {
    let map = RouterMap::new();
    let id = Blob::from(b"dup".to_vec());
    map.add_peer(id.clone(), 1, 2);
    map.add_peer(id.clone(), 3, 4);
    assert_eq!(map.pipe_for_identity(&id), Some(4));
  }
}
