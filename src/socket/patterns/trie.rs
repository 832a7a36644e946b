use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct TrieNode {
  children: HashMap<u8, TrieNode>,
  /// Number of subscriptions ending exactly at this node.
  count: usize,
}

impl TrieNode {
  fn is_redundant(&self) -> bool {
    self.count == 0 && self.children.is_empty()
  }
}

/// Topic subscriptions as a byte-prefix trie.
///
/// A message topic matches when any node on its path (including the root,
/// for the empty subscription) terminates at least one subscription.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTrie {
  root: RwLock<TrieNode>,
}

impl SubscriptionTrie {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a subscription. Returns true if this topic was not subscribed
  /// before (first subscription for the exact prefix).
  pub fn subscribe(&self, topic: &[u8]) -> bool {
    let mut root = self.root.write();
    let mut node = &mut *root;
    for &byte in topic {
      node = node.children.entry(byte).or_default();
    }
    node.count += 1;
    node.count == 1
  }

  /// Removes one subscription for the topic. Returns true if a subscription
  /// existed (and was removed).
  pub fn unsubscribe(&self, topic: &[u8]) -> bool {
    let mut root = self.root.write();
    Self::remove_rec(&mut root, topic)
  }

  fn remove_rec(node: &mut TrieNode, topic: &[u8]) -> bool {
    match topic.split_first() {
      None => {
        if node.count == 0 {
          return false;
        }
        node.count -= 1;
        true
      }
      Some((&byte, rest)) => {
        let Some(child) = node.children.get_mut(&byte) else {
          return false;
        };
        let removed = Self::remove_rec(child, rest);
        if child.is_redundant() {
          node.children.remove(&byte);
        }
        removed
      }
    }
  }

  /// Checks whether a message topic matches any active subscription prefix.
  pub fn matches(&self, message_topic: &[u8]) -> bool {
    let root = self.root.read();
    let mut node = &*root;
    if node.count > 0 {
      return true; // empty subscription matches everything
    }
    for &byte in message_topic {
      match node.children.get(&byte) {
        Some(child) => {
          node = child;
          if node.count > 0 {
            return true;
          }
        }
        None => return false,
      }
    }
    false
  }

  /// Snapshot of all subscribed topics (with multiplicity collapsed).
  /// Used to replay subscriptions onto newly attached pipes.
  pub fn topics(&self) -> Vec<Vec<u8>> {
    let root = self.root.read();
    let mut out = Vec::new();
    let mut path = Vec::new();
    Self::collect(&root, &mut path, &mut out);
    out
  }

  fn collect(node: &TrieNode, path: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
    if node.count > 0 {
      out.push(path.clone());
    }
    for (&byte, child) in &node.children {
      path.push(byte);
      Self::collect(child, path, out);
      path.pop();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefix_matching() {
    let trie = SubscriptionTrie::new();
    trie.subscribe(b"topic.");
    assert!(trie.matches(b"topic.a"));
    assert!(trie.matches(b"topic."));
    assert!(!trie.matches(b"topi"));
    assert!(!trie.matches(b"other"));
  }

  #[test]
  fn empty_subscription_matches_everything() {
    let trie = SubscriptionTrie::new();
    trie.subscribe(b"");
    assert!(trie.matches(b"anything"));
    assert!(trie.matches(b""));
  }

  #[test]
  fn unsubscribe_counts_down() {
    let trie = SubscriptionTrie::new();
    assert!(trie.subscribe(b"A"));
    assert!(!trie.subscribe(b"A"));
    assert!(trie.unsubscribe(b"A"));
    assert!(trie.matches(b"AB"));
    assert!(trie.unsubscribe(b"A"));
    assert!(!trie.matches(b"AB"));
    assert!(!trie.unsubscribe(b"A"));
  }

  #[test]
  fn topics_snapshot() {
    let trie = SubscriptionTrie::new();
    trie.subscribe(b"A");
    trie.subscribe(b"BC");
    let mut topics = trie.topics();
    topics.sort();
    assert_eq!(topics, vec![b"A".to_vec(), b"BC".to_vec()]);
  }
}
