//! The unit of work: a batch owns an in-memory root, a list of stale
//! on-disk keys accumulated by structural rewrites, and an underlying
//! transaction. Mirrors `examples/original_source/batch.go`,
//! `batch_put.go`, `batch_get.go` and `batch_delete.go` — translated from
//! Go's `(nil, node, err)` triple-return idiom into `Result`-returning
//! recursion over owned `Node`s.

use crate::error::{storage_err, Result, TrieError};
use crate::hash::HasherFactory;
use crate::node::{FullNode, Node, NodeStatus, ShortNode, TERMINATOR_SLOT};
use crate::codec;
use crate::storage::KvTransaction;

/// A single put/get/delete session against a trie, backed by one
/// transaction. Dropping a `Batch` without calling [`Batch::commit`] or
/// [`Batch::abort`] leaves the underlying transaction un-finalized; callers
/// are expected to always end a batch one way or the other.
pub struct Batch<T: KvTransaction, F: HasherFactory> {
    root: Option<Node>,
    to_del: Vec<crate::hash::Digest>,
    txn: T,
    root_key: Vec<u8>,
    hasher_factory: F,
}

impl<T: KvTransaction, F: HasherFactory> Batch<T, F> {
    pub(crate) fn new(root: Option<Node>, txn: T, root_key: Vec<u8>, hasher_factory: F) -> Self {
        Self {
            root,
            to_del: Vec::new(),
            txn,
            root_key,
            hasher_factory,
        }
    }

    /// Insert or overwrite `key` with `value`. Every node on the path from
    /// the root to the insertion point is marked `Dirty`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let value_node = Node::value(value.to_vec());
        let root = self.root.take();
        let new_root = self.put_rec(root, key, value_node, 0)?;
        self.root = Some(new_root);
        Ok(())
    }

    fn put_rec(&mut self, node: Option<Node>, key: &[u8], value: Node, depth: usize) -> Result<Node> {
        let node = match node {
            None => {
                return if depth > key.len() {
                    Err(TrieError::InvalidState(
                        "cannot insert past the end of the key".to_string(),
                    ))
                } else if depth == key.len() {
                    Ok(value)
                } else {
                    Ok(Node::Short(Box::new(ShortNode::new_dirty(
                        key[depth..].to_vec(),
                        value,
                    ))))
                };
            }
            Some(n) => n,
        };

        match node {
            Node::Full(mut full) => {
                if depth > key.len() {
                    return Err(TrieError::InvalidState(
                        "cannot insert past the end of the key".to_string(),
                    ));
                }
                full.status = NodeStatus::Dirty;
                let slot = if depth == key.len() { TERMINATOR_SLOT } else { key[depth] as usize };
                let next_depth = if slot == TERMINATOR_SLOT { depth } else { depth + 1 };
                let child = full.children[slot].take();
                let new_child = self.put_rec(child, key, value, next_depth)?;
                full.children[slot] = Some(new_child);
                Ok(Node::Full(full))
            }
            Node::Short(mut short) => {
                if depth > key.len() {
                    return Err(TrieError::InvalidState(
                        "cannot insert past the end of the key".to_string(),
                    ));
                }
                let common = common_prefix_len(&short.key, &key[depth..]);
                if common == short.key.len() {
                    short.status = NodeStatus::Dirty;
                    let child = *short.value;
                    let new_child = self.put_rec(Some(child), key, value, depth + short.key.len())?;
                    short.value = Box::new(new_child);
                    return Ok(Node::Short(short));
                }

                // Partial match: split into a FullNode branching at the
                // first differing byte, carrying both the new value and
                // the short node's own previously-stored subtree. `short`
                // itself is discarded below — its own on-disk blob, if any,
                // is superseded by the split and must be reclaimed, unlike
                // `short.value`, which is relocated unchanged.
                if let Some(original_key) = short.original_key {
                    self.to_del.push(original_key);
                }
                let split_depth = depth + common;
                let branch = Node::Full(Box::new(FullNode::empty_dirty()));
                let branch = self.put_rec(Some(branch), key, value, split_depth)?;
                let original_value = *short.value;
                let branch = self.put_rec(Some(branch), &short.key, original_value, common)?;

                if common > 0 {
                    Ok(Node::Short(Box::new(ShortNode::new_dirty(
                        short.key[..common].to_vec(),
                        branch,
                    ))))
                } else {
                    Ok(branch)
                }
            }
            Node::Value(val) => {
                if depth == key.len() {
                    // Exact overwrite: `val` is replaced outright, so its
                    // own blob (if it had one) is now unreferenced.
                    if let Some(original_key) = val.original_key {
                        self.to_del.push(original_key);
                    }
                    Ok(value)
                } else if depth < key.len() {
                    // The existing value ends here but the new key runs
                    // further: branch, keeping the old value at the
                    // terminator slot and the new value under its byte.
                    let branch = Node::Full(Box::new(FullNode::empty_dirty()));
                    let branch = self.put_rec(Some(branch), key, value, depth)?;
                    let branch = self.put_rec(Some(branch), &key[..depth], Node::Value(val), depth)?;
                    Ok(branch)
                } else {
                    Err(TrieError::InvalidState(
                        "cannot insert past the end of the key".to_string(),
                    ))
                }
            }
            Node::Hash(digest) => {
                let loaded = self.load_node(&digest)?;
                self.put_rec(Some(loaded), key, value, depth)
            }
        }
    }

    /// Look up `key`. Any `HashNode` traversed along the way is expanded
    /// and the parent's slot rewritten in place, so repeat lookups of
    /// nearby keys avoid re-fetching from the store within the batch.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let root = self.root.take();
        let (found, new_root) = self.get_rec(root, key, 0)?;
        self.root = new_root;
        found.ok_or(TrieError::KeyNotFound)
    }

    fn get_rec(
        &mut self,
        node: Option<Node>,
        key: &[u8],
        depth: usize,
    ) -> Result<(Option<Vec<u8>>, Option<Node>)> {
        let node = match node {
            None => return Ok((None, None)),
            Some(n) => n,
        };

        match node {
            Node::Full(mut full) => {
                if depth > key.len() {
                    return Ok((None, Some(Node::Full(full))));
                }
                let slot = if depth == key.len() { TERMINATOR_SLOT } else { key[depth] as usize };
                let next_depth = if slot == TERMINATOR_SLOT { depth } else { depth + 1 };
                let child = full.children[slot].take();
                let (value, new_child) = self.get_rec(child, key, next_depth)?;
                full.children[slot] = new_child;
                Ok((value, Some(Node::Full(full))))
            }
            Node::Short(mut short) => {
                if depth > key.len() || !key[depth..].starts_with(short.key.as_slice()) {
                    return Ok((None, Some(Node::Short(short))));
                }
                let child = *short.value;
                let (value, new_child) = self.get_rec(Some(child), key, depth + short.key.len())?;
                short.value = Box::new(
                    new_child.expect("a short node's value slot is never legitimately emptied by get"),
                );
                Ok((value, Some(Node::Short(short))))
            }
            Node::Value(val) => {
                if depth == key.len() {
                    let bytes = val.value.clone();
                    Ok((Some(bytes), Some(Node::Value(val))))
                } else {
                    Ok((None, Some(Node::Value(val))))
                }
            }
            Node::Hash(digest) => {
                let loaded = self.load_node(&digest)?;
                self.get_rec(Some(loaded), key, depth)
            }
        }
    }

    /// Remove `key`. Collapsing a branch down to its single remaining
    /// child merges the consumed path bytes back into the surviving
    /// subtree's `ShortNode`, so canonical form (and the resulting root
    /// digest) is the same as if the removed key had never been inserted.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let root = self.root.take();
        let new_root = self.delete_rec(root, key, 0)?;
        self.root = new_root;
        Ok(())
    }

    fn delete_rec(&mut self, node: Option<Node>, key: &[u8], depth: usize) -> Result<Option<Node>> {
        let node = match node {
            None => return Err(TrieError::KeyNotFound),
            Some(n) => n,
        };

        match node {
            Node::Full(mut full) => {
                if depth > key.len() {
                    return Err(TrieError::KeyNotFound);
                }
                let slot = if depth == key.len() { TERMINATOR_SLOT } else { key[depth] as usize };
                let next_depth = if slot == TERMINATOR_SLOT { depth } else { depth + 1 };
                let child = full.children[slot].take();
                let new_child = self.delete_rec(child, key, next_depth)?;
                full.children[slot] = new_child;

                if let Some(only) = full.only_child() {
                    if let Some(original_key) = full.original_key {
                        self.to_del.push(original_key);
                    }
                    let child = full.children[only].take().expect("only_child points at an occupied slot");
                    if only == TERMINATOR_SLOT {
                        return Ok(Some(child));
                    }
                    let path_byte = only as u8;
                    // The surviving sibling may still be an unmaterialized
                    // `Hash` reference to a `ShortNode` on disk; load it so
                    // the merge below sees its real shape instead of
                    // wrapping it into an adjacent `ShortNode`.
                    let child = match child {
                        Node::Hash(digest) => self.load_node(&digest)?,
                        other => other,
                    };
                    return Ok(Some(match child {
                        Node::Short(mut inner) => {
                            let mut merged = Vec::with_capacity(1 + inner.key.len());
                            merged.push(path_byte);
                            merged.extend_from_slice(&inner.key);
                            inner.key = merged;
                            inner.status = NodeStatus::Dirty;
                            inner.cache = None;
                            Node::Short(inner)
                        }
                        other => Node::Short(Box::new(ShortNode::new_dirty(vec![path_byte], other))),
                    }));
                }

                full.status = NodeStatus::Dirty;
                Ok(Some(Node::Full(full)))
            }
            Node::Short(mut short) => {
                if depth > key.len() || !key[depth..].starts_with(short.key.as_slice()) {
                    return Err(TrieError::KeyNotFound);
                }
                let child = *short.value;
                let new_child = self.delete_rec(Some(child), key, depth + short.key.len())?;

                match new_child {
                    None => {
                        if let Some(original_key) = short.original_key {
                            self.to_del.push(original_key);
                        }
                        Ok(None)
                    }
                    Some(Node::Short(mut inner)) => {
                        if let Some(original_key) = short.original_key {
                            self.to_del.push(original_key);
                        }
                        let mut merged = short.key.clone();
                        merged.extend_from_slice(&inner.key);
                        inner.key = merged;
                        inner.status = NodeStatus::Dirty;
                        inner.cache = None;
                        Ok(Some(Node::Short(inner)))
                    }
                    Some(other) => {
                        short.value = Box::new(other);
                        short.status = NodeStatus::Dirty;
                        Ok(Some(Node::Short(short)))
                    }
                }
            }
            Node::Value(val) => {
                if depth == key.len() {
                    if let Some(original_key) = val.original_key {
                        self.to_del.push(original_key);
                    }
                    Ok(None)
                } else {
                    Err(TrieError::KeyNotFound)
                }
            }
            Node::Hash(digest) => {
                let loaded = self.load_node(&digest)?;
                self.delete_rec(Some(loaded), key, depth)
            }
        }
    }

    /// Load and hash-verify the node referenced by `digest`. A mismatch
    /// between the requested digest and the hash of the bytes actually
    /// read back means the store has been tampered with or corrupted.
    fn load_node(&mut self, digest: &crate::hash::Digest) -> Result<Node> {
        tracing::trace!(digest = %hex_prefix(digest), "hash node cache miss, loading from store");
        let data = self
            .txn
            .get(digest)
            .map_err(storage_err)?
            .ok_or_else(|| TrieError::MalformedNode("referenced node is missing from the store".to_string()))?;
        let node = codec::decode(&data, &self.hasher_factory)?;
        let actual = node
            .cached_digest()
            .expect("codec::decode always populates the cache");
        if &actual != digest {
            tracing::debug!(digest = %hex_prefix(digest), "digest mismatch on materialized node");
            return Err(TrieError::IntegrityError);
        }
        Ok(node)
    }

    /// Persist every dirty node depth-first, delete stale blobs, write the
    /// (possibly absent) root digest, then commit the transaction.
    pub fn commit(mut self) -> Result<()> {
        let stale = self.to_del.len();
        match self.root.take() {
            None => {
                tracing::debug!(stale, "committing an empty trie: clearing root key");
                self.txn.delete(&self.root_key).map_err(storage_err)?;
                for key in &self.to_del {
                    self.txn.delete(key).map_err(storage_err)?;
                }
                self.txn.commit().map_err(storage_err)
            }
            Some(mut root) => {
                let mut live_digests = std::collections::HashSet::new();
                persist_recursive(&mut root, &mut self.txn, &self.hasher_factory, &mut live_digests)?;
                let root_digest = root
                    .cached_digest()
                    .expect("a persisted root always carries a digest");
                tracing::debug!(digest = %hex_prefix(&root_digest), stale, "committing batch");
                // A digest still reachable from the committed tree — be it
                // freshly (re)written, or an untouched `Hash` reference —
                // must survive `to_del`'s flush even if it was separately
                // queued as stale, or this would erase a blob the tree
                // still points to (an idempotent put reproducing the same
                // bytes under its old digest is the common case).
                for key in &self.to_del {
                    if !live_digests.contains(key) {
                        self.txn.delete(key).map_err(storage_err)?;
                    }
                }
                self.txn.put(&self.root_key, &root_digest).map_err(storage_err)?;
                self.txn.commit().map_err(storage_err)
            }
        }
    }

    /// Discard every in-memory mutation and the underlying transaction.
    pub fn abort(self) -> Result<()> {
        self.txn.abort().map_err(storage_err)
    }

    /// Inspect the in-memory root directly. Exists so tests can assert on
    /// tree shape (e.g. "a shared prefix collapses into one `ShortNode`")
    /// without a matching public traversal API.
    #[cfg(any(test, feature = "test-support"))]
    pub fn root_for_test(&self) -> Option<Node> {
        self.root.clone()
    }
}

fn persist_recursive<T: KvTransaction, F: HasherFactory>(
    node: &mut Node,
    txn: &mut T,
    factory: &F,
    live_digests: &mut std::collections::HashSet<crate::hash::Digest>,
) -> Result<()> {
    match node {
        Node::Full(full) => {
            for slot in full.children.iter_mut() {
                if let Some(child) = slot {
                    persist_recursive(child, txn, factory, live_digests)?;
                }
            }
        }
        Node::Short(short) => persist_recursive(&mut short.value, txn, factory, live_digests)?,
        Node::Value(_) | Node::Hash(_) => {}
    }
    node.persist(txn, factory)?;
    if let Some(digest) = node.cached_digest() {
        live_digests.insert(digest);
    }
    Ok(())
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn hex_prefix(digest: &crate::hash::Digest) -> String {
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Keccak256Factory;
    use crate::storage::memory::MemoryKvStore;
    use crate::storage::TransactionalKvStorage;

    fn open_batch(store: &MemoryKvStore, root_key: &[u8]) -> Batch<crate::storage::memory::MemoryTxn, Keccak256Factory> {
        let mut txn = store.transaction().unwrap();
        let root = match txn.get(root_key).unwrap() {
            Some(bytes) if !bytes.is_empty() => Some(Node::Hash(crate::node::digest_from_slice(&bytes).unwrap())),
            _ => None,
        };
        Batch::new(root, txn, root_key.to_vec(), Keccak256Factory)
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryKvStore::new();
        let root_key = b"root".to_vec();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"alpha", b"1").unwrap();
        batch.put(b"alphabet", b"2").unwrap();
        batch.commit().unwrap();

        let mut batch = open_batch(&store, &root_key);
        assert_eq!(batch.get(b"alpha").unwrap(), b"1");
        assert_eq!(batch.get(b"alphabet").unwrap(), b"2");
        assert!(matches!(batch.get(b"missing"), Err(TrieError::KeyNotFound)));
        batch.abort().unwrap();
    }

    #[test]
    fn delete_is_put_inverse_for_a_single_key() {
        let store = MemoryKvStore::new();
        let root_key = b"root".to_vec();
        let factory = Keccak256Factory;

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"abc", b"one").unwrap();
        batch.commit().unwrap();
        let mut txn = store.transaction().unwrap();
        let digest_before = txn.get(&root_key).unwrap().unwrap();
        txn.abort().unwrap();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"abcd", b"two").unwrap();
        batch.delete(b"abcd").unwrap();
        let mut root = batch.root.take().unwrap();
        let digest_after = root.digest(&factory).unwrap();

        assert_eq!(digest_before, digest_after.to_vec());
    }

    #[test]
    fn delete_collapses_onto_a_sibling_loaded_from_a_hash_reference() {
        // Build a FullNode with two occupied slots, commit it so both
        // children round-trip through storage as `Hash` references, then
        // delete one key. The surviving sibling is a `ShortNode` this
        // batch never touched directly — it must be loaded and merged
        // with the consumed path byte, not wrapped unchecked.
        let store = MemoryKvStore::new();
        let root_key = b"root".to_vec();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"abc1", b"v1").unwrap();
        batch.put(b"abc2", b"v2").unwrap();
        batch.commit().unwrap();

        let mut batch = open_batch(&store, &root_key);
        batch.delete(b"abc2").unwrap();
        batch.commit().unwrap();

        let mut batch = open_batch(&store, &root_key);
        assert_eq!(batch.get(b"abc1").unwrap(), b"v1");
        match batch.root_for_test() {
            Some(Node::Short(short)) => assert_eq!(short.key, b"abc1"),
            other => panic!("expected a single merged short node, got {other:?}"),
        }
        batch.abort().unwrap();
    }

    #[test]
    fn overwriting_a_key_across_commits_does_not_leak_the_old_blob() {
        let store = MemoryKvStore::new();
        let root_key = b"root".to_vec();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"k", b"v1").unwrap();
        batch.commit().unwrap();
        let after_first_put = store.len();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"k", b"v2").unwrap();
        batch.commit().unwrap();

        assert_eq!(store.len(), after_first_put);
        let mut batch = open_batch(&store, &root_key);
        assert_eq!(batch.get(b"k").unwrap(), b"v2");
        batch.abort().unwrap();
    }

    #[test]
    fn delete_missing_key_reports_not_found() {
        let store = MemoryKvStore::new();
        let root_key = b"root".to_vec();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"abc", b"one").unwrap();
        assert!(matches!(batch.delete(b"xyz"), Err(TrieError::KeyNotFound)));
        batch.abort().unwrap();
    }

    #[test]
    fn abort_leaves_store_untouched() {
        let store = MemoryKvStore::new();
        let root_key = b"root".to_vec();

        let mut batch = open_batch(&store, &root_key);
        batch.put(b"abc", b"one").unwrap();
        batch.abort().unwrap();

        let mut txn = store.transaction().unwrap();
        assert_eq!(txn.get(&root_key).unwrap(), None);
    }
}
