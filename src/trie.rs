//! The top-level handle: a thin facade that opens a [`Batch`] per
//! operation and commits (or aborts) it. Mirrors
//! `examples/original_source/trie.go` and `mpt/trie.go`.

use crate::batch::Batch;
use crate::error::{storage_err, Result};
use crate::hash::HasherFactory;
use crate::node::{digest_from_slice, Node};
use crate::storage::{KvTransaction, TransactionalKvStorage};

/// A persistent, authenticated key-value index over a transactional
/// backing store. Cheap to clone when both `S` and `F` are (the common
/// case — a store handle and a zero-sized hasher factory).
pub struct Trie<S: TransactionalKvStorage, F: HasherFactory> {
    kv: S,
    hasher_factory: F,
    root_key: Vec<u8>,
}

impl<S: TransactionalKvStorage, F: HasherFactory + Clone> Trie<S, F> {
    pub fn new(kv: S, hasher_factory: F, root_key: Vec<u8>) -> Self {
        Self {
            kv,
            hasher_factory,
            root_key,
        }
    }

    /// Open a batch: a transaction plus the current root, materialized as
    /// a lazy `HashNode` if one is stored, or empty if the key has never
    /// been written (or was written empty).
    pub fn batch(&self) -> Result<Batch<S::Txn, F>> {
        let mut txn = self.kv.transaction().map_err(storage_err)?;
        let root = match txn.get(&self.root_key).map_err(storage_err)? {
            Some(bytes) if !bytes.is_empty() => Some(Node::Hash(digest_from_slice(&bytes)?)),
            _ => None,
        };
        tracing::debug!(root_present = root.is_some(), "materialized trie root for new batch");
        Ok(Batch::new(root, txn, self.root_key.clone(), self.hasher_factory.clone()))
    }

    /// Convenience wrapper: open a batch, read `key`, then abort — a
    /// lookup never needs to persist the cache expansions it produces.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut batch = self.batch()?;
        let result = batch.get(key);
        batch.abort()?;
        result
    }

    /// Convenience wrapper: open a batch, insert `key`/`value`, commit.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = self.batch()?;
        batch.put(key, value)?;
        batch.commit()
    }

    /// Convenience wrapper: open a batch, remove `key`, commit.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = self.batch()?;
        batch.delete(key)?;
        batch.commit()
    }

    /// The digest currently stored under the root key, or an empty vector
    /// if the trie has never been written to (or was emptied by deleting
    /// its last key).
    pub fn root_hash(&self) -> Result<Vec<u8>> {
        let mut txn = self.kv.transaction().map_err(storage_err)?;
        let bytes = txn.get(&self.root_key).map_err(storage_err)?;
        txn.abort().map_err(storage_err)?;
        Ok(bytes.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrieError;
    use crate::hash::Keccak256Factory;
    use crate::storage::memory::MemoryKvStore;

    fn new_trie() -> Trie<MemoryKvStore, Keccak256Factory> {
        Trie::new(MemoryKvStore::new(), Keccak256Factory, b"root".to_vec())
    }

    #[test]
    fn empty_trie_has_an_empty_root_hash() {
        let trie = new_trie();
        assert!(trie.root_hash().unwrap().is_empty());
    }

    #[test]
    fn put_get_delete_round_trip() {
        let trie = new_trie();
        trie.put(b"k1", b"v1").unwrap();
        trie.put(b"k2", b"v2").unwrap();
        assert_eq!(trie.get(b"k1").unwrap(), b"v1");
        assert_eq!(trie.get(b"k2").unwrap(), b"v2");
        assert!(!trie.root_hash().unwrap().is_empty());

        trie.delete(b"k1").unwrap();
        assert!(matches!(trie.get(b"k1"), Err(TrieError::KeyNotFound)));
        assert_eq!(trie.get(b"k2").unwrap(), b"v2");
    }

    #[test]
    fn deleting_the_last_key_empties_the_root() {
        let trie = new_trie();
        trie.put(b"only", b"value").unwrap();
        trie.delete(b"only").unwrap();
        assert!(trie.root_hash().unwrap().is_empty());
        assert!(matches!(trie.get(b"only"), Err(TrieError::KeyNotFound)));
    }

    #[test]
    fn overwriting_a_key_changes_its_value_but_not_others() {
        let trie = new_trie();
        trie.put(b"shared-prefix-a", b"1").unwrap();
        trie.put(b"shared-prefix-b", b"2").unwrap();
        trie.put(b"shared-prefix-a", b"3").unwrap();
        assert_eq!(trie.get(b"shared-prefix-a").unwrap(), b"3");
        assert_eq!(trie.get(b"shared-prefix-b").unwrap(), b"2");
    }

    #[test]
    fn repeated_put_is_idempotent_on_the_root_digest() {
        let trie = new_trie();
        trie.put(b"a", b"1").unwrap();
        trie.put(b"b", b"2").unwrap();
        let first = trie.root_hash().unwrap();
        trie.put(b"a", b"1").unwrap();
        let second = trie.root_hash().unwrap();
        assert_eq!(first, second);
    }
}
