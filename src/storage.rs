//! The backing key-value store, specified only through its interface.
//!
//! The concrete store (LMDB, RocksDB, an in-memory map, ...) is an external
//! collaborator; the trie only ever talks to it through a
//! [`KvTransaction`] opened from a [`TransactionalKvStorage`]. Every node
//! read/write the trie performs flows through one such transaction.

/// A single logical unit of reads and writes against the backing store.
///
/// `get` returns `Ok(None)` for an absent key rather than a distinguished
/// not-found error — that sentinel belongs to the trie's own `KeyNotFound`,
/// reserved for "no such logical key in the mapping" (see `TrieError`).
pub trait KvTransaction {
    type Error: std::error::Error + Send + Sync + 'static;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Self::Error>;
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error>;
    fn delete(&mut self, key: &[u8]) -> Result<(), Self::Error>;
    fn commit(self) -> Result<(), Self::Error>;
    fn abort(self) -> Result<(), Self::Error>;
}

/// Opens [`KvTransaction`]s against the backing store.
pub trait TransactionalKvStorage {
    type Txn: KvTransaction;

    fn transaction(&self) -> Result<Self::Txn, <Self::Txn as KvTransaction>::Error>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    //! An in-memory [`TransactionalKvStorage`] reference implementation,
    //! used by this crate's own tests. Not a production backing store —
    //! the spec treats the backing store as an external collaborator.

    use super::{KvTransaction, TransactionalKvStorage};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::rc::Rc;

    #[derive(Debug, Default, Clone)]
    pub struct MemoryKvStore {
        data: Rc<RefCell<HashMap<Vec<u8>, Vec<u8>>>>,
    }

    impl MemoryKvStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.data.borrow().len()
        }

        pub fn is_empty(&self) -> bool {
            self.data.borrow().is_empty()
        }

        pub fn contains_key(&self, key: &[u8]) -> bool {
            self.data.borrow().contains_key(key)
        }
    }

    impl TransactionalKvStorage for MemoryKvStore {
        type Txn = MemoryTxn;

        fn transaction(&self) -> Result<Self::Txn, Infallible> {
            Ok(MemoryTxn {
                store: self.data.clone(),
                pending_put: HashMap::new(),
                pending_delete: Vec::new(),
            })
        }
    }

    /// Buffers writes until `commit`; `abort` simply drops the buffer.
    pub struct MemoryTxn {
        store: Rc<RefCell<HashMap<Vec<u8>, Vec<u8>>>>,
        pending_put: HashMap<Vec<u8>, Vec<u8>>,
        pending_delete: Vec<Vec<u8>>,
    }

    impl KvTransaction for MemoryTxn {
        type Error = Infallible;

        fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Infallible> {
            self.pending_delete.retain(|deleted| deleted != key);
            self.pending_put.insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Infallible> {
            if let Some(value) = self.pending_put.get(key) {
                return Ok(Some(value.clone()));
            }
            if self.pending_delete.iter().any(|deleted| deleted == key) {
                return Ok(None);
            }
            Ok(self.store.borrow().get(key).cloned())
        }

        fn delete(&mut self, key: &[u8]) -> Result<(), Infallible> {
            self.pending_put.remove(key);
            self.pending_delete.push(key.to_vec());
            Ok(())
        }

        fn commit(self) -> Result<(), Infallible> {
            let mut store = self.store.borrow_mut();
            for key in self.pending_delete {
                store.remove(&key);
            }
            for (key, value) in self.pending_put {
                store.insert(key, value);
            }
            Ok(())
        }

        fn abort(self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn commit_persists_writes_and_deletes() {
            let store = MemoryKvStore::new();
            let mut txn = store.transaction().unwrap();
            txn.put(b"a", b"1").unwrap();
            txn.put(b"b", b"2").unwrap();
            txn.commit().unwrap();

            let mut txn = store.transaction().unwrap();
            assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
            txn.delete(b"a").unwrap();
            txn.commit().unwrap();

            assert!(!store.contains_key(b"a"));
            assert!(store.contains_key(b"b"));
        }

        #[test]
        fn abort_discards_pending_writes() {
            let store = MemoryKvStore::new();
            let mut txn = store.transaction().unwrap();
            txn.put(b"a", b"1").unwrap();
            txn.abort().unwrap();

            assert!(store.is_empty());
        }
    }
}
