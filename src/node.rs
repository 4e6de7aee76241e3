//! The node algebra: a closed sum of four variants sharing a small set of
//! capabilities (digest, serialize, persist). Mirrors
//! `examples/original_source/internal/*.go` (`FullNode`, `ShortNode`,
//! `ValueNode`, `HashNode`), translated from Go's interface-with-four-impls
//! idiom into a tagged Rust enum.

use crate::codec;
use crate::error::{storage_err, Result, TrieError};
use crate::hash::{Digest, HasherFactory, HASH_SIZE};
use crate::storage::KvTransaction;

/// Terminator slot index in a [`FullNode`]'s children: a key ending exactly
/// at this node carries its value here, alongside 256 byte-indexed slots.
pub const TERMINATOR_SLOT: usize = 256;
pub const FULL_NODE_SLOTS: usize = 257;

/// A node's lifecycle stage. `Hash` references have no status field — they
/// are clean by construction, since they are nothing but a digest.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NodeStatus {
    Clean,
    Dirty,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct FullNode {
    pub children: Box<[Option<Node>; FULL_NODE_SLOTS]>,
    pub cache: Option<Digest>,
    pub status: NodeStatus,
    pub original_key: Option<Digest>,
}

#[derive(Debug, Clone)]
pub struct ShortNode {
    pub key: Vec<u8>,
    pub value: Box<Node>,
    pub cache: Option<Digest>,
    pub status: NodeStatus,
    pub original_key: Option<Digest>,
}

#[derive(Debug, Clone)]
pub struct ValueNode {
    pub value: Vec<u8>,
    pub cache: Option<Digest>,
    pub status: NodeStatus,
    pub original_key: Option<Digest>,
}

/// A closed sum of the four node variants. `Hash` is a lazy reference by
/// digest to a node materialized only in the backing store.
#[derive(Debug, Clone)]
pub enum Node {
    Full(Box<FullNode>),
    Short(Box<ShortNode>),
    Value(Box<ValueNode>),
    Hash(Digest),
}

impl FullNode {
    pub fn empty_dirty() -> Self {
        Self {
            children: Box::new(std::array::from_fn(|_| None)),
            cache: None,
            status: NodeStatus::Dirty,
            original_key: None,
        }
    }

    /// Number of occupied slots, and the index of the only one if exactly
    /// one is occupied. Canonical form requires at least two; a FullNode
    /// that drops to one slot must be collapsed by the caller (delete).
    pub fn only_child(&self) -> Option<usize> {
        let mut found: Option<usize> = None;
        for (index, slot) in self.children.iter().enumerate() {
            if slot.is_some() {
                if found.is_some() {
                    return None;
                }
                found = Some(index);
            }
        }
        found
    }
}

impl ShortNode {
    pub fn new_dirty(key: Vec<u8>, value: Node) -> Self {
        Self {
            key,
            value: Box::new(value),
            cache: None,
            status: NodeStatus::Dirty,
            original_key: None,
        }
    }
}

impl ValueNode {
    pub fn new_dirty(value: Vec<u8>) -> Self {
        Self {
            value,
            cache: None,
            status: NodeStatus::Dirty,
            original_key: None,
        }
    }
}

impl Node {
    pub fn value(value: Vec<u8>) -> Node {
        Node::Value(Box::new(ValueNode::new_dirty(value)))
    }

    /// The cache unconditionally, with no recomputation. `Hash` nodes
    /// return their own digest — they are, by construction, clean.
    pub fn cached_digest(&self) -> Option<Digest> {
        match self {
            Node::Full(n) => n.cache,
            Node::Short(n) => n.cache,
            Node::Value(n) => n.cache,
            Node::Hash(digest) => Some(*digest),
        }
    }

    pub fn status(&self) -> NodeStatus {
        match self {
            Node::Full(n) => n.status,
            Node::Short(n) => n.status,
            Node::Value(n) => n.status,
            Node::Hash(_) => NodeStatus::Clean,
        }
    }

    fn mark_dirty(&mut self) {
        match self {
            Node::Full(n) => n.status = NodeStatus::Dirty,
            Node::Short(n) => n.status = NodeStatus::Dirty,
            Node::Value(n) => n.status = NodeStatus::Dirty,
            Node::Hash(_) => {}
        }
    }

    /// Recompute the digest from a fresh serialize if dirty, otherwise
    /// return the cache. Serializing transitions the node to `Clean`.
    pub fn digest<F: HasherFactory>(&mut self, factory: &F) -> Result<Digest> {
        if let Node::Hash(digest) = self {
            return Ok(*digest);
        }
        if self.status() == NodeStatus::Dirty || self.cached_digest().is_none() {
            self.serialize(factory)?;
        }
        Ok(self
            .cached_digest()
            .expect("serialize always populates the cache"))
    }

    /// Encode this node's content to bytes, writing the resulting digest
    /// into `cache` and transitioning status to `Clean`. Children are
    /// referenced by digest only (never serialized recursively here) —
    /// callers (`Batch::commit`) are responsible for persisting children
    /// first, depth-first, so their digests are already settled.
    pub fn serialize<F: HasherFactory>(&mut self, factory: &F) -> Result<Vec<u8>> {
        match self {
            Node::Hash(_) => Ok(Vec::new()),
            Node::Value(n) => {
                let bytes = codec::encode_value(&n.value);
                let digest = crate::hash::digest_with(factory, &bytes);
                n.cache = Some(digest);
                n.status = NodeStatus::Clean;
                Ok(bytes)
            }
            Node::Short(n) => {
                let child_digest = n.value.digest(factory)?;
                let bytes = codec::encode_short(&n.key, &child_digest);
                let digest = crate::hash::digest_with(factory, &bytes);
                n.cache = Some(digest);
                n.status = NodeStatus::Clean;
                Ok(bytes)
            }
            Node::Full(n) => {
                let mut child_digests: [Option<Digest>; FULL_NODE_SLOTS] = [None; FULL_NODE_SLOTS];
                for (index, slot) in n.children.iter_mut().enumerate() {
                    if let Some(child) = slot {
                        child_digests[index] = Some(child.digest(factory)?);
                    }
                }
                let bytes = codec::encode_full(&child_digests);
                let digest = crate::hash::digest_with(factory, &bytes);
                n.cache = Some(digest);
                n.status = NodeStatus::Clean;
                Ok(bytes)
            }
        }
    }

    /// `persist`: delete the stale blob if `DELETED`, otherwise write the
    /// serialized node under its digest. If the node was previously
    /// persisted under a different digest — a structural rewrite changed
    /// its content, e.g. an overwritten value or a re-child'd branch — the
    /// stale blob at the old digest is reclaimed too, unless the rewrite
    /// happened to reproduce the exact same bytes (idempotent put). `Hash`
    /// nodes are a no-op — they reference a node that already lives in the
    /// store.
    pub fn persist<F: HasherFactory, T: KvTransaction>(
        &mut self,
        txn: &mut T,
        factory: &F,
    ) -> Result<()> {
        if let Node::Hash(_) = self {
            return Ok(());
        }

        if self.status() == NodeStatus::Deleted {
            if let Some(original_key) = self.original_key() {
                txn.delete(&original_key).map_err(storage_err)?;
            }
            return Ok(());
        }

        let stale = self.original_key();
        let bytes = self.serialize(factory)?;
        let digest = self.cached_digest().expect("serialize populates cache");
        txn.put(&digest, &bytes).map_err(storage_err)?;
        if let Some(stale_digest) = stale {
            if stale_digest != digest {
                txn.delete(&stale_digest).map_err(storage_err)?;
            }
        }
        self.set_original_key(digest);
        Ok(())
    }

    pub fn original_key(&self) -> Option<Digest> {
        match self {
            Node::Full(n) => n.original_key,
            Node::Short(n) => n.original_key,
            Node::Value(n) => n.original_key,
            Node::Hash(_) => None,
        }
    }

    fn set_original_key(&mut self, digest: Digest) {
        match self {
            Node::Full(n) => n.original_key = Some(digest),
            Node::Short(n) => n.original_key = Some(digest),
            Node::Value(n) => n.original_key = Some(digest),
            Node::Hash(_) => {}
        }
    }

    pub fn set_dirty(&mut self) {
        self.mark_dirty();
    }

    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            Node::Value(n) => Some(&n.value),
            _ => None,
        }
    }
}

pub(crate) fn digest_from_slice(bytes: &[u8]) -> Result<Digest> {
    if bytes.len() != HASH_SIZE {
        return Err(TrieError::MalformedNode(format!(
            "expected a {HASH_SIZE}-byte digest, got {}",
            bytes.len()
        )));
    }
    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(bytes);
    Ok(digest)
}
