//! Node wire format: a tagged, length-framed encoding with three tag
//! variants (Value/Short/Full). `HashNode`s are never serialized — they
//! *are* a digest. The framing is fixed here but deliberately simple: the
//! spec requires only that it be deterministic and round-trippable
//! (`digest(decode(encode(n))) == digest(n)`), since the original's
//! protobuf framing is explicitly out of scope.
//!
//! Reuses the teacher crate's varint scheme (`varint.rs`) to length-prefix
//! a `ShortNode`'s path, the one variable-length field in the format.

use crate::error::{Result, TrieError};
use crate::hash::{Digest, HasherFactory, HASH_SIZE};
use crate::node::FULL_NODE_SLOTS;
use crate::node::{digest_from_slice, FullNode, Node, NodeStatus, ShortNode, ValueNode};
use crate::varint;

const TAG_VALUE: u8 = 0x00;
const TAG_SHORT: u8 = 0x01;
const TAG_FULL: u8 = 0x02;

const SLOT_ABSENT: u8 = 0x00;
const SLOT_PRESENT: u8 = 0x01;

pub fn encode_value(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + value.len());
    out.push(TAG_VALUE);
    out.extend_from_slice(value);
    out
}

pub fn encode_short(key: &[u8], child_digest: &Digest) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + varint::size_of(key.len() as u64) + key.len() + HASH_SIZE);
    out.push(TAG_SHORT);
    out.extend_from_slice(&varint::encode(key.len() as u64));
    out.extend_from_slice(key);
    out.extend_from_slice(child_digest);
    out
}

pub fn encode_full(children: &[Option<Digest>; FULL_NODE_SLOTS]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + FULL_NODE_SLOTS * (1 + HASH_SIZE));
    out.push(TAG_FULL);
    for slot in children {
        match slot {
            None => out.push(SLOT_ABSENT),
            Some(digest) => {
                out.push(SLOT_PRESENT);
                out.extend_from_slice(digest);
            }
        }
    }
    out
}

/// Decode a node record loaded from the store. The returned node is born
/// `Clean` with its cache set to the digest of `data` itself — since the
/// encoding is deterministic, that equals the digest a fresh `serialize()`
/// of the same logical content would produce (invariant 2).
pub fn decode<F: HasherFactory>(data: &[u8], factory: &F) -> Result<Node> {
    let digest = crate::hash::digest_with(factory, data);
    let (tag, rest) = data
        .split_first()
        .ok_or_else(|| TrieError::MalformedNode("empty node payload".to_string()))?;

    match *tag {
        TAG_VALUE => Ok(Node::Value(Box::new(ValueNode {
            value: rest.to_vec(),
            cache: Some(digest),
            status: NodeStatus::Clean,
            original_key: Some(digest),
        }))),
        TAG_SHORT => decode_short(rest, digest),
        TAG_FULL => decode_full(rest, digest),
        other => Err(TrieError::MalformedNode(format!(
            "unknown node tag {other:#04x}"
        ))),
    }
}

fn decode_short(rest: &[u8], digest: Digest) -> Result<Node> {
    let mut offset = 0usize;
    let key_len = varint::decode_from_slice(rest, &mut offset)
        .map_err(TrieError::MalformedNode)? as usize;

    let key_end = offset
        .checked_add(key_len)
        .ok_or_else(|| TrieError::MalformedNode("short node key length overflow".to_string()))?;
    if key_end > rest.len() {
        return Err(TrieError::MalformedNode(
            "short node key is truncated".to_string(),
        ));
    }
    let key = rest[offset..key_end].to_vec();

    let child_bytes = &rest[key_end..];
    if child_bytes.is_empty() {
        return Err(TrieError::MalformedNode(
            "nil short node value".to_string(),
        ));
    }
    let child_digest = digest_from_slice(child_bytes)?;

    Ok(Node::Short(Box::new(ShortNode {
        key,
        value: Box::new(Node::Hash(child_digest)),
        cache: Some(digest),
        status: NodeStatus::Clean,
        original_key: Some(digest),
    })))
}

fn decode_full(rest: &[u8], digest: Digest) -> Result<Node> {
    let mut children: Box<[Option<Node>; FULL_NODE_SLOTS]> = Box::new(std::array::from_fn(|_| None));
    let mut offset = 0usize;

    for slot in children.iter_mut() {
        let flag = *rest.get(offset).ok_or_else(|| {
            TrieError::MalformedNode("full node payload is truncated".to_string())
        })?;
        offset += 1;

        match flag {
            SLOT_ABSENT => {}
            SLOT_PRESENT => {
                let end = offset + HASH_SIZE;
                if end > rest.len() {
                    return Err(TrieError::MalformedNode(
                        "nil full node child".to_string(),
                    ));
                }
                let child_digest = digest_from_slice(&rest[offset..end])?;
                offset = end;
                *slot = Some(Node::Hash(child_digest));
            }
            other => {
                return Err(TrieError::MalformedNode(format!(
                    "unknown full node slot flag {other:#04x}"
                )))
            }
        }
    }

    if offset != rest.len() {
        return Err(TrieError::MalformedNode(
            "full node payload has trailing data".to_string(),
        ));
    }

    Ok(Node::Full(Box::new(FullNode {
        children,
        cache: Some(digest),
        status: NodeStatus::Clean,
        original_key: Some(digest),
    })))
}
