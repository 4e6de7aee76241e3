//! The trie's sole cryptographic configuration point.
//!
//! A [`HasherFactory`] is a nullary constructor for a fresh, zero-state
//! [`IncrementalHasher`]. The factory is load-bearing: a hasher carries
//! mutable state internally and must never be reused across two
//! serializations without an explicit reset, so every `digest()` call asks
//! the factory for a brand new instance rather than resetting a shared one.

use tiny_keccak::{Hasher as _, Keccak};

pub const HASH_SIZE: usize = 32;
pub type Digest = [u8; HASH_SIZE];

/// An incremental hasher: `update` any number of times, then `finalize` once.
pub trait IncrementalHasher {
    fn update(&mut self, bytes: &[u8]);
    fn finalize(self) -> Digest;
}

/// Produces a fresh [`IncrementalHasher`] on demand. Implementations must
/// not carry state between calls to `new_hasher`.
pub trait HasherFactory {
    type Hasher: IncrementalHasher;

    fn new_hasher(&self) -> Self::Hasher;
}

/// One-shot convenience: hash `data` with a fresh hasher from `factory`.
pub fn digest_with<F: HasherFactory>(factory: &F, data: &[u8]) -> Digest {
    let mut hasher = factory.new_hasher();
    hasher.update(data);
    hasher.finalize()
}

/// The default hasher: Keccak-256, matching the teacher crate's choice and
/// the hash function RSK/Ethereum-family tries commonly use. Callers that
/// need a different hash function (the spec treats this as an external
/// collaborator) implement [`HasherFactory`] themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Factory;

impl HasherFactory for Keccak256Factory {
    type Hasher = Keccak256Hasher;

    fn new_hasher(&self) -> Self::Hasher {
        Keccak256Hasher(Keccak::v256())
    }
}

pub struct Keccak256Hasher(Keccak);

impl IncrementalHasher for Keccak256Hasher {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize(self) -> Digest {
        let mut output = [0u8; HASH_SIZE];
        self.0.finalize(&mut output);
        output
    }
}

pub fn keccak256(data: &[u8]) -> Digest {
    digest_with(&Keccak256Factory, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_is_stable_for_input() {
        assert_eq!(keccak256(b"mpt"), keccak256(b"mpt"));
    }

    #[test]
    fn keccak_differs_for_different_input() {
        assert_ne!(keccak256(b"mpt-a"), keccak256(b"mpt-b"));
    }

    #[test]
    fn factory_produces_independent_hashers() {
        let factory = Keccak256Factory;
        let mut first = factory.new_hasher();
        first.update(b"one");
        let mut second = factory.new_hasher();
        second.update(b"two");
        assert_ne!(first.finalize(), second.finalize());
    }
}
