use thiserror::Error;

/// Errors surfaced by the trie engine.
///
/// Mirrors the error kinds the original Go implementation raised as plain
/// `fmt.Errorf` strings (`[Trie] key not found`, `[Trie] Cannot insert`,
/// `hash does not match`), typed here so callers can match on them instead
/// of parsing messages.
#[derive(Debug, Error)]
pub enum TrieError {
    #[error("key not found")]
    KeyNotFound,

    #[error("malformed node: {0}")]
    MalformedNode(String),

    #[error("integrity error: on-disk hash does not match referenced digest")]
    IntegrityError,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub type Result<T> = std::result::Result<T, TrieError>;

pub(crate) fn storage_err<E>(error: E) -> TrieError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TrieError::Storage(Box::new(error))
}
