//! Error types for TChain

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`ChainError`], used for logging and for
/// deciding whether a failure is the caller's fault or the node's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Crypto,
    Consensus,
    Storage,
    Transport,
    Config,
}

/// Every failure the node can report. The enum is serializable so a remote
/// caller receives exactly the variant the handler produced.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ChainError {
    // Structural
    #[error("empty transaction data")]
    EmptyData,
    #[error("transaction data too large: {size} bytes (max: {max})")]
    TransactionTooLarge { size: usize, max: usize },
    #[error("too many transactions in block: {count} (max: {max})")]
    TooManyTransactions { count: usize, max: usize },
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("encoding error: {0}")]
    EncodingError(String),

    // Crypto
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("cryptographic error: {0}")]
    CryptoError(String),

    // Consensus
    #[error("invalid difficulty {0}")]
    InvalidDifficulty(u32),
    #[error("invalid nonce")]
    InvalidNonce,
    #[error("invalid merkle root")]
    InvalidMerkleRoot,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("duplicate block")]
    Duplicate,
    #[error("parent node is missing")]
    MissingParent,
    #[error("proof of work not found")]
    NonceNotFound,

    // Storage
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("key not found")]
    NotFound,

    // Transport
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout for peer")]
    Timeout,
    #[error("IO error: {0}")]
    IoError(String),

    #[error("config error: {0}")]
    ConfigError(String),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::EmptyData
            | ChainError::TransactionTooLarge { .. }
            | ChainError::TooManyTransactions { .. }
            | ChainError::UnsupportedVersion(_)
            | ChainError::EncodingError(_) => ErrorKind::Structural,
            ChainError::InvalidSignature
            | ChainError::InvalidChecksum
            | ChainError::CryptoError(_) => ErrorKind::Crypto,
            ChainError::InvalidDifficulty(_)
            | ChainError::InvalidNonce
            | ChainError::InvalidMerkleRoot
            | ChainError::InvalidTimestamp
            | ChainError::Duplicate
            | ChainError::MissingParent
            | ChainError::NonceNotFound => ErrorKind::Consensus,
            ChainError::DatabaseError(_) | ChainError::NotFound => ErrorKind::Storage,
            ChainError::NetworkError(_) | ChainError::Timeout | ChainError::IoError(_) => {
                ErrorKind::Transport
            }
            ChainError::ConfigError(_) => ErrorKind::Config,
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for ChainError {
    fn from(err: bincode::Error) -> Self {
        ChainError::EncodingError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ChainError::EmptyData.kind(), ErrorKind::Structural);
        assert_eq!(ChainError::InvalidChecksum.kind(), ErrorKind::Crypto);
        assert_eq!(ChainError::MissingParent.kind(), ErrorKind::Consensus);
        assert_eq!(ChainError::NotFound.kind(), ErrorKind::Storage);
        assert_eq!(ChainError::Timeout.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_error_survives_bincode() {
        let err = ChainError::TooManyTransactions { count: 65, max: 64 };
        let bytes = bincode::serialize(&err).unwrap();
        let decoded: ChainError = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, err);
        assert_eq!(
            decoded.to_string(),
            "too many transactions in block: 65 (max: 64)"
        );
    }
}
