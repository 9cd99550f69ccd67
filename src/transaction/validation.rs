/// Validation logic for transactions separated from type definitions
use crate::crypto::{hash, Verifier};
use crate::error::ChainError;
use crate::transaction::types::{Transaction, TX_DATA_SIZE_LIMIT};

impl Transaction {
    /// Stateless structural and cryptographic validation.
    ///
    /// Checks run cheapest first: payload presence and size, signature
    /// presence, checksum, signature, then the payload hook.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.data.is_empty() {
            return Err(ChainError::EmptyData);
        }

        if self.data.len() > TX_DATA_SIZE_LIMIT {
            return Err(ChainError::TransactionTooLarge {
                size: self.data.len(),
                max: TX_DATA_SIZE_LIMIT,
            });
        }

        let signature = self.signature.as_ref().ok_or(ChainError::InvalidSignature)?;

        let checksum = hash(&self.data);
        if checksum != self.hash {
            return Err(ChainError::InvalidChecksum);
        }

        if !signature.verify(&checksum) {
            return Err(ChainError::InvalidSignature);
        }

        verify_payload(&self.data)
    }
}

/// Application-level payload rules. Every payload is currently accepted.
pub fn verify_payload(_data: &[u8]) -> Result<(), ChainError> {
    Ok(())
}
