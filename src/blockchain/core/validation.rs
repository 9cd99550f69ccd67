use super::chain::Block;
use crate::error::ChainError;
use crate::merkle::merkle_root;
use crate::pow::{Difficulty, MAX_DIFFICULTY};

pub const SUPPORTED_VERSIONS: &[u8] = &[1];
/// Lowest difficulty a non-genesis block may declare.
pub const MIN_DIFFICULTY: Difficulty = Difficulty(15);
pub const BLOCK_TX_LIMIT: usize = 64;

impl Block {
    /// Stateless block validation.
    ///
    /// Order decides which error surfaces when several invariants are broken:
    /// structural checks, proof of work, each transaction, then the Merkle root.
    pub fn verify(&self) -> Result<(), ChainError> {
        if !verify_version(self.header.version) {
            return Err(ChainError::UnsupportedVersion(self.header.version));
        }

        if self.transactions.len() > BLOCK_TX_LIMIT {
            return Err(ChainError::TooManyTransactions {
                count: self.transactions.len(),
                max: BLOCK_TX_LIMIT,
            });
        }

        if !verify_difficulty(self.header.difficulty) {
            return Err(ChainError::InvalidDifficulty(self.header.difficulty.0));
        }

        self.header.difficulty.verify_nonce(&self.header)?;

        for tx in &self.transactions {
            tx.verify()?;
        }

        if merkle_root(&self.transactions) != self.header.merkle_root {
            return Err(ChainError::InvalidMerkleRoot);
        }

        Ok(())
    }
}

pub fn verify_version(version: u8) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

pub fn verify_difficulty(difficulty: Difficulty) -> bool {
    difficulty >= MIN_DIFFICULTY && difficulty.0 <= MAX_DIFFICULTY
}
