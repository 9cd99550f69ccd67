//! Proof-of-work: target derivation, nonce search and work accounting

use crate::blockchain::{Block, Header};
use crate::crypto::hash;
use crate::error::{ChainError, Result};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

pub type Nonce = u32;

/// Largest difficulty with an integral target (2^0).
pub const MAX_DIFFICULTY: u32 = 255;

/// Number of leading zero bits a header hash must (at least) carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Difficulty(pub u32);

impl Difficulty {
    /// `2^(255 - d)`. Difficulties past [`MAX_DIFFICULTY`] clamp to a target of 1.
    pub fn target(&self) -> U256 {
        let shift = MAX_DIFFICULTY.saturating_sub(self.0) as usize;
        U256::one() << shift
    }

    /// `floor(2^256 / (target + 1))`, evaluated without leaving 256 bits.
    pub fn work_amount(&self) -> U256 {
        let target = self.target();
        (!target / (target + U256::one())) + U256::one()
    }

    /// Searches the full nonce range for the first value whose header hash,
    /// read big-endian, is strictly below the target.
    pub fn gen_nonce(&self, header: &Header) -> Result<Nonce> {
        let target = self.target();
        let mut buf = header.bytes();

        for nonce in 0..=Nonce::MAX {
            buf[Header::NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
            if U256::from_big_endian(&hash(&buf)) < target {
                return Ok(nonce);
            }
        }

        Err(ChainError::NonceNotFound)
    }

    pub fn verify_nonce(&self, header: &Header) -> Result<()> {
        if U256::from_big_endian(&header.hash()) < self.target() {
            Ok(())
        } else {
            Err(ChainError::InvalidNonce)
        }
    }
}

impl From<u32> for Difficulty {
    fn from(value: u32) -> Self {
        Difficulty(value)
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grinds the nonce of `block` at its declared difficulty.
pub fn mine_block(mut block: Block) -> Result<Block> {
    block.header.nonce = block.header.difficulty.gen_nonce(&block.header)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_values() {
        assert_eq!(Difficulty(0).target(), U256::one() << 255);
        assert_eq!(Difficulty(255).target(), U256::one());
        assert_eq!(Difficulty(300).target(), U256::one());
        assert_eq!(Difficulty(21).target(), U256::one() << 234);
    }

    #[test]
    fn test_work_amount_exact() {
        // 2^256 / (2^255 + 1) = 1
        assert_eq!(Difficulty(0).work_amount(), U256::one());
        // 2^256 / (2^254 + 1) = 3
        assert_eq!(Difficulty(1).work_amount(), U256::from(3u64));
        // 2^256 / 2 = 2^255
        assert_eq!(Difficulty(255).work_amount(), U256::one() << 255);
    }

    #[test]
    fn test_work_amount_strictly_increasing() {
        let mut previous = Difficulty(0).work_amount();
        for d in 1..=MAX_DIFFICULTY {
            let current = Difficulty(d).work_amount();
            assert!(current > previous, "work({}) must exceed work({})", d, d - 1);
            previous = current;
        }
    }

    #[test]
    fn test_gen_then_verify_nonce() {
        for d in [10u32, 15, 21] {
            let difficulty = Difficulty(d);
            let mut header = Header {
                difficulty,
                ..Header::default()
            };
            header.nonce = difficulty.gen_nonce(&header).unwrap();
            assert!(difficulty.verify_nonce(&header).is_ok(), "difficulty {}", d);
        }
    }

    #[test]
    fn test_known_nonce_for_zero_header() {
        let difficulty = Difficulty(15);
        let header = Header {
            difficulty,
            ..Header::default()
        };
        assert_eq!(difficulty.gen_nonce(&header).unwrap(), 44144);
    }

    #[test]
    fn test_corrupted_nonce_fails() {
        let difficulty = Difficulty(15);
        let mut header = Header {
            difficulty,
            ..Header::default()
        };
        header.nonce = difficulty.gen_nonce(&header).unwrap();
        header.nonce = header.nonce.wrapping_add(1);
        assert_eq!(difficulty.verify_nonce(&header), Err(ChainError::InvalidNonce));
    }
}
