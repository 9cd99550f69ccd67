//! The network-wide genesis block.

use super::chain::{Block, Header};
use crate::crypto::hash;
use crate::merkle::merkle_root;
use crate::pow::{Difficulty, Nonce};
use crate::transaction::Transaction;

pub const GENESIS_VERSION: u8 = 1;
/// 2021-02-24T00:00:00Z
pub const GENESIS_TIMESTAMP: i64 = 1_614_124_800;
pub const GENESIS_DIFFICULTY: Difficulty = Difficulty(21);
/// First nonce satisfying [`GENESIS_DIFFICULTY`] for the genesis header.
pub const GENESIS_NONCE: Nonce = 4_962_030;

/// Builds the genesis block. Every node must produce byte-identical output.
pub fn genesis_block() -> Block {
    let transactions: Vec<Transaction> = Vec::new();

    let header = Header {
        version: GENESIS_VERSION,
        timestamp: GENESIS_TIMESTAMP,
        prev_block_hash: hash(b"genesis"),
        merkle_root: merkle_root(&transactions),
        difficulty: GENESIS_DIFFICULTY,
        nonce: GENESIS_NONCE,
    };

    Block {
        header,
        transactions,
    }
}
