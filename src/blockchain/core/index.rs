//! In-memory block index: a hash-keyed arena of immutable block nodes.

use super::chain::Header;
use crate::crypto::HashValue;
use crate::error::Result;
use crate::pow::{Difficulty, Nonce};
use parking_lot::RwLock;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Index entry for an accepted block. The parent is a hash reference resolved
/// through [`BlockIndex`], so nodes never own each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNode {
    pub hash: HashValue,
    pub parent: Option<HashValue>,
    /// Cumulative work from genesis up to and including this block.
    pub work: U256,
    pub height: u64,

    pub version: u8,
    pub timestamp: i64,
    pub merkle_root: HashValue,
    pub difficulty: Difficulty,
    pub nonce: Nonce,
}

impl BlockNode {
    /// Builds the node for `header` on top of `parent`; `None` makes a root
    /// (genesis) node with zero work at height 0.
    pub fn new(parent: Option<&BlockNode>, header: &Header) -> Self {
        let (parent_hash, work, height) = match parent {
            Some(p) => (
                Some(p.hash),
                p.work.saturating_add(header.difficulty.work_amount()),
                p.height + 1,
            ),
            None => (None, U256::zero(), 0),
        };

        BlockNode {
            hash: header.hash(),
            parent: parent_hash,
            work,
            height,
            version: header.version,
            timestamp: header.timestamp,
            merkle_root: header.merkle_root,
            difficulty: header.difficulty,
            nonce: header.nonce,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Append-only map of every accepted block node.
#[derive(Debug, Default)]
pub struct BlockIndex {
    nodes: RwLock<HashMap<HashValue, Arc<BlockNode>>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `node` unless its hash is already indexed. Returns whether the
    /// node was inserted; an existing entry is never replaced.
    pub fn add_node(&self, node: Arc<BlockNode>) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.hash) {
            return false;
        }
        nodes.insert(node.hash, node);
        true
    }

    pub fn get_node(&self, hash: &HashValue) -> Option<Arc<BlockNode>> {
        self.nodes.read().get(hash).cloned()
    }

    pub fn is_node_present(&self, hash: &HashValue) -> bool {
        self.nodes.read().contains_key(hash)
    }

    /// Walks parent links from `node` down to `height`.
    pub fn ancestor(&self, node: &Arc<BlockNode>, height: u64) -> Option<Arc<BlockNode>> {
        if height > node.height {
            return None;
        }

        let mut current = Arc::clone(node);
        while current.height != height {
            current = self.get_node(&current.parent?)?;
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every indexed node, in no particular order.
    pub fn nodes(&self) -> Vec<Arc<BlockNode>> {
        self.nodes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_on(prev: HashValue, difficulty: u32, timestamp: i64) -> Header {
        Header {
            version: 1,
            timestamp,
            prev_block_hash: prev,
            difficulty: Difficulty(difficulty),
            ..Header::default()
        }
    }

    fn chain_of(index: &BlockIndex, len: usize) -> Vec<Arc<BlockNode>> {
        let root = Arc::new(BlockNode::new(None, &header_on([0; 32], 0, 0)));
        index.add_node(root.clone());
        let mut nodes = vec![root];
        for i in 1..len {
            let parent = nodes[i - 1].clone();
            let node = Arc::new(BlockNode::new(Some(&*parent), &header_on(parent.hash, 15, i as i64)));
            index.add_node(node.clone());
            nodes.push(node);
        }
        nodes
    }

    #[test]
    fn test_genesis_node_has_no_work() {
        let node = BlockNode::new(None, &header_on([0; 32], 21, 0));
        assert_eq!(node.height, 0);
        assert_eq!(node.work, U256::zero());
        assert!(node.is_genesis());
    }

    #[test]
    fn test_work_and_height_accumulate() {
        let index = BlockIndex::new();
        let nodes = chain_of(&index, 4);
        let step = Difficulty(15).work_amount();

        assert_eq!(nodes[3].height, 3);
        assert_eq!(nodes[3].work, step * U256::from(3u64));
        assert_eq!(nodes[2].parent, Some(nodes[1].hash));
        for pair in nodes.windows(2) {
            assert!(pair[1].work > pair[0].work);
        }
    }

    #[test]
    fn test_add_node_never_replaces() {
        let index = BlockIndex::new();
        let node = Arc::new(BlockNode::new(None, &header_on([0; 32], 0, 0)));
        assert!(index.add_node(node.clone()));
        assert!(!index.add_node(node.clone()));
        assert_eq!(index.len(), 1);
        assert!(index.is_node_present(&node.hash));
    }

    #[test]
    fn test_ancestor() {
        let index = BlockIndex::new();
        let nodes = chain_of(&index, 5);
        let tip = &nodes[4];

        assert_eq!(index.ancestor(tip, 0).unwrap().hash, nodes[0].hash);
        assert_eq!(index.ancestor(tip, 2).unwrap().hash, nodes[2].hash);
        assert_eq!(index.ancestor(tip, 4).unwrap().hash, tip.hash);
        assert!(index.ancestor(tip, 5).is_none());
    }

    #[test]
    fn test_node_round_trips_through_bytes() {
        let index = BlockIndex::new();
        let nodes = chain_of(&index, 2);
        let bytes = nodes[1].to_bytes().unwrap();
        assert_eq!(BlockNode::from_bytes(&bytes).unwrap(), *nodes[1]);
    }
}
