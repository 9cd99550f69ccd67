use super::genesis::genesis_block;
use super::index::{BlockIndex, BlockNode};
use crate::crypto::{hash, short_hex, HashValue};
use crate::error::{ChainError, Result};
use crate::merkle::merkle_root;
use crate::persistence::BlockRepo;
use crate::pow::{Difficulty, Nonce};
use crate::transaction::Transaction;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub timestamp: i64,
    pub prev_block_hash: HashValue,
    pub merkle_root: HashValue,
    pub difficulty: Difficulty,
    pub nonce: Nonce,
}

impl Header {
    pub const ENCODED_LEN: usize = 1 + 8 + 32 + 32 + 4 + 4;
    /// The nonce is encoded last so grinding only rewrites the tail.
    pub const NONCE_OFFSET: usize = Self::ENCODED_LEN - 4;

    /// Fixed-width little-endian encoding; block ids and proof of work are
    /// both computed over these bytes.
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.push(self.version);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.prev_block_hash);
        buf.extend_from_slice(&self.merkle_root);
        buf.extend_from_slice(&self.difficulty.0.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    pub fn hash(&self) -> HashValue {
        hash(&self.bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Unmined version-1 block stamped with the current time.
    pub fn new(
        prev_block_hash: HashValue,
        difficulty: Difficulty,
        transactions: Vec<Transaction>,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp();
        let merkle_root = Block::calculate_merkle_root(&transactions);

        Block {
            header: Header {
                version: 1,
                timestamp,
                prev_block_hash,
                merkle_root,
                difficulty,
                nonce: 0,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> HashValue {
        self.header.hash()
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> HashValue {
        merkle_root(transactions)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// What `process_block` did with an accepted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block built directly on the tip and became the new tip.
    Extended,
    /// The block sits on another branch that now carries more work.
    Reorganized,
    /// Indexed and stored, but the tip did not move.
    SideBranch,
}

/// Consensus engine: validates blocks, indexes them and tracks the tip with
/// the most cumulative work.
///
/// The index and the tip have independent locks and are never held together.
pub struct Blockchain {
    repo: Arc<dyn BlockRepo>,
    index: BlockIndex,
    tip: RwLock<Arc<BlockNode>>,
    genesis_hash: HashValue,
}

impl Blockchain {
    /// Commits genesis to the index and `repo` and returns a running engine.
    /// Any error here must abort startup.
    pub fn new(repo: Arc<dyn BlockRepo>) -> Result<Self> {
        let chain = Self::with_genesis(repo)?;
        chain.repo.put_tip(&chain.tip().to_bytes()?)?;
        info!("Genesis block {} committed", short_hex(&chain.genesis_hash));
        Ok(chain)
    }

    /// Like [`Blockchain::new`], but first re-indexes every block already in
    /// `repo` and picks the heaviest node as tip instead of trusting the
    /// stored tip record blindly.
    pub fn open(repo: Arc<dyn BlockRepo>) -> Result<Self> {
        let stored_tip = match repo.get_tip()? {
            Some(bytes) => match BlockNode::from_bytes(&bytes) {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!("Ignoring unreadable chain tip record: {}", e);
                    None
                }
            },
            None => None,
        };

        let chain = Self::with_genesis(repo)?;
        let restored = chain.reindex()?;

        let mut best = chain.tip();
        for node in chain.index.nodes() {
            if node.work > best.work {
                best = node;
            }
        }
        if let Some(stored) = stored_tip
            .as_ref()
            .and_then(|stored| chain.index.get_node(&stored.hash))
        {
            if stored.work == best.work {
                best = stored;
            }
        }

        match &stored_tip {
            Some(stored) if stored.hash == best.hash => {}
            Some(stored) => warn!(
                "Stored chain tip {} is stale, using {} at height {}",
                short_hex(&stored.hash),
                short_hex(&best.hash),
                best.height
            ),
            None => debug!("No stored chain tip record"),
        }

        chain.repo.put_tip(&best.to_bytes()?)?;
        *chain.tip.write() = Arc::clone(&best);

        info!(
            "Opened blockchain: {} stored blocks restored, tip {} at height {}",
            restored,
            short_hex(&best.hash),
            best.height
        );
        Ok(chain)
    }

    fn with_genesis(repo: Arc<dyn BlockRepo>) -> Result<Self> {
        let genesis = genesis_block();
        let node = Arc::new(BlockNode::new(None, &genesis.header));

        let index = BlockIndex::new();
        index.add_node(Arc::clone(&node));
        repo.put(&node.hash, &genesis.to_bytes()?)?;

        Ok(Blockchain {
            repo,
            index,
            genesis_hash: node.hash,
            tip: RwLock::new(node),
        })
    }

    /// Indexes stored blocks parent-first. Blocks whose ancestry never
    /// reaches the index are skipped.
    fn reindex(&self) -> Result<usize> {
        let mut pending = Vec::new();
        for (key, bytes) in self.repo.blocks()? {
            if key == self.genesis_hash {
                continue;
            }
            pending.push(Block::from_bytes(&bytes)?);
        }

        let mut restored = 0;
        loop {
            let before = pending.len();
            pending.retain(|block| match self.index.get_node(&block.header.prev_block_hash) {
                Some(parent) => {
                    let node = BlockNode::new(Some(&*parent), &block.header);
                    if self.index.add_node(Arc::new(node)) {
                        restored += 1;
                    }
                    false
                }
                None => true,
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        if !pending.is_empty() {
            warn!("{} stored blocks have no indexed ancestor, skipping", pending.len());
        }
        Ok(restored)
    }

    /// Validates, indexes and stores `block`, then runs fork choice.
    pub fn process_block(&self, block: &Block) -> Result<BlockOutcome> {
        let hash = block.hash();

        if self.index.is_node_present(&hash) {
            return Err(ChainError::Duplicate);
        }

        let parent = self
            .index
            .get_node(&block.header.prev_block_hash)
            .ok_or(ChainError::MissingParent)?;

        if block.header.timestamp < parent.timestamp {
            return Err(ChainError::InvalidTimestamp);
        }

        block.verify()?;

        let raw = block.to_bytes()?;
        let node = Arc::new(BlockNode::new(Some(&*parent), &block.header));
        if !self.index.add_node(Arc::clone(&node)) {
            return Err(ChainError::Duplicate);
        }

        self.repo.put(&hash, &raw)?;

        self.connect_node_to_chain(node)
    }

    fn connect_node_to_chain(&self, node: Arc<BlockNode>) -> Result<BlockOutcome> {
        let mut tip = self.tip.write();

        let outcome = if node.parent == Some(tip.hash) {
            BlockOutcome::Extended
        } else if node.work > tip.work {
            BlockOutcome::Reorganized
        } else {
            debug!(
                "Block {} at height {} kept on a side branch",
                short_hex(&node.hash),
                node.height
            );
            return Ok(BlockOutcome::SideBranch);
        };

        *tip = Arc::clone(&node);
        self.repo.put_tip(&node.to_bytes()?)?;

        info!(
            "New chain tip {} at height {} ({:?})",
            short_hex(&node.hash),
            node.height,
            outcome
        );
        Ok(outcome)
    }

    pub fn tip(&self) -> Arc<BlockNode> {
        Arc::clone(&self.tip.read())
    }

    pub fn height(&self) -> u64 {
        self.tip.read().height
    }

    pub fn genesis_hash(&self) -> HashValue {
        self.genesis_hash
    }

    pub fn get_node(&self, hash: &HashValue) -> Option<Arc<BlockNode>> {
        self.index.get_node(hash)
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Raw accepted block, read back from the store.
    pub fn get_block(&self, hash: &HashValue) -> Result<Block> {
        Block::from_bytes(&self.repo.get(hash)?)
    }
}
