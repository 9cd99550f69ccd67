//! Pending transactions keyed by their hash

use crate::crypto::HashValue;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Verified transactions waiting to be mined.
#[derive(Debug, Default)]
pub struct Mempool {
    transactions: RwLock<HashMap<HashValue, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &HashValue) -> bool {
        self.transactions.read().contains_key(hash)
    }

    /// Inserts `tx` unless its hash is already pooled. Returns whether it
    /// was inserted.
    pub fn insert(&self, tx: Transaction) -> bool {
        match self.transactions.write().entry(tx.hash) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(tx);
                true
            }
        }
    }

    pub fn get(&self, hash: &HashValue) -> Option<Transaction> {
        self.transactions.read().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    pub fn hashes(&self) -> Vec<HashValue> {
        self.transactions.read().keys().copied().collect()
    }
}
