//! Database persistence layer for TChain

use crate::crypto::{HashValue, HASH_LEN};
use crate::error::ChainError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Metadata key holding the serialized chain-tip record.
pub const LAST_COMMITTED_KEY: &str = "lastCommitted";

/// Key-value store for raw blocks plus the single chain-tip record.
pub trait BlockRepo: Send + Sync {
    /// Raw block bytes stored under `hash`, or [`ChainError::NotFound`].
    fn get(&self, hash: &HashValue) -> Result<Vec<u8>, ChainError>;

    /// Stores `bytes` under `hash`. Re-storing an existing key is a no-op.
    fn put(&self, hash: &HashValue, bytes: &[u8]) -> Result<(), ChainError>;

    fn get_tip(&self) -> Result<Option<Vec<u8>>, ChainError>;

    /// Overwrites the chain-tip record.
    fn put_tip(&self, bytes: &[u8]) -> Result<(), ChainError>;

    /// Every stored block, in no particular order.
    fn blocks(&self) -> Result<Vec<(HashValue, Vec<u8>)>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash BLOB PRIMARY KEY,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, ChainError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }
}

fn hash_from_blob(blob: &[u8]) -> Result<HashValue, ChainError> {
    if blob.len() != HASH_LEN {
        return Err(ChainError::DatabaseError(format!(
            "Stored key must be {} bytes, got {}",
            HASH_LEN,
            blob.len()
        )));
    }
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(blob);
    Ok(hash)
}

impl BlockRepo for Database {
    fn get(&self, hash: &HashValue) -> Result<Vec<u8>, ChainError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT data FROM blocks WHERE hash = ?1",
            params![hash.to_vec()],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load block: {}", e)))?
        .ok_or(ChainError::NotFound)
    }

    fn put(&self, hash: &HashValue, bytes: &[u8]) -> Result<(), ChainError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO blocks (hash, data) VALUES (?1, ?2)",
            params![hash.to_vec(), bytes],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    fn get_tip(&self) -> Result<Option<Vec<u8>>, ChainError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![LAST_COMMITTED_KEY],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load chain tip: {}", e)))
    }

    fn put_tip(&self, bytes: &[u8]) -> Result<(), ChainError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![LAST_COMMITTED_KEY, bytes],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save chain tip: {}", e)))?;
        Ok(())
    }

    fn blocks(&self) -> Result<Vec<(HashValue, Vec<u8>)>, ChainError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT hash, data FROM blocks")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let hash: Vec<u8> = row.get(0)?;
                let data: Vec<u8> = row.get(1)?;
                Ok((hash, data))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let (hash, data) =
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;
            blocks.push((hash_from_blob(&hash)?, data));
        }
        Ok(blocks)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    blocks: Arc<Mutex<HashMap<HashValue, Vec<u8>>>>,
    tip: Arc<Mutex<Option<Vec<u8>>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

impl BlockRepo for InMemoryPersistence {
    fn get(&self, hash: &HashValue) -> Result<Vec<u8>, ChainError> {
        let blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.get(hash).cloned().ok_or(ChainError::NotFound)
    }

    fn put(&self, hash: &HashValue, bytes: &[u8]) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.entry(*hash).or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn get_tip(&self) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.tip.lock().map_err(poisoned)?.clone())
    }

    fn put_tip(&self, bytes: &[u8]) -> Result<(), ChainError> {
        *self.tip.lock().map_err(poisoned)? = Some(bytes.to_vec());
        Ok(())
    }

    fn blocks(&self) -> Result<Vec<(HashValue, Vec<u8>)>, ChainError> {
        let blocks = self.blocks.lock().map_err(poisoned)?;
        Ok(blocks.iter().map(|(k, v)| (*k, v.clone())).collect())
    }
}
