//! Inbound RPC handlers: admit transactions and blocks, answer liveness and
//! discovery requests, and gossip accepted items to the rest of the pool.

use crate::blockchain::{Block, Blockchain};
use crate::crypto::short_hex;
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::network::TransactionResponse;
use crate::peers::{PeerFailure, PeerPool};
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handles requests arriving from remote nodes.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn handle_transaction(&self, tx: Transaction) -> Result<TransactionResponse>;
    async fn handle_block(&self, block: Block) -> Result<()>;
    async fn handle_is_alive(&self) -> Result<()>;
    async fn handle_peers_discovery(&self) -> Result<Vec<SocketAddr>>;
}

pub struct ReceiverRpc {
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
    pool: Arc<PeerPool>,
}

impl ReceiverRpc {
    pub fn new(chain: Arc<Blockchain>, mempool: Arc<Mempool>, pool: Arc<PeerPool>) -> Self {
        ReceiverRpc {
            chain,
            mempool,
            pool,
        }
    }
}

/// Logs broadcast failures in the background; they never reach the caller.
fn log_failures(what: &'static str, mut failures: mpsc::Receiver<PeerFailure>) {
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            warn!(
                "Failed to relay {} to {} ({:?}): {}",
                what,
                failure.addr,
                failure.error.kind(),
                failure.error
            );
        }
    });
}

#[async_trait]
impl Receiver for ReceiverRpc {
    async fn handle_transaction(&self, tx: Transaction) -> Result<TransactionResponse> {
        if self.mempool.contains(&tx.hash) {
            debug!("Transaction {} already known", short_hex(&tx.hash));
            return Ok(TransactionResponse {
                status: true,
                msg: "already known".to_string(),
            });
        }

        tx.verify()?;

        if !self.mempool.insert(tx.clone()) {
            return Ok(TransactionResponse {
                status: true,
                msg: "already known".to_string(),
            });
        }
        info!("Accepted transaction {}", short_hex(&tx.hash));

        let failures = self.pool.send_to_peers(move |sender| {
            let tx = tx.clone();
            async move { sender.send_transaction(tx).await.map(|_| ()) }
        });
        log_failures("transaction", failures);

        Ok(TransactionResponse {
            status: true,
            msg: "accepted".to_string(),
        })
    }

    async fn handle_block(&self, block: Block) -> Result<()> {
        let chain = Arc::clone(&self.chain);
        let candidate = block.clone();
        let outcome = tokio::task::spawn_blocking(move || chain.process_block(&candidate))
            .await
            .map_err(|e| ChainError::IoError(format!("block processing task failed: {}", e)))??;
        debug!("Block {} processed: {:?}", short_hex(&block.hash()), outcome);

        let failures = self.pool.send_to_peers(move |sender| {
            let block = block.clone();
            async move { sender.send_block(block).await }
        });
        log_failures("block", failures);

        Ok(())
    }

    async fn handle_is_alive(&self) -> Result<()> {
        Ok(())
    }

    async fn handle_peers_discovery(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.pool.addrs())
    }
}
