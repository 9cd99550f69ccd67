use crate::blockchain::Blockchain;
use crate::config::NodeConfig;
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::network::{RpcServer, TcpDialer};
use crate::peers::{PeerPool, PoolConfig};
use crate::persistence::{BlockRepo, Database};
use crate::receiver::ReceiverRpc;
use parking_lot::RwLock;
use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Running,
    ShuttingDown,
}

/// Composition root: owns the chain, mempool, peer pool and RPC server.
pub struct Node {
    pub config: NodeConfig,
    pub chain: Arc<Blockchain>,
    pub mempool: Arc<Mempool>,
    pub pool: Arc<PeerPool>,
    state: Arc<RwLock<NodeState>>,
    server: RpcServer,
    local_addr: SocketAddr,
}

impl Node {
    /// Opens storage, restores the chain and binds the RPC listener.
    pub async fn init(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(RwLock::new(NodeState::Booting));

        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ChainError::ConfigError(format!(
                        "failed to create data dir {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let repo: Arc<dyn BlockRepo> = Arc::new(Database::open(db_path)?);
        let chain = Arc::new(Blockchain::open(repo)?);
        let mempool = Arc::new(Mempool::new());

        let listener = TcpListener::bind(config.network.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let mut local_addrs = vec![local_addr];
        local_addrs.extend(config.network.advertise_addr);

        let dialer = Arc::new(TcpDialer {
            is_alive_timeout: config.network.is_alive_timeout(),
        });
        let pool = PeerPool::new(
            PoolConfig {
                discovery_interval: config.network.discovery_interval(),
                liveness_interval: config.network.liveness_interval(),
                local_addrs,
            },
            dialer,
        );

        let receiver = Arc::new(ReceiverRpc::new(
            Arc::clone(&chain),
            Arc::clone(&mempool),
            Arc::clone(&pool),
        ));
        let server = RpcServer::new(listener, receiver);

        info!(
            "Node initialised: listening on {}, chain height {}",
            local_addr,
            chain.height()
        );

        Ok(Node {
            config,
            chain,
            mempool,
            pool,
            state,
            server,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Shared view of the node state that stays valid after `run` consumes
    /// the node.
    pub fn state_handle(&self) -> Arc<RwLock<NodeState>> {
        Arc::clone(&self.state)
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Dials the bootstrap peers, serves RPC until `signal` resolves, then
    /// stops the server and closes the peer pool.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Node {
            config,
            pool,
            state,
            server,
            ..
        } = self;

        for addr in &config.network.bootstrap_peers {
            if let Err(e) = pool.connect(*addr).await {
                warn!("Failed to dial bootstrap peer {}: {}", addr, e);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(server.serve(shutdown_rx));

        *state.write() = NodeState::Running;
        info!("Node running with {} peers", pool.number_of_peers());

        signal.await;

        *state.write() = NodeState::ShuttingDown;
        info!("Shutting down");
        shutdown_tx.send_replace(true);

        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("RPC server failed: {}", e),
            Err(e) => error!("RPC server task panicked: {}", e),
        }
        pool.close().await;

        info!("Node stopped");
        Ok(())
    }
}
