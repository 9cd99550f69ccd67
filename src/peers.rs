//! Peer pool: membership, periodic discovery and liveness, fan-out sends

use crate::error::{ChainError, Result};
use crate::network::{Dialer, Sender};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(120);

/// A known remote node and the handle used to call it.
#[derive(Clone)]
pub struct Peer {
    pub addr: SocketAddr,
    pub sender: Arc<dyn Sender>,
}

impl Peer {
    pub fn new(addr: SocketAddr, sender: Arc<dyn Sender>) -> Self {
        Peer { addr, sender }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("addr", &self.addr).finish()
    }
}

/// One peer that failed during [`PeerPool::send_to_peers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub addr: SocketAddr,
    pub error: ChainError,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Zero disables the discovery loop.
    pub discovery_interval: Duration,
    /// Zero disables the liveness loop.
    pub liveness_interval: Duration,
    /// Addresses this node is reachable under, never added as peers. An
    /// unspecified IP also covers loopback on the same port.
    pub local_addrs: Vec<SocketAddr>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            local_addrs: Vec::new(),
        }
    }
}

/// Acknowledges task exit to [`PeerPool::close`], on any exit path.
struct ExitAck(mpsc::UnboundedSender<()>);

impl Drop for ExitAck {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

pub struct PeerPool {
    peers: RwLock<HashMap<SocketAddr, Peer>>,
    dialer: Arc<dyn Dialer>,
    local_addrs: Vec<SocketAddr>,
    shutdown: watch::Sender<bool>,
    exit_tx: mpsc::UnboundedSender<()>,
    exit_rx: Mutex<mpsc::UnboundedReceiver<()>>,
    running_tasks: AtomicUsize,
}

impl PeerPool {
    /// Builds the pool and starts its background loops. Must be called from
    /// within a tokio runtime when either interval is non-zero.
    pub fn new(config: PoolConfig, dialer: Arc<dyn Dialer>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let pool = Arc::new(PeerPool {
            peers: RwLock::new(HashMap::new()),
            dialer,
            local_addrs: config.local_addrs,
            shutdown,
            exit_tx,
            exit_rx: Mutex::new(exit_rx),
            running_tasks: AtomicUsize::new(0),
        });

        if !config.discovery_interval.is_zero() {
            pool.spawn_loop("discovery", config.discovery_interval, |pool| async move {
                pool.discover_peers().await;
            });
        }
        if !config.liveness_interval.is_zero() {
            pool.spawn_loop("liveness", config.liveness_interval, |pool| async move {
                pool.ping_connections().await;
            });
        }

        pool
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<PeerPool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pool: Weak<PeerPool> = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let ack = ExitAck(self.exit_tx.clone());
        self.running_tasks.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let _ack = ack;
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        tick(pool).await;
                    }
                }
            }
            debug!("Peer pool {} loop stopped", name);
        });
    }

    /// Whether `addr` names this node.
    pub fn is_local(&self, addr: &SocketAddr) -> bool {
        self.local_addrs.iter().any(|local| {
            local.port() == addr.port()
                && (local.ip() == addr.ip()
                    || (local.ip().is_unspecified()
                        && (addr.ip().is_loopback() || addr.ip().is_unspecified())))
        })
    }

    /// Adds `peer` unless its address is already known or is our own.
    pub fn add(&self, peer: Peer) -> bool {
        if self.is_local(&peer.addr) {
            debug!("Not adding our own address {}", peer.addr);
            return false;
        }
        let mut peers = self.peers.write();
        if peers.contains_key(&peer.addr) {
            return false;
        }
        info!("Added peer {}", peer.addr);
        peers.insert(peer.addr, peer);
        true
    }

    /// Removes the peer at `addr` only while it still holds `sender`, so a
    /// connection re-added under the same address survives.
    fn remove_sender(&self, addr: &SocketAddr, sender: &Arc<dyn Sender>) -> bool {
        let mut peers = self.peers.write();
        let same = peers
            .get(addr)
            .map_or(false, |peer| Arc::ptr_eq(&peer.sender, sender));
        if same {
            peers.remove(addr);
        }
        same
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.read().keys().copied().collect()
    }

    pub fn number_of_peers(&self) -> usize {
        self.peers.read().len()
    }

    /// Dials `addr` and adds it to the pool.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        let sender = self.dialer.dial(addr).await?;
        self.add(Peer::new(addr, sender));
        Ok(())
    }

    /// Asks every peer for its peer list, then dials and adds each address
    /// we do not know yet. Never evicts.
    pub async fn discover_peers(&self) {
        let mut requests = JoinSet::new();
        for peer in self.peers() {
            requests.spawn(async move { (peer.addr, peer.sender.send_peers_discovery().await) });
        }

        let mut candidates = HashSet::new();
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((_, Ok(addrs))) => candidates.extend(addrs),
                Ok((addr, Err(e))) => debug!("Peer discovery via {} failed: {}", addr, e),
                Err(e) => warn!("Peer discovery task failed: {}", e),
            }
        }

        let known = self.addrs();
        let new_addrs: Vec<SocketAddr> = candidates
            .into_iter()
            .filter(|addr| !known.contains(addr) && !self.is_local(addr))
            .collect();

        for addr in new_addrs {
            if let Err(e) = self.connect(addr).await {
                warn!("Failed to dial discovered peer {}: {}", addr, e);
            }
        }
    }

    /// Pings every peer concurrently and evicts those that fail or time
    /// out. Never dials.
    pub async fn ping_connections(&self) {
        let mut pings = JoinSet::new();
        for peer in self.peers() {
            pings.spawn(async move {
                let result = peer.sender.send_is_alive().await;
                (peer, result)
            });
        }

        while let Some(joined) = pings.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((peer, Err(e))) => {
                    if self.remove_sender(&peer.addr, &peer.sender) {
                        warn!("Evicted peer {} ({:?}): {}", peer.addr, e.kind(), e);
                    }
                }
                Err(e) => warn!("Liveness check task failed: {}", e),
            }
        }
    }

    /// Runs `action` against every current peer on its own task. The
    /// returned channel yields one [`PeerFailure`] per failed peer and closes
    /// once every task has finished.
    pub fn send_to_peers<F, Fut>(&self, action: F) -> mpsc::Receiver<PeerFailure>
    where
        F: Fn(Arc<dyn Sender>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let peers = self.peers();
        let (tx, rx) = mpsc::channel(peers.len().max(1));
        let action = Arc::new(action);

        for peer in peers {
            let tx = tx.clone();
            let action = Arc::clone(&action);
            tokio::spawn(async move {
                if let Err(error) = (*action)(peer.sender).await {
                    let _ = tx
                        .send(PeerFailure {
                            addr: peer.addr,
                            error,
                        })
                        .await;
                }
            });
        }

        rx
    }

    /// Stops the background loops and waits until each one has exited.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let expected = self.running_tasks.swap(0, Ordering::SeqCst);
        let mut exits = self.exit_rx.lock().await;
        for _ in 0..expected {
            if exits.recv().await.is_none() {
                break;
            }
        }
        info!("Peer pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Block;
    use crate::network::TransactionResponse;
    use crate::transaction::Transaction;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct MockSender {
        alive: AtomicBool,
        known: Vec<SocketAddr>,
    }

    impl MockSender {
        fn new(alive: bool, known: Vec<SocketAddr>) -> Arc<Self> {
            Arc::new(MockSender {
                alive: AtomicBool::new(alive),
                known,
            })
        }
    }

    #[async_trait]
    impl Sender for MockSender {
        async fn send_transaction(&self, _tx: Transaction) -> Result<TransactionResponse> {
            Ok(TransactionResponse {
                status: true,
                msg: String::new(),
            })
        }

        async fn send_is_alive(&self) -> Result<()> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ChainError::Timeout)
            }
        }

        async fn send_block(&self, _block: Block) -> Result<()> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ChainError::NetworkError("connection reset".to_string()))
            }
        }

        async fn send_peers_discovery(&self) -> Result<Vec<SocketAddr>> {
            Ok(self.known.clone())
        }
    }

    /// Hands out healthy mock senders and records every dial.
    #[derive(Default)]
    struct MockDialer {
        dialed: parking_lot::Mutex<Vec<SocketAddr>>,
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn Sender>> {
            self.dialed.lock().push(addr);
            let sender: Arc<dyn Sender> = MockSender::new(true, Vec::new());
            Ok(sender)
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn quiet_pool(dialer: Arc<MockDialer>, local_addrs: Vec<SocketAddr>) -> Arc<PeerPool> {
        let config = PoolConfig {
            discovery_interval: Duration::ZERO,
            liveness_interval: Duration::ZERO,
            local_addrs,
        };
        PeerPool::new(config, dialer)
    }

    #[tokio::test]
    async fn test_add_skips_duplicates_and_self() {
        let pool = quiet_pool(Arc::default(), vec![addr(9000)]);

        assert!(pool.add(Peer::new(addr(9001), MockSender::new(true, vec![]))));
        assert!(!pool.add(Peer::new(addr(9001), MockSender::new(true, vec![]))));
        assert!(!pool.add(Peer::new(addr(9000), MockSender::new(true, vec![]))));
        assert_eq!(pool.number_of_peers(), 1);
    }

    /// Sends genesis to every peer and returns the failed addresses and the
    /// number of peers that took the block.
    async fn broadcast_block(pool: &PeerPool) -> (Vec<SocketAddr>, usize) {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let mut failures = pool.send_to_peers(move |sender| {
            let counter = Arc::clone(&counter);
            async move {
                sender.send_block(crate::blockchain::genesis_block()).await?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ChainError>(())
            }
        });

        let mut failed = Vec::new();
        while let Some(failure) = failures.recv().await {
            assert!(matches!(failure.error, ChainError::NetworkError(_)));
            failed.push(failure.addr);
        }
        failed.sort();
        (failed, delivered.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_send_to_peers_reports_each_failure() {
        let pool = quiet_pool(Arc::default(), Vec::new());
        for port in 1..=5 {
            pool.add(Peer::new(addr(port), MockSender::new(port > 2, vec![])));
        }

        let (failed, delivered) = broadcast_block(&pool).await;
        assert_eq!(failed, vec![addr(1), addr(2)]);
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn test_send_to_peers_completes_when_all_fail() {
        let pool = quiet_pool(Arc::default(), Vec::new());
        for port in 1..=4 {
            pool.add(Peer::new(addr(port), MockSender::new(false, vec![])));
        }

        let (failed, delivered) = tokio::time::timeout(Duration::from_secs(5), broadcast_block(&pool))
            .await
            .expect("send_to_peers must finish when every peer fails");
        assert_eq!(failed, vec![addr(1), addr(2), addr(3), addr(4)]);
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_send_to_no_peers_closes_immediately() {
        let pool = quiet_pool(Arc::default(), Vec::new());
        let mut failures = pool.send_to_peers(|sender| async move { sender.send_is_alive().await });
        assert!(failures.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ping_evicts_dead_peers() {
        let pool = quiet_pool(Arc::default(), Vec::new());
        pool.add(Peer::new(addr(1), MockSender::new(true, vec![])));
        pool.add(Peer::new(addr(2), MockSender::new(false, vec![])));
        pool.add(Peer::new(addr(3), MockSender::new(true, vec![])));
        pool.add(Peer::new(addr(4), MockSender::new(false, vec![])));

        pool.ping_connections().await;

        let mut left = pool.addrs();
        left.sort();
        assert_eq!(left, vec![addr(1), addr(3)]);
    }

    #[tokio::test]
    async fn test_wildcard_listen_address_matches_loopback() {
        let wildcard = SocketAddr::from(([0, 0, 0, 0], 2022));
        let pool = quiet_pool(Arc::default(), vec![wildcard]);

        assert!(pool.is_local(&SocketAddr::from(([127, 0, 0, 1], 2022))));
        assert!(pool.is_local(&wildcard));
        assert!(!pool.is_local(&SocketAddr::from(([127, 0, 0, 1], 2023))));
        assert!(!pool.is_local(&SocketAddr::from(([10, 0, 0, 7], 2022))));
        assert!(!pool.add(Peer::new(
            SocketAddr::from(([127, 0, 0, 1], 2022)),
            MockSender::new(true, vec![])
        )));
    }

    /// Fails its liveness check, but only after `delay`.
    struct SlowDeadSender {
        delay: Duration,
    }

    #[async_trait]
    impl Sender for SlowDeadSender {
        async fn send_transaction(&self, _tx: Transaction) -> Result<TransactionResponse> {
            Err(ChainError::Timeout)
        }

        async fn send_is_alive(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            Err(ChainError::Timeout)
        }

        async fn send_block(&self, _block: Block) -> Result<()> {
            Err(ChainError::Timeout)
        }

        async fn send_peers_discovery(&self) -> Result<Vec<SocketAddr>> {
            Err(ChainError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_ping_keeps_peer_reconnected_while_pinging() {
        let pool = quiet_pool(Arc::default(), Vec::new());
        pool.add(Peer::new(
            addr(1),
            Arc::new(SlowDeadSender {
                delay: Duration::from_millis(100),
            }),
        ));
        let fresh: Arc<dyn Sender> = MockSender::new(true, vec![]);

        let reconnect = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pool.peers
                .write()
                .insert(addr(1), Peer::new(addr(1), Arc::clone(&fresh)));
        };
        tokio::join!(pool.ping_connections(), reconnect);

        let peers = pool.peers();
        assert_eq!(peers.len(), 1);
        assert!(Arc::ptr_eq(&peers[0].sender, &fresh));
    }

    #[tokio::test]
    async fn test_discovery_merges_unknown_addresses() {
        let dialer = Arc::new(MockDialer::default());
        let pool = quiet_pool(Arc::clone(&dialer), vec![addr(9000)]);
        pool.add(Peer::new(
            addr(1),
            MockSender::new(true, vec![addr(2), addr(3), addr(9000)]),
        ));
        pool.add(Peer::new(addr(2), MockSender::new(true, vec![addr(1), addr(3)])));

        pool.discover_peers().await;

        let mut known = pool.addrs();
        known.sort();
        assert_eq!(known, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(*dialer.dialed.lock(), vec![addr(3)]);
    }

    #[tokio::test]
    async fn test_close_waits_for_background_loops() {
        let config = PoolConfig {
            discovery_interval: Duration::from_millis(20),
            liveness_interval: Duration::from_millis(20),
            local_addrs: Vec::new(),
        };
        let pool = PeerPool::new(config, Arc::new(MockDialer::default()));
        pool.add(Peer::new(addr(1), MockSender::new(true, vec![])));
        tokio::time::sleep(Duration::from_millis(60)).await;

        tokio::time::timeout(Duration::from_secs(5), pool.close())
            .await
            .expect("close must return once both loops exit");
        assert_eq!(pool.running_tasks.load(Ordering::SeqCst), 0);

        // A second close has nothing left to wait for.
        tokio::time::timeout(Duration::from_secs(1), pool.close())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_liveness_loop_evicts_in_background() {
        let config = PoolConfig {
            discovery_interval: Duration::ZERO,
            liveness_interval: Duration::from_millis(10),
            local_addrs: Vec::new(),
        };
        let pool = PeerPool::new(config, Arc::new(MockDialer::default()));
        pool.add(Peer::new(addr(1), MockSender::new(false, vec![])));

        for _ in 0..100 {
            if pool.number_of_peers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.number_of_peers(), 0);
        pool.close().await;
    }
}
