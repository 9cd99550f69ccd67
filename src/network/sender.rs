//! Outbound RPC capability and its TCP implementation

use super::protocol::{
    read_frame, write_frame, BlockRequest, Envelope, Request, Response, TransactionRequest,
    TransactionResponse,
};
use crate::blockchain::Block;
use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default bound on a liveness check.
pub const DEFAULT_IS_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Calls a single remote node.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send_transaction(&self, tx: Transaction) -> Result<TransactionResponse>;

    /// Fails with [`ChainError::Timeout`] when the peer does not answer in
    /// time. Other calls are not bounded.
    async fn send_is_alive(&self) -> Result<()>;

    async fn send_block(&self, block: Block) -> Result<()>;

    async fn send_peers_discovery(&self) -> Result<Vec<SocketAddr>>;
}

/// Opens a [`Sender`] to a remote address.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn Sender>>;
}

/// Calls waiting for their response on one connection.
#[derive(Default)]
struct Calls {
    waiting: HashMap<u64, oneshot::Sender<Response>>,
    closed: bool,
}

impl Calls {
    fn close(&mut self) {
        self.closed = true;
        self.waiting.clear();
    }
}

/// Forgets a call whose caller stopped waiting, so a late response is
/// dropped instead of being handed to another call.
struct InFlight<'a> {
    calls: &'a Mutex<Calls>,
    id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.calls.lock().waiting.remove(&self.id);
    }
}

/// Request/response over one TCP connection. Every request carries an id
/// and a single reader task routes each response to the call with that id,
/// so calls on the same connection never wait for each other.
pub struct RpcSender {
    addr: SocketAddr,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Envelope<Request>>,
    calls: Arc<Mutex<Calls>>,
    reader: JoinHandle<()>,
    is_alive_timeout: Duration,
}

impl RpcSender {
    pub async fn connect(addr: SocketAddr, is_alive_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChainError::NetworkError(format!("failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        debug!("Connected to peer {}", addr);

        let (read_half, write_half) = stream.into_split();
        let calls = Arc::new(Mutex::new(Calls::default()));
        let (outbound, requests) = mpsc::unbounded_channel();

        tokio::spawn(write_requests(write_half, requests, Arc::clone(&calls), addr));
        let reader = tokio::spawn(read_responses(read_half, Arc::clone(&calls), addr));

        Ok(RpcSender {
            addr,
            next_id: AtomicU64::new(0),
            outbound,
            calls,
            reader,
            is_alive_timeout,
        })
    }

    fn closed(&self) -> ChainError {
        ChainError::NetworkError(format!("connection to {} closed", self.addr))
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut calls = self.calls.lock();
            if calls.closed {
                return Err(self.closed());
            }
            calls.waiting.insert(id, reply_tx);
        }
        let _in_flight = InFlight {
            calls: &*self.calls,
            id,
        };

        self.outbound
            .send(Envelope {
                id,
                message: request,
            })
            .map_err(|_| self.closed())?;

        match reply_rx.await {
            Ok(Response::Error(e)) => Err(e),
            Ok(response) => Ok(response),
            Err(_) => Err(self.closed()),
        }
    }
}

impl Drop for RpcSender {
    fn drop(&mut self) {
        // The writer stops on its own once `outbound` is gone.
        self.reader.abort();
    }
}

async fn write_requests(
    mut writer: OwnedWriteHalf,
    mut requests: mpsc::UnboundedReceiver<Envelope<Request>>,
    calls: Arc<Mutex<Calls>>,
    addr: SocketAddr,
) {
    while let Some(envelope) = requests.recv().await {
        if let Err(e) = write_frame(&mut writer, &envelope).await {
            debug!("Writing to {} failed: {}", addr, e);
            break;
        }
    }
    calls.lock().close();
}

async fn read_responses(mut reader: OwnedReadHalf, calls: Arc<Mutex<Calls>>, addr: SocketAddr) {
    loop {
        match read_frame::<_, Envelope<Response>>(&mut reader).await {
            Ok(Some(envelope)) => {
                let waiting = calls.lock().waiting.remove(&envelope.id);
                match waiting {
                    Some(reply) => {
                        let _ = reply.send(envelope.message);
                    }
                    None => debug!("Dropping late response {} from {}", envelope.id, addr),
                }
            }
            Ok(None) => {
                debug!("Peer {} closed the connection", addr);
                break;
            }
            Err(e) => {
                debug!("Reading from {} failed: {}", addr, e);
                break;
            }
        }
    }
    calls.lock().close();
}

fn unexpected(response: Response) -> ChainError {
    ChainError::NetworkError(format!("unexpected response: {:?}", response))
}

#[async_trait]
impl Sender for RpcSender {
    async fn send_transaction(&self, tx: Transaction) -> Result<TransactionResponse> {
        match self.call(Request::Transaction(TransactionRequest { tx })).await? {
            Response::Transaction(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn send_is_alive(&self) -> Result<()> {
        let response = tokio::time::timeout(self.is_alive_timeout, self.call(Request::IsAlive))
            .await
            .map_err(|_| ChainError::Timeout)??;

        match response {
            Response::Empty => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn send_block(&self, block: Block) -> Result<()> {
        match self.call(Request::Block(BlockRequest { block })).await? {
            Response::Empty => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn send_peers_discovery(&self) -> Result<Vec<SocketAddr>> {
        match self.call(Request::PeersDiscovery).await? {
            Response::Peers(list) => Ok(list.addrs),
            other => Err(unexpected(other)),
        }
    }
}

/// Dials plain TCP connections.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub is_alive_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        TcpDialer {
            is_alive_timeout: DEFAULT_IS_ALIVE_TIMEOUT,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn Sender>> {
        let sender = RpcSender::connect(addr, self.is_alive_timeout).await?;
        Ok(Arc::new(sender))
    }
}
