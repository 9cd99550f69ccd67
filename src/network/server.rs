//! Inbound RPC server: one task per connection and one per request, each
//! dispatched to a [`Receiver`].

use super::protocol::{read_frame, write_frame, Envelope, PeerListResponse, Request, Response};
use crate::error::{ChainError, Result};
use crate::receiver::Receiver;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct RpcServer {
    listener: TcpListener,
    receiver: Arc<dyn Receiver>,
}

impl RpcServer {
    pub async fn bind(addr: SocketAddr, receiver: Arc<dyn Receiver>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, receiver))
    }

    /// Serves on an already bound listener.
    pub fn new(listener: TcpListener, receiver: Arc<dyn Receiver>) -> Self {
        RpcServer { listener, receiver }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` flips to `true` or its sender is
    /// dropped. Connections already being served finish on their own.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("RPC server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let receiver = Arc::clone(&self.receiver);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, receiver).await {
                                debug!("Connection from {} ended ({:?}): {}", remote, e.kind(), e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        info!("RPC server stopped");
        Ok(())
    }
}

/// Reads requests until the peer hangs up. A slow handler never holds up
/// the requests behind it; responses carry the id of their request.
async fn handle_connection(stream: TcpStream, receiver: Arc<dyn Receiver>) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let (responses, mut outgoing) = mpsc::unbounded_channel::<Envelope<Response>>();

    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = outgoing.recv().await {
            write_frame(&mut writer, &envelope).await?;
        }
        Ok::<(), ChainError>(())
    });

    let read_result = loop {
        match read_frame::<_, Envelope<Request>>(&mut reader).await {
            Ok(Some(envelope)) => {
                let receiver = Arc::clone(&receiver);
                let responses = responses.clone();
                tokio::spawn(async move {
                    let message = dispatch(receiver.as_ref(), envelope.message).await;
                    let _ = responses.send(Envelope {
                        id: envelope.id,
                        message,
                    });
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // The writer drains once every in-flight handler has replied.
    drop(responses);
    match writer_task.await {
        Ok(written) => written?,
        Err(e) => return Err(ChainError::IoError(format!("connection writer failed: {}", e))),
    }
    read_result
}

/// Routes one request to its handler; handler errors become
/// [`Response::Error`].
pub async fn dispatch(receiver: &dyn Receiver, request: Request) -> Response {
    let result = match request {
        Request::Transaction(req) => receiver
            .handle_transaction(req.tx)
            .await
            .map(Response::Transaction),
        Request::Block(req) => receiver.handle_block(req.block).await.map(|_| Response::Empty),
        Request::IsAlive => receiver.handle_is_alive().await.map(|_| Response::Empty),
        Request::PeersDiscovery => receiver
            .handle_peers_discovery()
            .await
            .map(|addrs| Response::Peers(PeerListResponse { addrs })),
    };

    result.unwrap_or_else(Response::Error)
}
