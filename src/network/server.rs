//! TCP transport for gateway list requests.

use crate::error::{NetworkError, Result};
use crate::network::nodes::{MessageHandler, NodeStateClient};
use crate::network::rpc::{decode_message, frame_message, Message, MAX_MESSAGE_SIZE};
use crate::types::NodeId;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Read one length-prefixed message. `None` on a clean close.
async fn read_frame(stream: &mut TcpStream) -> Result<Option<Message>> {
    // Read message length (4 bytes)
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            // Connection closed
            return Ok(None);
        }
        Err(e) => return Err(NetworkError::Io(e).into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(len).into());
    }

    let mut data = vec![0u8; len];
    stream
        .read_exact(&mut data)
        .await
        .map_err(NetworkError::Io)?;

    decode_message(&data).map(Some)
}

async fn write_frame(stream: &mut TcpStream, msg: &Message) -> Result<()> {
    let framed = frame_message(msg)?;
    stream.write_all(&framed).await.map_err(NetworkError::Io)?;
    Ok(())
}

/// Serves gateway requests over TCP.
pub struct GatewayServer {
    /// Bound listener.
    listener: TcpListener,

    /// Request handler.
    handler: Arc<dyn MessageHandler>,

    /// Shutdown signal receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

impl GatewayServer {
    /// Bind a server. Returns the server and its shutdown handle.
    pub async fn bind(
        bind_addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(Self, mpsc::Sender<()>)> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(NetworkError::Io)?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let server = Self {
            listener,
            handler,
            shutdown_rx,
        };

        Ok((server, shutdown_tx))
    }

    /// Address the server listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr().map_err(NetworkError::Io)?)
    }

    /// Run the server until the shutdown handle fires or is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "Gateway server listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted connection");
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    debug!(error = %e, "Connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Gateway server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        while let Some(msg) = read_frame(&mut stream).await? {
            // Store reads may touch the disk on first access.
            let handler = handler.clone();
            let response = tokio::task::spawn_blocking(move || handler.handle(msg))
                .await
                .map_err(|e| NetworkError::Io(std::io::Error::other(e.to_string())))?;

            if let Some(response) = response {
                write_frame(&mut stream, &response).await?;
            }
        }
        Ok(())
    }
}

/// Client reaching a peer's [`GatewayServer`], one connection per request.
pub struct TcpNodeClient {
    node_id: NodeId,
    addr: SocketAddr,
}

impl TcpNodeClient {
    /// Create a client for the gateway of `node_id` at `addr`.
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self { node_id, addr }
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl NodeStateClient for TcpNodeClient {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn request(&self, msg: Message) -> Result<Message> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: self.addr.to_string(),
                reason: e.to_string(),
            })?;

        write_frame(&mut stream, &msg).await?;
        match read_frame(&mut stream).await? {
            Some(response) => Ok(response),
            None => Err(NetworkError::ConnectionClosed.into()),
        }
    }
}
