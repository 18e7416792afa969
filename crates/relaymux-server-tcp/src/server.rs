//! Front-door server: accept, sniff, dispatch
//!
//! Every accepted connection gets its own task. The sniffer classifies the
//! leading bytes; control frames are handed to the injected control handler,
//! HTTP requests are replayed verbatim to their matched backend, and
//! everything else gets a canned response or an abort.

use async_trait::async_trait;
use bytes::Bytes;
use relaymux_router::{BackendRegistry, BackendTarget};
use relaymux_sniff::{
    ConnectionContext, DispatchResult, SniffError, SniffOutcome, Sniffer, StreamSource,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Front server errors
#[derive(Debug, Error)]
pub enum FrontServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] SniffError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Front server configuration
#[derive(Debug, Clone)]
pub struct FrontServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for FrontServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
        }
    }
}

/// Duplex byte stream the front door can hand off to the control plane.
pub trait ControlConnStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ControlConnStream for T {}

/// Connection handed to the control plane after the frame is consumed.
pub type ControlConn = Box<dyn ControlConnStream>;

/// Handler for tunnel-control frames, injected by the control plane.
///
/// `lead` holds bytes already buffered past the frame's header terminator;
/// the frame itself is consumed before the hand-off.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle(&self, dispatch: DispatchResult, lead: Bytes, conn: ControlConn);
}

/// Front-door TCP server
pub struct FrontServer {
    config: FrontServerConfig,
    registry: Arc<BackendRegistry>,
    control_handler: Option<Arc<dyn ControlHandler>>,
}

impl FrontServer {
    pub fn new(config: FrontServerConfig, registry: Arc<BackendRegistry>) -> Self {
        Self {
            config,
            registry,
            control_handler: None,
        }
    }

    pub fn with_control_handler(mut self, handler: Arc<dyn ControlHandler>) -> Self {
        self.control_handler = Some(handler);
        self
    }

    /// Run the accept loop until the shutdown token fires.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), FrontServerError> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                let port = self.config.bind_addr.port();
                let address = self.config.bind_addr.ip().to_string();
                let reason = e.to_string();
                FrontServerError::BindError {
                    address,
                    port,
                    reason,
                }
            })?;
        let local_addr = listener.local_addr()?;

        info!("Front server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Front server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);
                        let registry = self.registry.clone();
                        let handler = self.control_handler.clone();
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(socket, registry, handler, cancel).await
                            {
                                warn!("Failed to handle connection from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 16\r\n\r\nRoute not found\n";

/// Sniff one accepted connection and route it.
pub async fn handle_connection<S>(
    stream: S,
    registry: Arc<BackendRegistry>,
    control_handler: Option<Arc<dyn ControlHandler>>,
    cancel: CancellationToken,
) -> Result<(), FrontServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(StreamSource::new(stream), registry);

    // A parse failure is fatal for the connection: the socket is dropped
    // and the error surfaces to the accept loop's logging.
    let outcome = sniffer.sniff(&ctx, &cancel).await?;

    match outcome {
        SniffOutcome::Closed => {
            trace!("Peer closed during sniffing");
            Ok(())
        }
        SniffOutcome::Control(replay) => {
            let Some(dispatch) = ctx.get().cloned() else {
                // The sniffer publishes before every control outcome
                warn!("Control frame without a dispatch result");
                return Ok(());
            };
            match control_handler {
                Some(handler) => {
                    let (lead, source) = replay.into_parts();
                    handler
                        .handle(dispatch, lead, Box::new(source.into_inner()))
                        .await;
                }
                None => {
                    warn!(
                        "Control frame {} received but no control handler configured",
                        dispatch.control_message_id.as_deref().unwrap_or("?")
                    );
                }
            }
            Ok(())
        }
        SniffOutcome::Http(replay) => {
            let target = ctx.get().and_then(|d| d.matched_target.clone());
            let (lead, source) = replay.into_parts();
            let mut client = source.into_inner();

            match target {
                Some(target) => forward_http(&mut client, lead, &target).await,
                None => {
                    warn!("No backend for request host");
                    client.write_all(NOT_FOUND_RESPONSE).await?;
                    Ok(())
                }
            }
        }
    }
}

/// Replay the buffered request to the matched backend, then proxy both
/// directions until either side closes.
async fn forward_http<S>(
    client: &mut S,
    lead: Bytes,
    target: &BackendTarget,
) -> Result<(), FrontServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Proxying to: {}", target.target_addr);

    let mut upstream = TcpStream::connect(&target.target_addr).await?;
    upstream.write_all(&lead).await?;

    match tokio::io::copy_bidirectional(client, &mut upstream).await {
        Ok((to_backend, to_client)) => {
            debug!(
                "Proxy complete: {} bytes to backend, {} bytes back",
                to_backend + lead.len() as u64,
                to_client
            );
        }
        Err(e) => {
            debug!("Proxy connection closed: {}", e);
        }
    }

    Ok(())
}
