//! Main channel: TCP accept loop and per-connection request/reply loop.
//!
//! # Connection lifecycle
//!
//! 1. The peer connects and sends its 12-byte hello carrying the largest
//!    reply it can receive.  The device answers with its own hello carrying
//!    the transmit budget it will honour: the smaller of the peer's figure
//!    and `max_tx_budget`.  The budget bounds the whole reply frame, so the
//!    20-byte reply header is charged before any result buffer.  A peer that
//!    sends no hello within `hello_timeout_ms` is dropped.
//! 2. Requests are then served strictly one at a time.  Each frame is a
//!    44-byte header followed by `body_len` bytes of parameters.  The body is
//!    handed to the dispatch table on a blocking worker (handlers make
//!    synchronous native calls) and the encoded reply is written back before
//!    the next header is read.
//! 3. A body larger than `max_request_size` is read and discarded so the
//!    stream stays in sync, and answered with a protocol error.
//! 4. On EOF, I/O error, or shutdown, the session is torn down: every handle
//!    the peer left open is closed and the controller stream is stopped.
//!    Shutdown is noticed during any read from the peer, but a dispatch that
//!    has started always completes and its reply is written.
//!
//! Only one peer is served at a time; the listener keeps accepting only after
//! the current session has been torn down.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_core::protocol::codec::{decode_hello, decode_request_header, encode_hello};
use tether_core::protocol::{
    SessionHello, HELLO_SIZE, PROTOCOL_VERSION, REPLY_HEADER_SIZE, REQUEST_HEADER_SIZE,
};
use tether_core::{CallOutcome, DispatchTable, ProtocolError, RequestHeader, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::application::session::Session;
use crate::infrastructure::native::Services;
use crate::infrastructure::storage::config::{ConfigError, DeviceConfig};
use crate::infrastructure::streaming::StreamingSettings;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Error type for the main channel.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The TCP listener could not be bound.
    #[error("failed to bind control listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The configuration cannot be turned into listener settings.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O error on an established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer is not speaking this protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer connected but sent no hello in time.
    #[error("no hello received within {0:?}")]
    HelloTimeout(Duration),

    /// A native step that must run before serving peers failed.
    #[error("startup step {step} failed with status {status}")]
    Setup { step: &'static str, status: StatusCode },
}

/// Per-connection limits taken from the configuration.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_tx_budget: u32,
    max_request_size: u32,
    hello_timeout: Duration,
}

/// The bound main-channel server.
pub struct DeviceServer {
    listener: TcpListener,
    services: Services,
    table: Arc<DispatchTable<Session>>,
    streaming: StreamingSettings,
    limits: Limits,
}

impl DeviceServer {
    /// Captures the launched application's extended header, then binds the
    /// control listener on `server.bind_address:server.control_port`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Setup`] if the extended header cannot be read,
    /// [`ServerError::Config`] for unusable addresses and
    /// [`ServerError::Bind`] if the port cannot be bound.
    pub async fn bind(
        config: &DeviceConfig,
        mut services: Services,
        table: Arc<DispatchTable<Session>>,
    ) -> Result<Self, ServerError> {
        services.capture_program_info().map_err(|status| {
            error!(%status, "failed to read the launched application's extended header");
            ServerError::Setup {
                step: "program info",
                status,
            }
        })?;

        let addr = SocketAddr::new(config.bind_ip()?, config.server.control_port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let streaming = config.streaming_settings()?;

        info!("control channel listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            services,
            table,
            streaming,
            limits: Limits {
                max_tx_budget: config.server.max_tx_budget,
                max_request_size: config.server.max_request_size,
                hello_timeout: Duration::from_millis(config.server.hello_timeout_ms),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves peers until `running` is cleared.
    ///
    /// # Errors
    ///
    /// Connection-level failures are logged and never end the loop; this
    /// currently always returns `Ok`.
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<(), ServerError> {
        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => self.serve_peer(stream, peer, &running).await,
                Ok(Err(e)) => error!("accept error: {e}"),
                // No connection in the last poll interval.
                Err(_) => {}
            }
        }
        Ok(())
    }

    async fn serve_peer(&self, stream: TcpStream, peer: SocketAddr, running: &AtomicBool) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {peer}: {e}");
        }
        let session = Arc::new(Session::new(self.services.clone(), self.streaming));
        let id = session.id();
        info!(session = %id, %peer, "peer connected");

        let result = serve_connection(
            stream,
            Arc::clone(&session),
            Arc::clone(&self.table),
            self.limits,
            running,
        )
        .await;
        match result {
            Ok(()) => info!(session = %id, "peer disconnected"),
            Err(e) => warn!(session = %id, "connection closed with error: {e}"),
        }

        // Closing native handles can block.
        if let Err(e) = tokio::task::spawn_blocking(move || session.teardown()).await {
            error!(session = %id, "session teardown failed: {e}");
        }
    }
}

/// Runs the hello exchange and the request/reply loop for one connection.
///
/// Returns `Ok(())` on a clean EOF between requests or on shutdown.
async fn serve_connection(
    mut stream: TcpStream,
    session: Arc<Session>,
    table: Arc<DispatchTable<Session>>,
    limits: Limits,
    running: &AtomicBool,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.split();

    let mut hello = [0u8; HELLO_SIZE];
    let read = timeout(limits.hello_timeout, reader.read_exact(&mut hello));
    match unless_shutdown(running, read).await {
        None => return Ok(()),
        Some(Err(_)) => return Err(ServerError::HelloTimeout(limits.hello_timeout)),
        Some(Ok(read)) => {
            read?;
        }
    }
    let peer_hello = decode_hello(&hello)?;
    let tx_budget = peer_hello.budget.min(limits.max_tx_budget);
    let reply_hello = SessionHello {
        version: PROTOCOL_VERSION,
        budget: tx_budget,
    };
    writer.write_all(&encode_hello(&reply_hello)).await?;
    let body_budget = (tx_budget as usize).saturating_sub(REPLY_HEADER_SIZE);
    debug!(
        session = %session.id(),
        peer_budget = peer_hello.budget,
        tx_budget,
        body_budget,
        "hello exchanged"
    );

    loop {
        let mut header_buf = [0u8; REQUEST_HEADER_SIZE];
        match unless_shutdown(running, reader.read_exact(&mut header_buf)).await {
            None => return Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Some(Err(e)) => return Err(e.into()),
        }
        let header = decode_request_header(&header_buf)?;
        let request_id = header.request_id;

        let reply = if header.body_len > limits.max_request_size {
            let drain = discard(&mut reader, header.body_len);
            let Some(drained) = unless_shutdown(running, drain).await else {
                return Ok(());
            };
            drained?;
            let error = ProtocolError::RequestTooLarge {
                len: header.body_len as usize,
                limit: limits.max_request_size as usize,
            };
            warn!(session = %session.id(), request_id, "{error}");
            CallOutcome::ProtocolError(error).encode(request_id)
        } else {
            let mut body = vec![0u8; header.body_len as usize];
            let Some(read) = unless_shutdown(running, reader.read_exact(&mut body)).await else {
                return Ok(());
            };
            read?;
            dispatch(&table, &session, header, body, body_budget)
                .await
                .encode(request_id)
        };

        writer.write_all(&reply).await?;
    }
}

/// Runs one request on a blocking worker.
async fn dispatch(
    table: &Arc<DispatchTable<Session>>,
    session: &Arc<Session>,
    header: RequestHeader,
    body: Vec<u8>,
    tx_budget: usize,
) -> CallOutcome {
    let table = Arc::clone(table);
    let session = Arc::clone(session);
    let request_id = header.request_id;
    let task =
        tokio::task::spawn_blocking(move || table.dispatch(&header, &body, tx_budget, &session));
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(request_id, "handler task failed: {e}");
            CallOutcome::InternalError
        }
    }
}

/// Reads and drops exactly `len` bytes.
async fn discard<R>(reader: &mut R, len: u32) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let len = u64::from(len);
    let copied = tokio::io::copy(&mut reader.take(len), &mut tokio::io::sink()).await?;
    if copied < len {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

/// Drives `io` unless shutdown is requested first, in which case `None`.
async fn unless_shutdown<F: Future>(running: &AtomicBool, io: F) -> Option<F::Output> {
    tokio::select! {
        out = io => Some(out),
        _ = shutdown_requested(running) => None,
    }
}

/// Resolves once `running` has been cleared.
async fn shutdown_requested(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        sleep(ACCEPT_POLL).await;
    }
}
