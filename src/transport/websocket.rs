//! WebSocket transport with optional TLS
//!
//! Each accepted socket is split: a writer task drains an outbound queue into
//! the sink, and a reader task decodes text frames into envelopes.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};
use crate::manager::SessionManager;
use crate::server::serve_connection;
use crate::types::envelope::Envelope;

use super::{Channel, Connection};

/// Outbound half of a WebSocket connection
pub struct WebSocketChannel {
    tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl Channel for WebSocketChannel {
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.open.load(Ordering::SeqCst) {
                return Err(SessionError::channel_closed("websocket closed"));
            }
            let text = envelope.to_json()?;
            self.tx
                .send(Message::Text(text.into()))
                .map_err(|_| SessionError::channel_closed("websocket writer stopped"))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.open.swap(false, Ordering::SeqCst) {
                let _ = self.tx.send(Message::Close(None));
            }
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

/// Wrap an upgraded WebSocket stream as a [`Connection`]
pub fn websocket_connection<S>(stream: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));

    let writer_open = Arc::clone(&open);
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = sink.send(message).await {
                log::debug!("WebSocket write failed: {e}");
                break;
            }
            if closing {
                break;
            }
        }
        writer_open.store(false, Ordering::SeqCst);
        let _ = sink.close().await;
    });

    let reader_open = Arc::clone(&open);
    tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            let item = match frame {
                Ok(Message::Text(text)) => decode_frame(text.as_bytes()),
                Ok(Message::Binary(bytes)) => decode_frame(&bytes),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    let _ = in_tx.send(Err(SessionError::channel_closed(e.to_string())));
                    break;
                }
            };
            if in_tx.send(item).is_err() {
                break;
            }
        }
        reader_open.store(false, Ordering::SeqCst);
    });

    Connection {
        channel: Arc::new(WebSocketChannel { tx: out_tx, open }),
        inbound: in_rx,
    }
}

fn decode_frame(bytes: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(bytes)
        .map_err(|e| SessionError::protocol(format!("malformed envelope: {e}")))
}

/// Accept connections until `shutdown` is cancelled
///
/// # Arguments
/// * `listener` - Bound TCP listener
/// * `tls` - TLS acceptor, if the listener serves `wss://`
/// * `manager` - Session manager every connection is served against
/// * `shutdown` - Stops accepting when cancelled
///
/// # Errors
/// Returns error if the listener fails
pub async fn serve(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    manager: SessionManager,
    shutdown: CancellationToken,
) -> Result<()> {
    log::info!(
        "Listening on {} ({})",
        listener.local_addr()?,
        if tls.is_some() { "wss" } else { "ws" }
    );

    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("Accept failed: {e}");
                    continue;
                }
            },
        };
        tokio::spawn(handle_stream(stream, peer, tls.clone(), manager.clone()));
    }
    log::info!("Listener stopped");
    Ok(())
}

async fn handle_stream(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    manager: SessionManager,
) {
    let connection = match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => match accept_async(tls_stream).await {
                Ok(ws) => websocket_connection(ws),
                Err(e) => {
                    log::warn!("WebSocket upgrade from {peer} failed: {e}");
                    return;
                }
            },
            Err(e) => {
                log::warn!("TLS handshake with {peer} failed: {e}");
                return;
            }
        },
        None => match accept_async(stream).await {
            Ok(ws) => websocket_connection(ws),
            Err(e) => {
                log::warn!("WebSocket upgrade from {peer} failed: {e}");
                return;
            }
        },
    };

    log::debug!("Accepted connection from {peer}");
    serve_connection(manager, connection).await;
}

/// Build a TLS acceptor from PEM certificate chain and key files
///
/// # Errors
/// Returns `SessionError::InvalidConfig` if the files cannot be read or
/// contain no usable certificate or key
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(SessionError::invalid_config(format!(
            "no certificates in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        SessionError::invalid_config(format!("no private key in {}", key_path.display()))
    })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| SessionError::invalid_config(format!("TLS configuration: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
