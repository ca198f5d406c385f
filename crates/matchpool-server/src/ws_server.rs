// WebSocket server: one task per client, requests forwarded to the app loop.

use std::fmt::Display;
use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::app::AppCommand;
use crate::protocol::{ClientRequest, ErrorPayload, ServerResponse};

/// Source of incoming client connections.
#[async_trait]
pub trait ConnectionListener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection, returning the stream and peer address.
    async fn accept(&mut self) -> std::io::Result<(Self::Stream, String)>;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// TCP listener whose connections are upgraded with tokio-tungstenite.
pub struct TungsteniteListener {
    inner: TcpListener,
}

impl TungsteniteListener {
    /// Bind to `addr`, e.g. `127.0.0.1:9100`. Port 0 picks a free port.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(TungsteniteListener { inner })
    }
}

#[async_trait]
impl ConnectionListener for TungsteniteListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> std::io::Result<(TcpStream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        Ok((stream, addr.to_string()))
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Accept clients forever, serving each on its own task.
///
/// Requests go to the application loop through `tx`; match changes published
/// on `updates` are pushed to every connected client.
pub async fn run<L: ConnectionListener>(
    mut listener: L,
    tx: mpsc::Sender<AppCommand>,
    updates: broadcast::Sender<ServerResponse>,
) -> anyhow::Result<()> {
    info!("WebSocket server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Accepted TCP connection from {addr}");

        let tx = tx.clone();
        let updates = updates.subscribe();
        tokio::spawn(async move {
            serve_connection(stream, addr, tx, updates).await;
        });
    }
}

async fn serve_connection<S>(
    stream: S,
    addr: String,
    tx: mpsc::Sender<AppCommand>,
    updates: broadcast::Receiver<ServerResponse>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (write, read) = ws_stream.split();
    if process_message_stream(read, write, &tx, updates, &addr)
        .await
        .is_err()
    {
        warn!("Application loop is gone; dropping client {addr}");
    }
    info!("Client {addr} disconnected");
}

/// Serve one client: answer each text frame with exactly one response and
/// forward pushed updates. A client that falls behind on updates is sent a
/// fresh `SNAPSHOT` of every match. Returns `Err(())` if the application loop
/// has shut down.
///
/// Generic over the stream and sink so it can be driven by in-memory
/// channels in tests.
pub async fn process_message_stream<St, Si>(
    mut stream: St,
    mut sink: Si,
    tx: &mpsc::Sender<AppCommand>,
    mut updates: broadcast::Receiver<ServerResponse>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    // A closed update channel would resolve immediately on every poll.
    let mut updates_open = true;

    loop {
        tokio::select! {
            biased;

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = dispatch(text.as_str(), tx).await?;
                        if !send_response(&mut sink, &response, addr).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {addr} sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong and raw frames are ignored.
                    }
                    None => break,
                }
            }

            update = updates.recv(), if updates_open => {
                match update {
                    Ok(push) => {
                        if !send_response(&mut sink, &push, addr).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {addr} missed {skipped} updates, sending snapshot");
                        let request = ClientRequest::ListMatches { status: None };
                        let snapshot = match request_app(request, tx).await? {
                            ServerResponse::Matches { matches } => {
                                ServerResponse::Snapshot { matches }
                            }
                            other => other,
                        };
                        if !send_response(&mut sink, &snapshot, addr).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        updates_open = false;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Parse a request and wait for the application loop's reply.
async fn dispatch(text: &str, tx: &mpsc::Sender<AppCommand>) -> Result<ServerResponse, ()> {
    match serde_json::from_str(text) {
        Ok(request) => request_app(request, tx).await,
        Err(e) => {
            debug!("Rejected malformed request: {e}");
            Ok(ErrorPayload::bad_request(format!("malformed request: {e}")).into())
        }
    }
}

async fn request_app(
    request: ClientRequest,
    tx: &mpsc::Sender<AppCommand>,
) -> Result<ServerResponse, ()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(AppCommand {
        request,
        reply: reply_tx,
    })
    .await
    .map_err(|_| ())?;
    reply_rx.await.map_err(|_| ())
}

/// Serialize and write one frame. Returns false if the client is gone.
async fn send_response<Si>(sink: &mut Si, response: &ServerResponse, addr: &str) -> bool
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize response for {addr}: {e}");
            return true;
        }
    };
    match sink.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to write to {addr}: {e}");
            false
        }
    }
}
