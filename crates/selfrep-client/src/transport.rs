//! Physical links to the control plane.
//!
//! A [`Connector`] opens one [`Link`] per attempt. The link is a pair of
//! channels, so the connection driver never touches the socket itself and
//! a test can stand in for the server with [`channel_transport`].
//!
//! Inbound items arrive in wire order. An `Err` item or the end of the
//! inbound stream means the link is gone. Dropping the outbound sender
//! closes the link from the client side.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::ClientError;

/// One application-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text, carrying a JSON envelope.
    Text(String),
    /// Binary, carrying a protobuf envelope.
    Binary(Vec<u8>),
}

/// An open connection, seen as channels.
#[derive(Debug)]
pub struct Link {
    /// Frames to send. Dropping it closes the connection.
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Frames received, in order. An `Err` is the last item.
    pub inbound: mpsc::UnboundedReceiver<Result<Frame, ClientError>>,
}

/// Opens links to an address.
pub trait Connector: Send + Sync + 'static {
    /// Open a new link to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the connection cannot be
    /// established.
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link, ClientError>> + Send;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Connects over WebSocket with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, ClientError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        debug!(url, "websocket handshake complete");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        // Writer: drains outbound frames until the client drops its sender.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text),
                    Frame::Binary(bytes) => Message::Binary(bytes),
                };
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: forwards data frames until the socket or the client goes away.
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    () = inbound_tx.closed() => break,
                    item = source.next() => item,
                };
                let frame = match item {
                    Some(Ok(Message::Text(text))) => Frame::Text(text),
                    Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes),
                    Some(Ok(Message::Close(close))) => {
                        debug!(?close, "server closed websocket");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(Err(ClientError::Transport(e.to_string())));
                        break;
                    }
                    None => break,
                };
                if inbound_tx.send(Ok(frame)).is_err() {
                    break;
                }
            }
            trace!("websocket reader finished");
        });

        Ok(Link { outbound, inbound })
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Create a connected in-memory connector and listener.
///
/// Each `connect` on the connector shows up as a [`PendingConnection`] on
/// the listener, which decides whether to accept or refuse it.
pub fn channel_transport() -> (ChannelConnector, ChannelListener) {
    let (pending, incoming) = mpsc::unbounded_channel();
    (ChannelConnector { pending }, ChannelListener { incoming })
}

/// Client half of [`channel_transport`].
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    pending: mpsc::UnboundedSender<PendingConnection>,
}

impl Connector for ChannelConnector {
    async fn connect(&self, url: &str) -> Result<Link, ClientError> {
        let (reply, response) = oneshot::channel();
        self.pending
            .send(PendingConnection {
                url: url.to_owned(),
                reply,
            })
            .or(Err(ClientError::Transport("listener is gone".to_owned())))?;
        response
            .await
            .unwrap_or_else(|_| Err(ClientError::Transport("connection refused".to_owned())))
    }
}

/// Server half of [`channel_transport`].
#[derive(Debug)]
pub struct ChannelListener {
    incoming: mpsc::UnboundedReceiver<PendingConnection>,
}

impl ChannelListener {
    /// Wait for the next connection attempt.
    pub async fn next(&mut self) -> Option<PendingConnection> {
        self.incoming.recv().await
    }

    /// The next connection attempt, if one is already waiting.
    pub fn try_next(&mut self) -> Option<PendingConnection> {
        self.incoming.try_recv().ok()
    }
}

/// A connection attempt waiting for the server's answer.
///
/// Dropping it refuses the attempt.
#[derive(Debug)]
pub struct PendingConnection {
    url: String,
    reply: oneshot::Sender<Result<Link, ClientError>>,
}

impl PendingConnection {
    /// The address the client dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the link.
    pub fn accept(self) -> ServerEnd {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.reply.send(Ok(Link { outbound, inbound }));
        ServerEnd {
            to_client,
            from_client,
        }
    }

    /// Fail the attempt with a transport error.
    pub fn refuse(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(ClientError::Transport(reason.into())));
    }
}

/// The server's side of an accepted in-memory link.
///
/// Dropping it closes the link cleanly.
#[derive(Debug)]
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<Result<Frame, ClientError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerEnd {
    /// Send a frame to the client. Returns `false` if the client is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.send(Ok(frame)).is_ok()
    }

    /// Send a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Break the link with a transport error.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self
            .to_client
            .send(Err(ClientError::Transport(reason.into())));
    }

    /// Wait for the next frame from the client. `None` once the client
    /// has dropped the link.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }
}
