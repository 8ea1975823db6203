//! WebSocket Transport
//!
//! One socket per connection attempt. The controller talks to it through
//! channels: outbound frames go through a [`FrameSender`], inbound frames and
//! the close notification arrive as [`TransportEvent`]s.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use super::messages::GatewaySend;
use crate::shared::error::{GatewayError, Result};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame queued for the socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// Event reported by the socket reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

/// Write half of a connection.
///
/// Cloned into the heartbeat scheduler; once the connection is closed
/// every send fails with [`GatewayError::TransportClosed`].
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameSender {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: &GatewaySend) -> Result<()> {
        let text = message.encode()?;
        tracing::trace!(op = message.op, "Outbound packet");
        self.tx
            .send(OutboundFrame::Text(text))
            .map_err(|_| GatewayError::TransportClosed)
    }

    fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }
}

/// An open connection to the gateway
pub struct Connection {
    sender: FrameSender,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub fn new(sender: FrameSender, inbound: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self {
            sender,
            inbound,
            tasks: Vec::new(),
        }
    }

    /// Attach a background task that is aborted when the connection closes.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    /// Next inbound event; `None` once the reader is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Close the socket and stop reading from it.
    pub fn close(mut self) {
        self.sender.close();
        self.inbound.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Opens connections to a gateway endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Connection>;
}

/// Production connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Connection> {
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Forward queued frames to the socket
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::debug!(error = %e, "WebSocket write failed");
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        let _ = timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
                        break;
                    }
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(TransportEvent::Text(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        // Compression is not negotiated, so binary frames are unexpected
                        tracing::debug!(len = data.len(), "Ignoring binary frame");
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, String::new()));
                        let _ = in_tx.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
            let _ = in_tx.send(TransportEvent::Closed {
                code: None,
                reason: "stream ended".into(),
            });
        });

        // The writer exits on its own after flushing the close frame
        drop(writer);

        Ok(Connection::new(FrameSender::new(out_tx), in_rx).with_task(reader))
    }
}
