use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ServerEvent};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Outbound half of the real-time channel.
pub trait EventSink: Send + Sync {
    /// # Errors
    ///
    /// [`ClientError::Socket`] when the connection is gone.
    fn emit(&self, event: ClientEvent) -> Result<()>;
}

/// The single live connection. Dropping it tears both tasks down.
pub struct SocketHandle {
    tx: mpsc::UnboundedSender<Message>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// Opens the connection, authenticating with `token` as a query parameter.
///
/// Returns the handle and a stream of decoded server events. Frames that do
/// not decode are logged and skipped.
///
/// # Errors
///
/// The handshake error when the server cannot be reached or refuses the
/// upgrade.
pub async fn connect(url: &str, token: Option<&str>) -> Result<(SocketHandle, mpsc::UnboundedReceiver<ServerEvent>)> {
    let mut url = Url::parse(url).map_err(|e| ClientError::Config(format!("invalid socket URL {url}: {e}")))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }

    let (ws_stream, _) = connect_async(url.as_str()).await?;
    info!("socket connected to {}", url.host_str().unwrap_or_default());

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_tx.send(message).await {
                error!("Failed to send socket frame: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(Message::Text(text)) => match ServerEvent::from_frame(text.as_str()) {
                    Ok(event) => {
                        if events_tx.send(event).is_err() {
                            debug!("event receiver dropped, stopping reader");
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring socket frame: {e}"),
                },
                Ok(Message::Close(_)) => {
                    info!("socket closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Socket error: {e}");
                    break;
                }
            }
        }
    });

    Ok((
        SocketHandle {
            tx,
            reader: Some(reader),
            writer: Some(writer),
        },
        events_rx,
    ))
}

impl SocketHandle {
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Sends a close frame and waits briefly for it to flush.
    pub async fn close(mut self) {
        let _ = self.tx.send(Message::Close(None));
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                warn!("socket writer did not finish within {CLOSE_GRACE:?}");
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl EventSink for SocketHandle {
    fn emit(&self, event: ClientEvent) -> Result<()> {
        let frame = event.to_frame()?;
        debug!("emit {}", event.name());
        self.tx
            .send(Message::text(frame))
            .map_err(|_| ClientError::Socket("connection closed".to_string()))
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}
