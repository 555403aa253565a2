//! Websocket transport for Gemini Live sessions.
//!
//! `connect` performs the socket handshake and sends the setup message. After
//! that a writer task drains outbound frames and a reader task turns server
//! frames into session signals. The session is reported open once the server
//! acknowledges the setup.

use crate::types::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use live_voice_core::codec::WireChunk;
use live_voice_core::generic_types::{SessionRequest, SignalSink};
use live_voice_core::session::{
    ConnectError, LiveConnector, LiveSession, SendError, SessionError,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

pub const DEFAULT_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-preview-native-audio-dialog";

/// How long `close` waits for the close frame to be flushed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    api_key: SecretString,
    url: String,
}

impl GeminiLiveConnector {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            url: DEFAULT_URL.to_string(),
        }
    }

    /// Overrides the websocket endpoint. The key is appended as a query parameter.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}?key={}", self.url, self.api_key.expose_secret())
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        request: SessionRequest,
        signals: SignalSink,
    ) -> Result<Box<dyn LiveSession>, ConnectError> {
        let setup = serde_json::to_string(&ClientMessage::setup(&request))
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        let (ws_stream, _) = connect_async(self.endpoint())
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        info!(session_id = %signals.session_id(), "Connected to Gemini Live websocket");
        let (mut ws_tx, ws_rx) = ws_stream.split();

        ws_tx
            .send(WsMessage::Text(setup.into()))
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(ws_tx, outbound_rx));
        let reader = tokio::spawn(read_loop(ws_rx, signals));

        Ok(Box::new(GeminiLiveSession {
            outbound: Some(outbound_tx),
            writer: Some(writer),
            reader,
        }))
    }
}

pub struct GeminiLiveSession {
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    fn send(&mut self, chunk: WireChunk) -> Result<(), SendError> {
        let outbound = self.outbound.as_ref().ok_or(SendError::TransportClosed)?;
        let payload = serde_json::to_string(&ClientMessage::audio(chunk))
            .map_err(|e| SendError::Transport(e.to_string()))?;
        outbound
            .send(WsMessage::Text(payload.into()))
            .map_err(|_| SendError::TransportClosed)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let outbound = self.outbound.take().ok_or(SessionError::AlreadyClosed)?;
        // The writer may already have exited after a transport failure.
        let _ = outbound.send(WsMessage::Close(None));
        drop(outbound);

        let result = match self.writer.take() {
            Some(writer) => match tokio::time::timeout(CLOSE_TIMEOUT, writer).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SessionError::Close(e.to_string())),
                Err(_) => {
                    warn!("Timed out flushing the close frame");
                    Ok(())
                }
            },
            None => Ok(()),
        };
        self.reader.abort();
        result
    }
}

impl Drop for GeminiLiveSession {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, WsMessage::Close(_));
        if let Err(e) = ws_tx.send(message).await {
            warn!(error = %e, "Error writing to Gemini websocket");
            break;
        }
        if closing {
            break;
        }
    }
    debug!("Gemini writer finished");
}

async fn read_loop(mut ws_rx: SplitStream<WsStream>, signals: SignalSink) {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => dispatch(text.as_str(), &signals),
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch(text, &signals),
                Err(_) => warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
            },
            Ok(WsMessage::Close(close_frame)) => {
                info!(?close_frame, "Gemini websocket closed by server");
                signals.closed(close_frame.map(|f| f.reason.as_str().to_string()));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Error reading from Gemini websocket");
                signals.error(e.to_string());
                return;
            }
        }
    }
    signals.closed(None);
}

/// Maps one server JSON frame onto session signals.
fn dispatch(text: &str, signals: &SignalSink) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, raw = %text, "Failed to parse Gemini message");
            return;
        }
    };

    if message.setup_complete.is_some() {
        info!("Gemini session setup is complete");
        signals.opened();
    }
    if let Some(content) = message.server_content {
        signals.message(content.into_inbound());
    }
    if let Some(go_away) = message.go_away {
        warn!(time_left = ?go_away.time_left, "Gemini server is going away");
    }
}
