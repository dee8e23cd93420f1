//! WebSocket transport implementation over `tokio-tungstenite`.
//!
//! [`LiveApiTransport::open`] connects, sends the [`SetupRequest`], then
//! spawns two tasks:
//!
//! * a writer task — sole owner of the socket's send half.  Every outbound
//!   chunk goes through its queue, so send order equals capture order and
//!   every send is serialized behind the setup message.
//! * a reader task — parses inbound text frames into [`TransportEvent`]s on
//!   a single channel.  Undecodable payloads are logged and dropped (the
//!   session continues); socket errors emit a terminal `Error` event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::audio::{AudioChunk, OUTPUT_SAMPLE_RATE};
use crate::config::ApiConfig;

use super::protocol::{parse_pcm_rate, MediaFrame, ServerEvent, SetupRequest};
use super::{LiveConfig, SessionHandle, Transport, TransportError, TransportEvent, TransportSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound event channel depth; backpressure beyond this stalls the reader.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outbound queue depth (~8 s of audio at one chunk per 256 ms).  A full
/// queue means the socket has stalled; further chunks are dropped rather
/// than buffered without bound.
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// LiveApiTransport
// ---------------------------------------------------------------------------

/// WebSocket client for the remote voice endpoint.
pub struct LiveApiTransport {
    endpoint: String,
    api_key: Option<String>,
}

impl LiveApiTransport {
    /// Create a transport for the given `wss://` endpoint.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Build from the application's API settings.
    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(config.endpoint.clone(), config.api_key.clone())
    }

    fn url(&self) -> String {
        match &self.api_key {
            Some(key) => format!("{}?key={key}", self.endpoint),
            None => self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl Transport for LiveApiTransport {
    async fn open(&self, config: &LiveConfig) -> Result<TransportSession, TransportError> {
        let (ws, _response) = connect_async(self.url())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        log::debug!("transport: websocket connected to {}", self.endpoint);

        let (mut sink, stream) = ws.split();

        // Setup goes out before the writer task exists, so no audio frame
        // can ever overtake it.
        let setup = SetupRequest {
            model: config.model.clone(),
            voice_name: config.voice_name.clone(),
            system_instruction: config.system_instruction.clone(),
        };
        let payload =
            serde_json::to_string(&setup).map_err(|e| TransportError::Setup(e.to_string()))?;
        sink.send(Message::text(payload))
            .await
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        tokio::spawn(write_loop(sink, out_rx));
        tokio::spawn(read_loop(stream, event_tx));

        Ok(TransportSession {
            handle: Arc::new(LiveSessionHandle {
                out_tx,
                closed: AtomicBool::new(false),
            }),
            events: event_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// LiveSessionHandle
// ---------------------------------------------------------------------------

enum WriterCommand {
    Frame(AudioChunk),
    Close,
}

/// Outbound handle backed by the writer task's queue.
struct LiveSessionHandle {
    out_tx: mpsc::Sender<WriterCommand>,
    closed: AtomicBool,
}

impl SessionHandle for LiveSessionHandle {
    fn send_audio(&self, chunk: AudioChunk) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.out_tx.try_send(WriterCommand::Frame(chunk)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("transport: outbound queue full (socket stalled?), dropping chunk");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Writer gone means the connection already died; the reader
                // will have surfaced the terminal event.
                log::debug!("transport: dropping outbound chunk, writer task gone");
            }
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // A full queue means the socket is stalled and the close frame
            // could not have gone out either.
            let _ = self.out_tx.try_send(WriterCommand::Close);
        }
    }
}

// ---------------------------------------------------------------------------
// Writer / reader tasks
// ---------------------------------------------------------------------------

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<WriterCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Frame(chunk) => {
                let frame = MediaFrame {
                    mime_type: chunk.mime_type(),
                    data: BASE64.encode(&chunk.data),
                };
                let payload = match serde_json::to_string(&frame) {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("transport: failed to encode outbound frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(payload)).await {
                    log::warn!("transport: outbound send failed: {e}");
                    break;
                }
            }
            WriterCommand::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    log::debug!("transport: writer task finished");
}

async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
    if tx.send(TransportEvent::Opened).await.is_err() {
        return;
    }

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let event: ServerEvent = match serde_json::from_str(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("transport: dropping undecodable server event: {e}");
                        continue;
                    }
                };

                if let Some(frame) = event.audio {
                    match BASE64.decode(frame.data.as_bytes()) {
                        Ok(data) => {
                            let chunk = AudioChunk {
                                data,
                                sample_rate: parse_pcm_rate(&frame.mime_type)
                                    .unwrap_or(OUTPUT_SAMPLE_RATE),
                                channels: 1,
                            };
                            if tx.send(TransportEvent::Audio(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            log::warn!("transport: dropping frame with bad base64: {e}");
                        }
                    }
                }

                if event.interrupted.unwrap_or(false)
                    && tx.send(TransportEvent::Interrupted).await.is_err()
                {
                    return;
                }
                // Neither field set: valid no-op keepalive.
            }
            Ok(Message::Close(_)) => {
                let _ = tx.send(TransportEvent::Closed).await;
                return;
            }
            // Ping/pong are answered by tungstenite; binary frames are not
            // part of this protocol.
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        }
    }

    // Stream ended without a close frame.
    let _ = tx.send(TransportEvent::Closed).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::INPUT_SAMPLE_RATE;

    fn test_handle() -> (LiveSessionHandle, mpsc::Receiver<WriterCommand>) {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        (
            LiveSessionHandle {
                out_tx,
                closed: AtomicBool::new(false),
            },
            out_rx,
        )
    }

    fn chunk() -> AudioChunk {
        AudioChunk {
            data: vec![0, 0, 1, 0],
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Calling `close` twice must enqueue exactly one close command.
    #[tokio::test]
    async fn close_is_idempotent() {
        let (handle, mut rx) = test_handle();

        handle.close();
        handle.close();
        drop(handle);

        let mut closes = 0;
        while let Some(cmd) = rx.recv().await {
            if matches!(cmd, WriterCommand::Close) {
                closes += 1;
            }
        }
        assert_eq!(closes, 1);
    }

    /// Audio sent after `close` is silently discarded.
    #[tokio::test]
    async fn send_after_close_is_dropped() {
        let (handle, mut rx) = test_handle();

        handle.send_audio(chunk());
        handle.close();
        handle.send_audio(chunk());
        drop(handle);

        let mut frames = 0;
        while let Some(cmd) = rx.recv().await {
            if matches!(cmd, WriterCommand::Frame(_)) {
                frames += 1;
            }
        }
        assert_eq!(frames, 1);
    }

    /// Chunks are queued in call order.
    #[tokio::test]
    async fn send_preserves_order() {
        let (handle, mut rx) = test_handle();

        for i in 0..3u8 {
            handle.send_audio(AudioChunk {
                data: vec![i, 0],
                sample_rate: INPUT_SAMPLE_RATE,
                channels: 1,
            });
        }
        drop(handle);

        let mut seen = Vec::new();
        while let Some(cmd) = rx.recv().await {
            if let WriterCommand::Frame(c) = cmd {
                seen.push(c.data[0]);
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    /// With no reader draining the queue, chunks beyond the queue depth are
    /// dropped instead of buffered without bound.
    #[tokio::test]
    async fn outbound_queue_overflow_drops_excess_chunks() {
        let (handle, mut rx) = test_handle();

        for _ in 0..OUTBOUND_CHANNEL_CAPACITY + 5 {
            handle.send_audio(chunk());
        }
        drop(handle);

        let mut frames = 0;
        while let Some(cmd) = rx.recv().await {
            if matches!(cmd, WriterCommand::Frame(_)) {
                frames += 1;
            }
        }
        assert_eq!(frames, OUTBOUND_CHANNEL_CAPACITY);
    }

    #[test]
    fn url_appends_api_key() {
        let t = LiveApiTransport::new("wss://example.test/voice", Some("k123".into()));
        assert_eq!(t.url(), "wss://example.test/voice?key=k123");

        let t = LiveApiTransport::new("wss://example.test/voice", None);
        assert_eq!(t.url(), "wss://example.test/voice");
    }
}
