//! Websocket transport for one streaming session.
//!
//! The socket is owned by a single tokio task. Outbound frames reach it
//! through an unbounded channel so the capture thread never waits on the
//! network; inbound media frames are decoded straight into the playback
//! buffer. Lifecycle changes travel to the controller as [`SessionEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::audio::{PlaybackBuffer, g711};
use crate::controller::{SessionEvent, SessionEventKind};
use crate::error::{InboundError, SessionError};
use crate::protocol::{ClientMessage, ServerMessage};

/// Reason attached to the normal-closure frame on stop.
pub const CLOSE_REASON: &str = "Stopping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

#[derive(Debug)]
enum NetCommand {
    SendText(String),
    Close,
}

/// Connection parameters, taken from [`crate::config::NetworkConfig`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub url: String,
    pub stream_sid: String,
    pub connect_timeout: Duration,
}

/// Cheap clonable sender half used by the capture loop.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<NetCommand>,
}

impl TransportHandle {
    /// Queue one message. Never waits on the socket.
    pub fn send(&self, msg: &ClientMessage) -> anyhow::Result<()> {
        let text = msg.to_json()?;
        self.tx
            .send(NetCommand::SendText(text))
            .map_err(|_| anyhow::anyhow!("transport is no longer running"))
    }
}

/// What happened to one inbound text frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A media buffer of this many PCM bytes was queued.
    Queued(usize),
    Ignored,
}

/// Decode a server frame and queue its audio. Non-media events are ignored.
pub fn dispatch_inbound(text: &str, buffer: &PlaybackBuffer) -> Result<Inbound, InboundError> {
    match ServerMessage::parse(text)? {
        ServerMessage::Media { media } => {
            let ulaw = media.decode()?;
            let pcm = g711::decode_buffer(&ulaw);
            let len = pcm.len();
            buffer.push(pcm);
            Ok(Inbound::Queued(len))
        }
        ServerMessage::Other => Ok(Inbound::Ignored),
    }
}

/// Dropping the session asks the socket task for a normal close without
/// waiting for it; [`TransportSession::close`] also waits.
pub struct TransportSession {
    handle: TransportHandle,
    state: Arc<watch::Sender<ConnectionState>>,
    task: JoinHandle<()>,
}

impl TransportSession {
    /// Connect, announce the stream with a `start` event and spawn the
    /// socket task. Fails without side effects if the handshake fails.
    pub async fn open(
        options: &LinkOptions,
        buffer: Arc<PlaybackBuffer>,
        events: mpsc::UnboundedSender<SessionEvent>,
        session: u64,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(watch::Sender::new(ConnectionState::Connecting));

        log::info!("Connecting to {}...", options.url);
        let (ws_stream, _) = match timeout(options.connect_timeout, connect_async(options.url.as_str())).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                state.send_replace(ConnectionState::Failed);
                return Err(SessionError::Transport(e.to_string()));
            }
            Err(_) => {
                state.send_replace(ConnectionState::Failed);
                return Err(SessionError::Transport(format!(
                    "connection to {} timed out after {:?}",
                    options.url, options.connect_timeout
                )));
            }
        };

        let (mut write, read) = ws_stream.split();

        let start = ClientMessage::start(options.stream_sid.clone())
            .to_json()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        write
            .send(Message::Text(start.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        state.send_replace(ConnectionState::Open);
        log::info!("Connected to {} (streamSid={})", options.url, options.stream_sid);
        let _ = events.send(SessionEvent::new(session, SessionEventKind::Opened));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let link = NetLink {
            buffer,
            events,
            session,
            state: state.clone(),
            rx_cmd: cmd_rx,
        };
        let task = tokio::spawn(link.run(write, read));

        Ok(Self {
            handle: TransportHandle { tx: cmd_tx },
            state,
            task,
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state changes, including the final one made by [`Self::close`].
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Send a normal-closure frame and wait up to `grace` for the socket task
    /// to finish; abort it after that.
    pub async fn close(mut self, grace: Duration) {
        let _ = self.handle.tx.send(NetCommand::Close);
        if timeout(grace, &mut self.task).await.is_err() {
            log::warn!("Socket did not close within {:?}, aborting", grace);
            self.task.abort();
            self.state.send_replace(ConnectionState::Closed);
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        // Capture threads may still hold handles, so the channel alone would
        // keep the socket open.
        let _ = self.handle.tx.send(NetCommand::Close);
    }
}

struct NetLink {
    buffer: Arc<PlaybackBuffer>,
    events: mpsc::UnboundedSender<SessionEvent>,
    session: u64,
    state: Arc<watch::Sender<ConnectionState>>,
    rx_cmd: mpsc::UnboundedReceiver<NetCommand>,
}

impl NetLink {
    async fn run<W, R>(mut self, mut write: W, mut read: R)
    where
        W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                        Some(Ok(Message::Binary(data))) => {
                            log::debug!("Ignoring {} byte binary frame", data.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            let _ = write.close().await;
                            self.finish(ConnectionState::Closed, SessionEventKind::Closed);
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.fail(e.to_string());
                            return;
                        }
                        None => {
                            self.fail("connection closed unexpectedly".to_string());
                            return;
                        }
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendText(text)) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                self.fail(e.to_string());
                                return;
                            }
                            log::trace!("Sent audio to server");
                        }
                        // Every handle dropped counts as a stop.
                        Some(NetCommand::Close) | None => {
                            self.close(&mut write, &mut read).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match dispatch_inbound(text, &self.buffer) {
            Ok(Inbound::Queued(len)) => log::trace!("Queued {} bytes for playback", len),
            Ok(Inbound::Ignored) => log::debug!("Ignoring non-media event: {}", text),
            Err(e) => log::warn!("Error parsing message: {}", e),
        }
    }

    async fn close<W, R>(&mut self, write: &mut W, read: &mut R)
    where
        W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static(CLOSE_REASON),
        };
        if let Err(e) = write.send(Message::Close(Some(frame))).await {
            log::debug!("Close frame not delivered: {}", e);
        } else {
            // Drain until the peer answers the close; the caller bounds the wait.
            while let Some(Ok(msg)) = read.next().await {
                if msg.is_close() {
                    break;
                }
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        log::info!("WebSocket closed");
    }

    fn finish(&self, state: ConnectionState, kind: SessionEventKind) {
        self.state.send_replace(state);
        let _ = self.events.send(SessionEvent::new(self.session, kind));
    }

    fn fail(&self, reason: String) {
        log::error!("WebSocket error: {}", reason);
        self.finish(ConnectionState::Failed, SessionEventKind::TransportFailed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_frame_queues_decoded_pcm() {
        let buffer = PlaybackBuffer::new();
        let text = r#"{"event":"media","media":{"payload":"/w=="}}"#;

        assert_eq!(dispatch_inbound(text, &buffer).unwrap(), Inbound::Queued(2));
        assert_eq!(buffer.len(), 1);
        assert_eq!(
            buffer.try_pop().unwrap(),
            g711::decode(0xFF).to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_other_events_do_not_touch_buffer() {
        let buffer = PlaybackBuffer::new();
        let text = r#"{"event":"mark","mark":{"name":"greeting"}}"#;
        assert_eq!(dispatch_inbound(text, &buffer).unwrap(), Inbound::Ignored);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        let buffer = PlaybackBuffer::new();
        assert!(dispatch_inbound("{", &buffer).is_err());
        assert!(dispatch_inbound(r#"{"event":"media","media":{"payload":"%%"}}"#, &buffer).is_err());
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_handle_fails_once_link_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TransportHandle { tx };
        assert!(handle.send(&ClientMessage::media(&[0xFF])).is_ok());
        drop(rx);
        assert!(handle.send(&ClientMessage::media(&[0xFF])).is_err());
    }
}
