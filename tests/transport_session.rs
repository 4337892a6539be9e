use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use media_stream_client::audio::PlaybackBuffer;
use media_stream_client::net_link::{CLOSE_REASON, ConnectionState, LinkOptions, TransportSession};
use media_stream_client::protocol::ClientMessage;
use media_stream_client::{SessionError, SessionEvent, SessionEventKind};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const MEDIA_0XFF: &str = r#"{"event":"media","media":{"payload":"/w=="}}"#;

fn options(url: String) -> LinkOptions {
    LinkOptions {
        url,
        stream_sid: "test-sid".to_string(),
        connect_timeout: Duration::from_secs(5),
    }
}

async fn wait_for_len(buffer: &PlaybackBuffer, len: usize) {
    timeout(Duration::from_secs(5), async {
        while buffer.len() < len {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("playback buffer never filled");
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no session event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_start_media_and_normal_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(
            first.into_text().unwrap().as_str(),
            r#"{"event":"start","streamSid":"test-sid"}"#
        );

        // Garbage and unknown events are dropped without ending the session.
        ws.send(Message::text("not json".to_string())).await.unwrap();
        ws.send(Message::text(r#"{"event":"mark"}"#.to_string())).await.unwrap();
        ws.send(Message::text(MEDIA_0XFF.to_string())).await.unwrap();

        let media = ws.next().await.unwrap().unwrap();
        assert_eq!(
            media.into_text().unwrap().as_str(),
            r#"{"event":"media","media":{"payload":"nJw="}}"#
        );

        let mut close = None;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                close = frame;
            }
        }
        close
    });

    let buffer = Arc::new(PlaybackBuffer::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = TransportSession::open(&options(format!("ws://{}", addr)), buffer.clone(), tx, 7)
        .await
        .unwrap();

    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(
        next_event(&mut rx).await,
        SessionEvent::new(7, SessionEventKind::Opened)
    );

    wait_for_len(&buffer, 1).await;
    assert_eq!(buffer.try_pop().unwrap(), vec![0x00, 0x00]);
    assert!(buffer.is_empty());

    transport
        .handle()
        .send(&ClientMessage::media(&[0x9C, 0x9C]))
        .unwrap();

    transport.close(Duration::from_secs(2)).await;

    let frame = timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .expect("client sent no close frame");
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), CLOSE_REASON);
}

#[tokio::test]
async fn test_connect_failure_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, _rx) = mpsc::unbounded_channel();
    let result = TransportSession::open(
        &options(format!("ws://{}", addr)),
        Arc::new(PlaybackBuffer::new()),
        tx,
        1,
    )
    .await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
}

#[tokio::test]
async fn test_server_close_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _start = ws.next().await;
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = TransportSession::open(
        &options(format!("ws://{}", addr)),
        Arc::new(PlaybackBuffer::new()),
        tx,
        3,
    )
    .await
    .unwrap();

    assert_eq!(next_event(&mut rx).await.kind, SessionEventKind::Opened);
    assert_eq!(next_event(&mut rx).await.kind, SessionEventKind::Closed);
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_dropped_connection_is_a_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _start = ws.next().await;
        // Drop the socket without a close handshake.
        drop(ws);
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = TransportSession::open(
        &options(format!("ws://{}", addr)),
        Arc::new(PlaybackBuffer::new()),
        tx,
        4,
    )
    .await
    .unwrap();

    assert_eq!(next_event(&mut rx).await.kind, SessionEventKind::Opened);
    assert!(matches!(
        next_event(&mut rx).await.kind,
        SessionEventKind::TransportFailed(_)
    ));
    assert_eq!(transport.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_unanswered_close_still_ends_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _start = ws.next().await;
        // Hold the socket without ever reading the close frame.
        sleep(Duration::from_secs(30)).await;
        drop(ws);
    });

    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = TransportSession::open(
        &options(format!("ws://{}", addr)),
        Arc::new(PlaybackBuffer::new()),
        tx,
        5,
    )
    .await
    .unwrap();
    let state = transport.subscribe();
    assert_eq!(*state.borrow(), ConnectionState::Open);

    timeout(Duration::from_secs(2), transport.close(Duration::from_millis(200)))
        .await
        .expect("close did not honour its grace period");
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_dropping_session_closes_normally() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let mut close = None;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                close = frame;
            }
        }
        close
    });

    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = TransportSession::open(
        &options(format!("ws://{}", addr)),
        Arc::new(PlaybackBuffer::new()),
        tx,
        6,
    )
    .await
    .unwrap();

    // A capture loop still holding a handle must not keep the socket open.
    let handle = transport.handle();
    drop(transport);

    let frame = timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .expect("client sent no close frame");
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), CLOSE_REASON);
    drop(handle);
}
