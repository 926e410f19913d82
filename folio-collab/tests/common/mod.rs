//! In-process collaboration server for integration tests.
//!
//! Accepts WebSocket connections on a free loopback port and hands each one
//! to the test as a [`MockConnection`] that can read frames from the client
//! and push frames or closes back.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use folio_collab::session::SessionEvent;

pub const WAIT: Duration = Duration::from_secs(3);

/// What the server end of a connection should do next.
enum Instruction {
    Send(Message),
    /// Drop the TCP stream without a close frame.
    Abort,
}

pub struct MockServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    accepted: Arc<AtomicUsize>,
}

pub struct MockConnection {
    /// Request path including the query string.
    pub path: String,
    frames: mpsc::UnboundedReceiver<Value>,
    /// Close code sent by the client, once it closes.
    close_codes: mpsc::UnboundedReceiver<Option<u16>>,
    control: mpsc::UnboundedSender<Instruction>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let handshake = tokio_tungstenite::accept_hdr_async(
                        stream,
                        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                            path = req
                                .uri()
                                .path_and_query()
                                .map(|pq| pq.as_str().to_string())
                                .unwrap_or_default();
                            Ok(resp)
                        },
                    );
                    let Ok(ws) = handshake.await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    serve(ws, path, &conn_tx).await;
                });
            }
        });

        Self {
            url: format!("ws://127.0.0.1:{port}"),
            connections: conn_rx,
            accepted,
        }
    }

    /// Next accepted connection, failing the test after [`WAIT`].
    pub async fn next_connection(&mut self) -> MockConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    /// Next connection if one arrives within `within`.
    pub async fn try_next_connection(&mut self, within: Duration) -> Option<MockConnection> {
        timeout(within, self.connections.recv()).await.ok().flatten()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    path: String,
    conn_tx: &mpsc::UnboundedSender<MockConnection>,
) {
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let (close_tx, close_codes) = mpsc::unbounded_channel();
    let (control, mut instructions) = mpsc::unbounded_channel();
    if conn_tx
        .send(MockConnection {
            path,
            frames,
            close_codes,
            control,
        })
        .is_err()
    {
        return;
    }

    let (mut writer, mut reader) = ws.split();
    loop {
        tokio::select! {
            instruction = instructions.recv() => match instruction {
                Some(Instruction::Send(message)) => {
                    if writer.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Instruction::Abort) | None => return,
            },
            inbound = reader.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                    let _ = frame_tx.send(value);
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = close_tx.send(frame.map(|f| u16::from(f.code)));
                    // Let tungstenite answer the close.
                    while let Some(Ok(_)) = reader.next().await {}
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            }
        }
    }
}

impl MockConnection {
    /// Next JSON frame from the client.
    pub async fn next_frame(&mut self) -> Value {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame within timeout")
            .expect("connection closed")
    }

    pub async fn try_next_frame(&mut self, within: Duration) -> Option<Value> {
        timeout(within, self.frames.recv()).await.ok().flatten()
    }

    /// Skip frames until one with the given `type` arrives.
    pub async fn next_frame_of_type(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    /// Close code the client sent, waiting up to [`WAIT`].
    pub async fn client_close_code(&mut self) -> Option<u16> {
        timeout(WAIT, self.close_codes.recv())
            .await
            .expect("client did not close within timeout")
            .flatten()
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self
            .control
            .send(Instruction::Send(Message::text(text.to_string())));
    }

    pub fn close(&self, code: CloseCode) {
        let _ = self.control.send(Instruction::Send(Message::Close(Some(CloseFrame {
            code,
            reason: "test".into(),
        }))));
    }

    pub fn abort(&self) {
        let _ = self.control.send(Instruction::Abort);
    }
}

/// A complete envelope as a server would broadcast it.
pub fn envelope(kind: &str, data: Value, sender_id: &str) -> Value {
    json!({
        "type": kind,
        "data": data,
        "sender_id": sender_id,
        "timestamp": "2024-05-01T12:00:00.000Z",
    })
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event not received within timeout")
}

/// Drain whatever is already queued.
pub async fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(50), events.recv()).await {
        drained.push(event);
    }
    drained
}
