//! A single connected WebSocket client (spec.md §4.2). One `ClientSession`
//! per socket; the send half is serialized behind a mutex the same way the
//! teacher's forwarder sessions guard their outbound half, since a `Delivery`
//! fan-out and a direct `Response` can race on the same socket.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SocketSink = SplitSink<WebSocket, Message>;

/// A connected client. `id` is the `ClientId` header value if the caller
/// supplied one, otherwise a server-generated UUID (spec.md §4.3).
pub struct ClientSession {
    pub id: String,
    sink: Mutex<SocketSink>,
}

impl ClientSession {
    pub fn new(id: String, sink: SocketSink) -> Arc<Self> {
        Arc::new(Self {
            id,
            sink: Mutex::new(sink),
        })
    }

    /// Serializes `value` and sends it as a text frame. Send errors are
    /// reported to the caller rather than swallowed, since they're what
    /// feeds the failed-peer cleanup loop (spec.md §5).
    pub async fn send_json(&self, value: &impl serde::Serialize) -> Result<(), axum::Error> {
        let text = serde_json::to_string(value).expect("DTOs are always serializable");
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await
    }

    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}
