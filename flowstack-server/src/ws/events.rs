//! Fan-out of backup/restore progress events to connected observers.
//!
//! Delivery is fire-and-forget: events are serialized once, pushed through a
//! broadcast channel, and dropped when nobody is listening. There is no
//! buffering beyond the channel capacity and no replay for late subscribers.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Send an event to every connected observer. Errors only mean nobody is
    /// subscribed and are ignored.
    pub fn broadcast(&self, event: Value) {
        let _ = self.tx.send(event.to_string());
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Observers only listen; drain incoming frames until the socket closes.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();

        events.broadcast(json!({ "type": "backup", "status": "started" }));

        let received = rx.recv().await.unwrap();
        let parsed: Value = serde_json::from_str(&received).unwrap();
        assert_eq!(parsed["type"], "backup");
        assert_eq!(parsed["status"], "started");
    }

    #[tokio::test]
    async fn test_broadcast_without_observers_is_silent() {
        let events = EventBroadcaster::new();
        // No subscriber; must not panic or error.
        events.broadcast(json!({ "type": "restore", "status": "completed" }));
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_every_event() {
        let events = EventBroadcaster::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        events.broadcast(json!({ "step": "one" }));
        events.broadcast(json!({ "step": "two" }));

        assert_eq!(a.recv().await.unwrap(), r#"{"step":"one"}"#);
        assert_eq!(a.recv().await.unwrap(), r#"{"step":"two"}"#);
        assert_eq!(b.recv().await.unwrap(), r#"{"step":"one"}"#);
    }
}
