//! In-process mock relays for tests.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use crate::event::Event;
use crate::keys::Keys;

pub type ServerSocket = WebSocketStream<TcpStream>;

pub const TEST_NSEC: &str = "nsec1qyqszqgpqyqszqgpqyqszqgpqyqszqgpqyqszqgpqyqszqgpqyqstywftw";

pub fn test_keys() -> Keys {
    Keys::parse(TEST_NSEC).unwrap()
}

/// Accept connections forever, running `handler` on each WebSocket.
pub async fn spawn_relay<F, Fut>(handler: F) -> String
where
    F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                tokio::spawn(handler(ws));
            }
        }
    });
    format!("ws://{addr}")
}

/// Relay that answers every `EVENT` with `["OK", id, accepted, message]`.
pub async fn spawn_ack_relay(accepted: bool, message: &'static str) -> String {
    spawn_relay(move |mut ws| async move {
        while let Some(Ok(Message::Text(txt))) = ws.next().await {
            let val: Value = serde_json::from_str(&txt).unwrap();
            if val[0] == "EVENT" {
                let id = val[1]["id"].as_str().unwrap_or_default().to_string();
                let ok = serde_json::json!(["OK", id, accepted, message]);
                if ws.send(Message::Text(ok.to_string())).await.is_err() {
                    break;
                }
            }
        }
    })
    .await
}

/// Relay that reads frames but never answers.
pub async fn spawn_silent_relay() -> String {
    spawn_relay(|mut ws| async move { while ws.next().await.is_some() {} }).await
}

/// Relay that answers each `REQ` with `events` followed by `EOSE`, then keeps
/// the connection open until the client closes it.
pub async fn spawn_stored_relay(events: Vec<Event>) -> String {
    spawn_relay(move |mut ws| {
        let events = events.clone();
        async move {
            while let Some(Ok(Message::Text(txt))) = ws.next().await {
                let val: Value = serde_json::from_str(&txt).unwrap();
                if val[0] == "REQ" {
                    let sub = val[1].as_str().unwrap().to_string();
                    for ev in &events {
                        let frame = serde_json::json!(["EVENT", sub, ev]);
                        let _ = ws.send(Message::Text(frame.to_string())).await;
                    }
                    let eose = serde_json::json!(["EOSE", sub]);
                    let _ = ws.send(Message::Text(eose.to_string())).await;
                }
            }
        }
    })
    .await
}
