use std::sync::Arc;

use axum::extract::ws::{Message as Frame, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::channel::{InboundMessage, Message};
use crate::server::Server;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<Server>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, server))
}

pub async fn handle_socket(socket: WebSocket, server: Arc<Server>) {
    debug!("browser session connected");

    let (mut sink, mut stream) = socket.split();
    let mut outbound = server.broadcaster().subscribe();

    if let Ok(msg) = serde_json::to_string(&Message::Connected)
        && sink.send(Frame::Text(msg.into())).await.is_err()
    {
        return;
    }

    let mut forward = tokio::spawn(async move {
        loop {
            match outbound.recv().await {
                Ok(msg) => {
                    let Ok(json) = serde_json::to_string(&msg) else {
                        continue;
                    };
                    if sink.send(Frame::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("browser session lagged, {} messages skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let inbound = server.inbound().clone();
    let mut read = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                Frame::Text(text) => match serde_json::from_str::<InboundMessage>(text.as_str()) {
                    Ok(msg) => {
                        if inbound.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("ignoring malformed browser message: {}", e),
                },
                Frame::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut forward => read.abort(),
        _ = &mut read => forward.abort(),
    }

    debug!("browser session disconnected");
}
