// src/handlers/tracking_handler.rs
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::CurrentUser;
use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::events::{ClientMessage, RideEvent},
    services::tracking_service::{Connection, TrackingService},
    state::SharedState,
};

/// Ride socket: location fixes in, ride events out. Only the ride's rider and driver get in.
pub async fn ride_socket(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(ride_id): Path<String>,
) -> DispatchResult<Response> {
    let connection = state.tracking_service.connect_ride(&ride_id, &user).await?;
    let tracking = state.tracking_service.clone();
    Ok(ws.on_upgrade(move |socket| run_socket(socket, tracking, connection)))
}

/// Pool socket: new ride requests for online drivers.
pub async fn pool_socket(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> DispatchResult<Response> {
    let connection = state.tracking_service.connect_pool(&user).await?;
    let tracking = state.tracking_service.clone();
    Ok(ws.on_upgrade(move |socket| run_socket(socket, tracking, connection)))
}

async fn run_socket(socket: WebSocket, tracking: Arc<TrackingService>, connection: Connection) {
    let Connection { id, mut events } = connection;
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(32);

    let outbound_id = id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                event = events.recv() => match event {
                    Ok(payload) => payload,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Connection {} lagged, skipped {} events", outbound_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(payload) => payload,
                    None => break,
                },
            };
            if sender.send(Message::Text(outgoing)).await.is_err() {
                break;
            }
        }
    });

    let inbound = tracking.clone();
    let inbound_id = id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(reply) = handle_frame(&inbound, &inbound_id, &text).await {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait out the aborted half so its broadcast receiver is gone before cleanup
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    tracking.disconnect(&id).await;
}

/// Handles one client frame; returns an error frame for the sender when it was refused.
async fn handle_frame(tracking: &TrackingService, connection_id: &str, text: &str) -> Option<String> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => return error_frame(&AppError::InvalidFormat(e.to_string())),
    };

    match message {
        ClientMessage::LocationUpdate { lat, lng } => {
            match tracking.publish_location(connection_id, lat, lng).await {
                Ok(_) => None,
                // Spoofed or out-of-region fixes are refused but the socket stays open
                Err(e) => error_frame(&e),
            }
        }
    }
}

fn error_frame(error: &AppError) -> Option<String> {
    RideEvent::Error {
        code: error.code().to_string(),
        message: error.to_string(),
    }
    .to_json()
    .ok()
}
