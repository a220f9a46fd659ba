//! WebSocket sessions of the test generator.
//!
//! Each accepted socket is one session: inbound frames are session commands,
//! outbound frames are the JSON events the scheduler emits for that session.

use crate::http::AppState;
use crate::simulation::SimulationScheduler;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// WebSocket upgrade handler: `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    let scheduler = app.scheduler.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, scheduler))
}

async fn handle_socket(socket: WebSocket, scheduler: SimulationScheduler) {
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = scheduler.open_session(events_tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize session event");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break; // client parti
            }
        }
    });

    let commands = scheduler.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => commands.handle_text(session, text.as_str()),
                Ok(Message::Binary(bytes)) => commands.handle_text(session, &String::from_utf8_lossy(&bytes)),
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong
                Err(e) => {
                    debug!(%session, error = %e, "websocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    scheduler.close_session(session);
}
