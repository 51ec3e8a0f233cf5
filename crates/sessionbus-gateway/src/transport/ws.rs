//! WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS for `/v1/sessions/:session_id/ws`
//! - Join the session's server transport as one member
//! - Lifecycle: ping/pong + idle timeout
//! - Hand text/binary frames to the transport; answer JSON pings

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, Path, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use sessionbus_core::error::Result;
use sessionbus_core::protocol::control::ControlFrame;

use crate::app_state::AppState;
use crate::transport::codec::{decode, Frame};
use crate::transport::Connection;

pub async fn ws_upgrade(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run_connection(app, session_id.clone(), socket).await {
            tracing::warn!(session_id = %session_id, error = %e, "connection ended with error");
        }
    })
}

async fn run_connection(app: AppState, session_id: String, socket: WebSocket) -> Result<()> {
    let gw = &app.cfg().gateway;

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(gw.outbound_queue);
    let conn = Connection::new(out_tx.clone());
    let conn_id = conn.id();
    let session = app.sessions().join(&session_id, conn)?;
    tracing::info!(session_id = %session_id, conn_id = %conn_id, "member joined");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let idle_timeout = gw.idle_timeout();
    let mut ping_tick = tokio::time::interval(gw.ping_interval());
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(m) => {
                        if ws_tx.send(m).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break; };
                last_activity = Instant::now();

                match decode(msg) {
                    Frame::Payload(payload) => {
                        if let Some(ControlFrame::Ping { .. }) = session.transport.handle_message(payload).await {
                            match ControlFrame::pong().to_json() {
                                Ok(pong) => {
                                    let _ = out_tx.try_send(Message::Text(pong));
                                }
                                Err(e) => tracing::warn!(conn_id = %conn_id, error = %e, "pong encode failed"),
                            }
                        }
                    }
                    Frame::Ping(payload) => {
                        let _ = out_tx.try_send(Message::Pong(payload));
                    }
                    Frame::Pong => {}
                    Frame::Close => break,
                }
            }

            _ = ping_tick.tick() => {
                let _ = out_tx.try_send(Message::Ping(Vec::new()));
            }

            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if last_activity.elapsed() >= idle_timeout {
                    tracing::info!(session_id = %session_id, conn_id = %conn_id, "idle timeout");
                    break;
                }
            }
        }
    }

    session.transport.unsubscribe_websocket(conn_id);
    tracing::info!(session_id = %session_id, conn_id = %conn_id, "member left");
    drop(session);
    app.sessions().release_if_idle(&session_id).await;
    Ok(())
}
