use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::RelayMetrics;
use crate::relay::{self, CloseReason};
use crate::server::AppState;

use super::message::{close_code, close_message, Outbound, RelayFrame};

/// How long an evicted connection's writer gets to deliver its close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_frame_bytes = state.settings.websocket.max_frame_bytes;

    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_failed_upgrade(|e| {
            // The handshake failed for this client only
            tracing::warn!(error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(connection_id = tracing::field::Empty, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.settings.websocket.channel_buffer_size);

    let handle = match relay::on_open(&state.connection_manager, tx) {
        Ok(h) => h,
        Err(e) => {
            let _ = ws_sender
                .send(close_message(close_code::AGAIN, e.to_string()))
                .await;
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Task for sending messages from channel to WebSocket
    let writer_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        return CloseReason::WriterFailed;
                    };
                    if ws_sender.send(msg.into()).await.is_err() {
                        return CloseReason::WriterFailed;
                    }
                }
                _ = writer_handle.closed() => {
                    let code = writer_handle.close_code().unwrap_or(close_code::AWAY);
                    let reason = match code {
                        close_code::AWAY => "server shutting down",
                        _ => "evicted by relay",
                    };
                    let _ = ws_sender.send(close_message(code, reason)).await;
                    let _ = ws_sender.close().await;
                    return if code == close_code::AWAY {
                        CloseReason::Shutdown
                    } else {
                        CloseReason::Evicted
                    };
                }
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if let ControlFlow::Break(reason) = process_message(msg, &state_clone, &handle_clone) {
                        return reason;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    return CloseReason::TransportError;
                }
            }
        }
        CloseReason::PeerClosed
    });

    // Wait for either task to complete
    let reason = tokio::select! {
        res = &mut send_task => {
            recv_task.abort();
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            res.unwrap_or(CloseReason::WriterFailed)
        }
        res = &mut recv_task => {
            let reason = res.unwrap_or(CloseReason::TransportError);
            if reason == CloseReason::Evicted {
                // The writer owes the client a close frame
                if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                    send_task.abort();
                }
            } else {
                send_task.abort();
            }
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            reason
        }
    };

    // No-op when the relay already evicted this connection
    relay::on_close(&state.connection_manager, connection_id, reason);
}

/// Process a received WebSocket message. Breaks with the reason the
/// connection should end.
fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> ControlFlow<CloseReason> {
    handle.update_activity();

    match msg {
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            ControlFlow::Break(CloseReason::PeerClosed)
        }
        // Axum answers pings itself; both only count as activity
        Message::Ping(_) | Message::Pong(_) => ControlFlow::Continue(()),
        data => {
            let Some(frame) = RelayFrame::from_message(data) else {
                return ControlFlow::Continue(());
            };
            RelayMetrics::record_received(frame.kind());

            if handle.is_closed() {
                // Removed from the registry while this frame was in flight
                return ControlFlow::Break(CloseReason::Evicted);
            }

            state.dispatcher.dispatch(handle.id, frame);
            ControlFlow::Continue(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn open(state: &AppState) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(4);
        (relay::on_open(&state.connection_manager, tx).unwrap(), rx)
    }

    #[test]
    fn test_data_frame_is_relayed() {
        let state = AppState::new(Settings::default());
        let (a, _ra) = open(&state);
        let (_b, mut rb) = open(&state);

        let flow = process_message(Message::Text("m".into()), &state, &a);
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(rb.try_recv().unwrap(), Outbound::Frame(RelayFrame::text("m")));
    }

    #[test]
    fn test_close_frame_ends_connection() {
        let state = AppState::new(Settings::default());
        let (a, _ra) = open(&state);

        let flow = process_message(Message::Close(None), &state, &a);
        assert_eq!(flow, ControlFlow::Break(CloseReason::PeerClosed));
        assert_eq!(
            process_message(Message::Ping(Default::default()), &state, &a),
            ControlFlow::Continue(())
        );
    }

    #[test]
    fn test_frame_from_evicted_connection_is_dropped() {
        let state = AppState::new(Settings::default());
        let (a, _ra) = open(&state);
        let (_b, mut rb) = open(&state);

        relay::evict(&state.connection_manager, a.id, CloseReason::IdleTimeout);

        // The reader hands over to the writer, which still owes the 1008 close
        let flow = process_message(Message::Text("late".into()), &state, &a);
        assert_eq!(flow, ControlFlow::Break(CloseReason::Evicted));
        assert!(rb.try_recv().is_err());
        assert_eq!(a.close_code(), Some(close_code::POLICY));
    }
}

