// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Client Hub (C5, spec.md §4.5): the WebSocket-facing half of the
//! bridge. Accepts connections, parses inbound JSON commands, and owns each
//! client's outbound queue and liveness bookkeeping.
//!
//! Grounded on donor's `transport/ws.rs` connection handler: one
//! reader loop and one writer loop per connection, torn down together via a
//! shared `CancellationToken`, generalized here from a single upstream
//! relay to dispatching against the shared [`Core`].

pub mod client;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::core::Core;
use crate::error::ErrorEnvelope;
use crate::hub::client::{ClientSession, CloseReason};
use crate::hub::protocol::{parse_command, InboundCommand, OutboundMessage};
use crate::subscription::StreamKind;

const CLOSE_CODE_SLOW_CONSUMER: u16 = 1011;

/// Build the client-facing WebSocket router. A bare axum `Router`: the
/// static-file/health/statistics HTTP surface is an external collaborator
/// and is not built here.
pub fn router(core: Arc<Core>) -> Router {
    Router::new().route("/ws", get(ws_handler)).layer(CorsLayer::permissive()).with_state(core)
}

async fn ws_handler(State(core): State<Arc<Core>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(core.config.max_ws_message_bytes).on_upgrade(move |socket| handle_ws(socket, core))
}

/// Map the upstream session's phase onto the client-facing status enum for
/// the greeting `connection_status` a newly-connected client receives.
fn upstream_status(core: &Core) -> crate::hub::protocol::ConnectionStatusValue {
    use crate::hub::protocol::ConnectionStatusValue;
    use crate::upstream::SessionPhase;
    match core.upstream.status().phase {
        SessionPhase::Ready => ConnectionStatusValue::Connected,
        SessionPhase::Connecting | SessionPhase::Handshaking => ConnectionStatusValue::Connecting,
        SessionPhase::Disconnected | SessionPhase::Reconnecting | SessionPhase::Failed => {
            ConnectionStatusValue::Disconnected
        }
    }
}

async fn handle_ws(socket: WebSocket, core: Arc<Core>) {
    let session = core.clients.register(core.config.client_queue_capacity);
    debug!(client_id = session.client_id, "client connected");
    session.send(OutboundMessage::ConnectionStatus { status: upstream_status(&core), next_order_id: None });

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(run_writer(
        ws_tx,
        Arc::clone(&session),
        core.config.client_ping_interval(),
        core.config.client_max_missed_pongs,
    ));

    run_reader(ws_rx, Arc::clone(&session), Arc::clone(&core)).await;

    session.cancel.cancel();
    let _ = writer.await;
    core.client_disconnected(session.client_id).await;
    debug!(client_id = session.client_id, "client disconnected");
}

/// Drain the client's outbound queue onto the socket and send a liveness
/// ping on a fixed interval, until cancelled or the queue closes. After
/// `max_missed_pongs` unanswered pings in a row the session is cancelled.
/// Sends the close frame matching the reason recorded on the session.
async fn run_writer(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    session: Arc<ClientSession>,
    ping_interval: Duration,
    max_missed_pongs: u32,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if session.record_missed_pong() > max_missed_pongs {
                    warn!(client_id = session.client_id, "client missed too many pongs, disconnecting");
                    session.cancel.cancel();
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            message = session.queue.pop() => {
                match message {
                    Some(message) => {
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(error = %err, "failed to serialize outbound message, dropped");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(CloseReason::SlowConsumer) = session.close_reason() {
        let frame = CloseFrame { code: CLOSE_CODE_SLOW_CONSUMER, reason: "slow_consumer".into() };
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_tx.close().await;
}

/// Read inbound frames, dispatching parsed commands to [`Core`] and echoing
/// any [`crate::error::CommandError`] back as an `error` message. Returns
/// once the socket closes, errors, or the session is cancelled.
async fn run_reader(
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    session: Arc<ClientSession>,
    core: Arc<Core>,
) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_command(&core, &session, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => session.touch_pong(),
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(client_id = session.client_id, error = %err, "websocket read error");
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch_command(core: &Core, session: &ClientSession, text: &str) {
    let client_id = session.client_id;
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(err) => {
            session.send(OutboundMessage::error(ErrorEnvelope::from_command(&err)));
            return;
        }
    };

    let result: Result<(), ErrorEnvelope> = match command {
        InboundCommand::SubscribeMarketData(raw) => {
            core.subscribe(client_id, raw, StreamKind::Level1).await.map_err(|err| ErrorEnvelope::from_command(&err))
        }
        InboundCommand::SubscribeTimeAndSales(raw) => {
            core.subscribe(client_id, raw, StreamKind::Trades).await.map_err(|err| ErrorEnvelope::from_command(&err))
        }
        InboundCommand::SubscribeBidAsk(raw) => {
            core.subscribe(client_id, raw, StreamKind::Quotes).await.map_err(|err| ErrorEnvelope::from_command(&err))
        }
        InboundCommand::UnsubscribeMarketData { symbol } => {
            core.unsubscribe_symbol(client_id, &symbol).await;
            Ok(())
        }
        InboundCommand::PlaceOrder(fields) => core
            .place_order(client_id, fields)
            .await
            .map(|_order_id| ())
            .map_err(|err| ErrorEnvelope::from_command(&err)),
        InboundCommand::CancelOrder { order_id } => core
            .cancel_order(client_id, order_id)
            .await
            .map_err(|err| ErrorEnvelope::from_command(&err).with_order_id(order_id)),
        InboundCommand::GetContractDetails(raw) => {
            core.get_contract_details(client_id, raw).await.map_err(|err| ErrorEnvelope::from_command(&err))
        }
    };

    if let Err(envelope) = result {
        session.send(OutboundMessage::error(envelope));
    }
}
