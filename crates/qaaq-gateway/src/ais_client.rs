use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use qaaq_types::ais::{AisClientMessage, AisFrame};
use qaaq_types::geo::BoundingBox;

use crate::ais_relay::AisRelay;

/// Serve one map client: status, then a snapshot, then live updates inside
/// the client's bounding box until it disconnects.
pub async fn handle_ais_client(socket: WebSocket, relay: AisRelay, mut bounds: Option<BoundingBox>) {
    let (mut sender, mut receiver) = socket.split();
    let mut frames = relay.subscribe();

    info!("AIS client connected (bounds: {:?})", bounds);

    if !send_frame(&mut sender, &relay.status_frame()).await {
        return;
    }
    if !send_snapshot(&mut sender, &relay, bounds.as_ref()).await {
        return;
    }

    loop {
        tokio::select! {
            result = frames.recv() => {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(RecvError::Lagged(n)) => {
                        warn!("AIS client lagged, skipped {} frames", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !should_forward(&frame, bounds.as_ref()) {
                    continue;
                }
                if !send_frame(&mut sender, &frame).await {
                    break;
                }
            }
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<AisClientMessage>(&text) {
                        Ok(AisClientMessage::SetBounds { bounds: requested }) => {
                            if !requested.is_valid() {
                                debug!("Ignoring invalid AIS bounds {:?}", requested);
                                continue;
                            }
                            bounds = Some(requested);
                            if !send_snapshot(&mut sender, &relay, bounds.as_ref()).await {
                                break;
                            }
                        }
                        Ok(AisClientMessage::ClearBounds) => {
                            bounds = None;
                            if !send_snapshot(&mut sender, &relay, None).await {
                                break;
                            }
                        }
                        Err(e) => debug!("Bad AIS client message: {}", e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    info!("AIS client disconnected");
}

/// Ship updates honour the client's box; everything else always goes out.
pub fn should_forward(frame: &AisFrame, bounds: Option<&BoundingBox>) -> bool {
    match (frame, bounds) {
        (AisFrame::ShipUpdate { ship }, Some(b)) => b.contains(ship.latitude, ship.longitude),
        _ => true,
    }
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    relay: &AisRelay,
    bounds: Option<&BoundingBox>,
) -> bool {
    let ships = relay.snapshot(bounds).await;
    send_frame(sender, &AisFrame::Snapshot { ships }).await
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &AisFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize AIS frame: {}", e);
            true
        }
    }
}
