use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use qaaq_types::api::Claims;
use qaaq_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat and handshake limits for one socket.
#[derive(Debug, Clone, Copy)]
struct Timings {
    /// The server pings this often; the client must answer with a Pong.
    heartbeat: Duration,
    /// Unanswered pings before the socket is dropped.
    max_missed_pongs: u8,
    /// How long an unauthenticated socket may wait before sending Identify.
    identify: Duration,
}

const TIMINGS: Timings = Timings {
    heartbeat: Duration::from_secs(15),
    max_missed_pongs: 2,
    identify: Duration::from_secs(10),
};

/// Serve a socket whose token was checked at upgrade time.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    user_id: Uuid,
    full_name: String,
) {
    let (sender, receiver) = socket.split();
    info!("{} ({}) joined the gateway with an upgrade token", full_name, user_id);
    run_session(sender, receiver, dispatcher, user_id, full_name, TIMINGS).await;
}

/// Serve a socket that must authenticate with an Identify command first.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    serve_identify(socket, dispatcher, jwt_secret, TIMINGS).await;
}

async fn serve_identify(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String, timings: Timings) {
    let (sender, mut receiver) = socket.split();

    let Some((user_id, full_name)) = wait_for_identify(&mut receiver, &jwt_secret, timings.identify).await else {
        warn!("Gateway client sent no valid Identify within {:?}, closing", timings.identify);
        return;
    };

    info!("{} ({}) joined the gateway", full_name, user_id);
    run_session(sender, receiver, dispatcher, user_id, full_name, timings).await;
}

/// Ready, the current presence list, then one loop relaying events out and
/// commands in until the socket closes, the heartbeat fails or a newer
/// connection for the same user takes over.
async fn run_session(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    full_name: String,
    timings: Timings,
) {
    if !send_event(&mut sender, &GatewayEvent::Ready { user_id, full_name: full_name.clone() }).await {
        return;
    }

    for (uid, name) in dispatcher.online_users().await {
        if uid == user_id {
            continue;
        }
        let event = GatewayEvent::PresenceUpdate { user_id: uid, full_name: name, online: true };
        if !send_event(&mut sender, &event).await {
            return;
        }
    }

    let mut presence_rx = dispatcher.subscribe_presence();
    let (conn_id, mut user_rx) = dispatcher.connect(user_id, full_name.clone()).await;

    let mut heartbeat = tokio::time::interval(timings.heartbeat);
    heartbeat.tick().await;
    let mut missed_pongs: u8 = 0;

    let reason = loop {
        tokio::select! {
            result = presence_rx.recv() => match result {
                Ok(event) => {
                    if !send_event(&mut sender, &event).await {
                        break "send failed";
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("{} ({}) missed {} presence updates", full_name, user_id, n),
                Err(RecvError::Closed) => break "dispatcher closed",
            },
            event = user_rx.recv() => {
                let Some(event) = event else { break "superseded by a newer connection" };
                if !send_event(&mut sender, &event).await {
                    break "send failed";
                }
            }
            _ = heartbeat.tick() => {
                if missed_pongs >= timings.max_missed_pongs {
                    break "heartbeat timeout";
                }
                missed_pongs += 1;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "send failed";
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher, user_id, &full_name, cmd).await,
                    Err(e) => warn!(
                        "{} ({}) bad command: {} (raw: {})",
                        full_name,
                        user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    ),
                },
                Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break "client closed",
                Some(Ok(_)) => {}
            },
        }
    };

    dispatcher.disconnect(user_id, conn_id).await;
    info!("{} ({}) left the gateway: {}", full_name, user_id, reason);
}

/// Decode a gateway token; `None` for a bad signature or an expired token.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
    limit: Duration,
) -> Option<(Uuid, String)> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            match serde_json::from_str::<GatewayCommand>(&text) {
                // A bad token ends the handshake; there is no second try
                Ok(GatewayCommand::Identify { token }) => {
                    return verify_token(&token, jwt_secret).map(|claims| (claims.sub, claims.name));
                }
                _ => debug!("Ignoring gateway frame sent before Identify"),
            }
        }
        None
    };

    tokio::time::timeout(limit, identify).await.ok().flatten()
}

async fn handle_command(dispatcher: &Dispatcher, user_id: Uuid, full_name: &str, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::StartTyping { connection_id, recipient_id } => {
            let event = GatewayEvent::TypingStart { connection_id, user_id, full_name: full_name.to_string() };
            if !dispatcher.send_to_user(recipient_id, event).await {
                debug!("{} ({}) typing to offline user {}", full_name, user_id, recipient_id);
            }
        }
    }
}

/// Serialize and send one event. Returns false when the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
