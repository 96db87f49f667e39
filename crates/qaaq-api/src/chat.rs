use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use qaaq_db::models::ConnectionRow;
use qaaq_types::api::{Claims, ConnectionSummary, CreateConnectionRequest, SendMessageRequest};
use qaaq_types::events::GatewayEvent;
use qaaq_types::models::{ChatConnection, ChatMessage, ConnectionStatus};

use crate::convert;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub const MAX_MESSAGE_CHARS: usize = 4000;

pub async fn list_connections(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConnectionSummary>>, ApiError> {
    let uid = claims.sub.to_string();
    let rows = db_call(&state, move |db| {
        let mut out = Vec::new();
        for conn in db.list_connections(&uid)? {
            let Some(peer) = db.get_user_by_id(conn.peer_of(&uid))? else {
                continue;
            };
            let last = db.last_message(&conn.id)?;
            let unread = db.unread_count(&conn.id, &uid)?;
            out.push((conn, peer, last, unread));
        }
        Ok(out)
    })
    .await?;

    let summaries = rows
        .into_iter()
        .map(|(conn, peer, last, unread_count)| ConnectionSummary {
            connection: convert::connection(conn),
            peer: convert::public_profile(peer),
            last_message: last.map(convert::message),
            unread_count,
        })
        .collect();
    Ok(Json(summaries))
}

/// Ask another user to chat. An existing connection between the pair is
/// returned as is, whoever started it.
pub async fn create_connection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.receiver_id == claims.sub {
        return Err(ApiError::bad_request("Cannot start a chat with yourself"));
    }

    let sender_id = claims.sub.to_string();
    let receiver_id = req.receiver_id.to_string();
    let (row, sender, created) = db_call(&state, move |db| {
        if db.get_user_by_id(&receiver_id)?.is_none() {
            return Ok(None);
        }
        let (row, created) = db.create_connection(&Uuid::new_v4().to_string(), &sender_id, &receiver_id)?;
        if !created {
            return Ok(Some((row, None, false)));
        }
        let sender = db.get_user_by_id(&sender_id)?;
        Ok(Some((row, sender, true)))
    })
    .await?
    .ok_or(ApiError::NotFound("User"))?;

    let connection = convert::connection(row);
    if !created {
        return Ok((StatusCode::OK, Json(connection)));
    }

    info!("{} ({}) requested a chat with {}", claims.name, claims.sub, req.receiver_id);
    if let Some(sender) = sender {
        state
            .dispatcher
            .send_to_user(
                req.receiver_id,
                GatewayEvent::ConnectionRequest {
                    connection: connection.clone(),
                    from: convert::public_profile(sender),
                },
            )
            .await;
    }

    Ok((StatusCode::CREATED, Json(connection)))
}

pub async fn accept_connection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<ChatConnection>, ApiError> {
    respond(state, claims, connection_id, ConnectionStatus::Accepted).await
}

pub async fn reject_connection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<ChatConnection>, ApiError> {
    respond(state, claims, connection_id, ConnectionStatus::Rejected).await
}

/// Only the receiver of a pending request may answer it.
async fn respond(
    state: AppState,
    claims: Claims,
    connection_id: Uuid,
    status: ConnectionStatus,
) -> Result<Json<ChatConnection>, ApiError> {
    let conn = load_connection(&state, connection_id, claims.sub).await?;
    if conn.receiver_id != claims.sub.to_string() {
        return Err(ApiError::forbidden("Only the invited user can answer a chat request"));
    }
    if conn.status != ConnectionStatus::Pending.as_str() {
        return Err(ApiError::Conflict(format!("Connection is already {}", conn.status)));
    }

    let cid = conn.id.clone();
    let updated = db_call(&state, move |db| db.set_connection_status(&cid, status.as_str()))
        .await?
        .ok_or(ApiError::NotFound("Connection"))?;

    let connection = convert::connection(updated);
    state
        .dispatcher
        .send_to_user(connection.sender_id, GatewayEvent::ConnectionUpdate { connection: connection.clone() })
        .await;

    info!("{} ({}) {} connection {}", claims.name, claims.sub, status.as_str(), connection_id);
    Ok(Json(connection))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Page backwards: messages older than this `created_at`.
    pub before: Option<String>,
    /// Poll forwards: messages newer than this `created_at`.
    pub after: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let conn = load_connection(&state, connection_id, claims.sub).await?;

    let before = parse_cursor(query.before.as_deref())?;
    let after = parse_cursor(query.after.as_deref())?;
    let limit = query.limit.clamp(1, 200);

    let rows = db_call(&state, move |db| {
        db.get_messages(&conn.id, limit, before.as_deref(), after.as_deref())
    })
    .await?;
    Ok(Json(rows.into_iter().map(convert::message).collect()))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::bad_request(format!(
            "Message must be 1 to {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let conn = load_connection(&state, connection_id, claims.sub).await?;
    if conn.status == ConnectionStatus::Rejected.as_str() {
        return Err(ApiError::forbidden("This chat request was declined"));
    }

    let uid = claims.sub.to_string();
    let peer_id = convert::uuid(conn.peer_of(&uid));
    let cid = conn.id.clone();
    let row = db_call(&state, move |db| {
        db.insert_message(&Uuid::new_v4().to_string(), &cid, &uid, &content)
    })
    .await?;

    let message = convert::message(row);
    let delivered = state
        .dispatcher
        .send_to_user(peer_id, GatewayEvent::MessageCreate { message: message.clone() })
        .await;
    if !delivered {
        debug!("{} is offline; message {} waits for the next poll", peer_id, message.id);
    }

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = load_connection(&state, connection_id, claims.sub).await?;

    let uid = claims.sub.to_string();
    let peer_id = convert::uuid(conn.peer_of(&uid));
    let cid = conn.id.clone();
    let updated = db_call(&state, move |db| db.mark_messages_read(&cid, &uid)).await?;

    if updated > 0 {
        state
            .dispatcher
            .send_to_user(peer_id, GatewayEvent::MessagesRead { connection_id, reader_id: claims.sub })
            .await;
    }

    Ok(Json(json!({ "updated": updated })))
}

/// Fetch a connection the caller takes part in.
async fn load_connection(state: &AppState, connection_id: Uuid, user_id: Uuid) -> Result<ConnectionRow, ApiError> {
    let cid = connection_id.to_string();
    let conn = db_call(state, move |db| db.get_connection(&cid))
        .await?
        .ok_or(ApiError::NotFound("Connection"))?;
    if !conn.involves(&user_id.to_string()) {
        return Err(ApiError::forbidden("Not a participant in this chat"));
    }
    Ok(conn)
}

fn parse_cursor(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    raw.map(|r| convert::cursor(r).ok_or_else(|| ApiError::bad_request("Invalid timestamp cursor")))
        .transpose()
}
