use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use qaaq_types::api::{Claims, CreatePostRequest};
use qaaq_types::models::Post;

use crate::convert;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub const MAX_POST_CHARS: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Older than this `created_at`.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    30
}

/// Public feed: posts outside any group.
pub async fn list_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<Post>>, ApiError> {
    list(&state, None, claims.sub, query).await.map(Json)
}

pub async fn create_feed_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = create(&state, None, claims.sub, &req.content).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_group_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<Post>>, ApiError> {
    require_member(&state, group_id, claims.sub).await?;
    list(&state, Some(group_id), claims.sub, query).await.map(Json)
}

pub async fn create_group_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, group_id, claims.sub).await?;
    let post = create(&state, Some(group_id), claims.sub, &req.content).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// Like or unlike a post. Group posts need membership.
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pid = post_id.to_string();
    let uid = claims.sub.to_string();
    let post = db_call(&state, move |db| db.get_post(&pid, &uid))
        .await?
        .ok_or(ApiError::NotFound("Post"))?;

    if let Some(group_id) = post.group_id.as_deref() {
        require_member(&state, convert::uuid(group_id), claims.sub).await?;
    }

    let uid = claims.sub.to_string();
    let (liked, like_count) = db_call(&state, move |db| db.toggle_post_like(&post.id, &uid)).await?;
    Ok(Json(json!({ "liked": liked, "like_count": like_count })))
}

async fn list(state: &AppState, group_id: Option<Uuid>, viewer: Uuid, query: FeedQuery) -> Result<Vec<Post>, ApiError> {
    let before = query
        .before
        .as_deref()
        .map(|b| convert::cursor(b).ok_or_else(|| ApiError::bad_request("Invalid timestamp cursor")))
        .transpose()?;
    let limit = query.limit.clamp(1, 100);
    let gid = group_id.map(|g| g.to_string());
    let vid = viewer.to_string();

    let rows = db_call(state, move |db| db.list_posts(gid.as_deref(), &vid, limit, before.as_deref())).await?;
    Ok(rows.into_iter().map(convert::post).collect())
}

async fn create(state: &AppState, group_id: Option<Uuid>, author: Uuid, content: &str) -> Result<Post, ApiError> {
    let content = content.trim().to_string();
    if content.is_empty() || content.chars().count() > MAX_POST_CHARS {
        return Err(ApiError::bad_request(format!("Post must be 1 to {} characters", MAX_POST_CHARS)));
    }

    let gid = group_id.map(|g| g.to_string());
    let aid = author.to_string();
    let row = db_call(state, move |db| {
        db.create_post(&Uuid::new_v4().to_string(), gid.as_deref(), &aid, &content)
    })
    .await?;
    Ok(convert::post(row))
}

async fn require_member(state: &AppState, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
    let gid = group_id.to_string();
    let uid = user_id.to_string();
    let member = db_call(state, move |db| {
        if db.get_group(&gid)?.is_none() {
            return Ok(None);
        }
        db.is_member(&gid, &uid).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("Group"))?;

    if !member {
        return Err(ApiError::forbidden("Join the group to see and write its posts"));
    }
    Ok(())
}
