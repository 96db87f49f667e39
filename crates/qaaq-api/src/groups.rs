use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use qaaq_types::api::{Claims, CpssJoinRequest};
use qaaq_types::models::{CpssLevel, Group, GroupKind, GroupMember};

use crate::convert;
use crate::error::ApiError;
use crate::rank::normalize_rank;
use crate::state::{AppState, db_call};

const MAX_PLACE_NAME_CHARS: usize = 80;

#[derive(Debug, Deserialize)]
pub struct GroupListQuery {
    #[serde(default = "default_kind")]
    pub kind: GroupKind,
    /// Children of this CPSS node; omitted means top level.
    pub parent_id: Option<Uuid>,
}

fn default_kind() -> GroupKind {
    GroupKind::Rank
}

pub async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<GroupListQuery>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let kind = query.kind.as_str();
    let parent = query.parent_id.map(|p| p.to_string());
    let rows = db_call(&state, move |db| db.list_groups(kind, parent.as_deref())).await?;
    Ok(Json(rows.into_iter().map(convert::group).collect()))
}

pub async fn my_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let uid = claims.sub.to_string();
    let rows = db_call(&state, move |db| db.groups_for_user(&uid)).await?;
    Ok(Json(rows.into_iter().map(convert::group).collect()))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Group>, ApiError> {
    let gid = group_id.to_string();
    let row = db_call(&state, move |db| db.get_group(&gid))
        .await?
        .ok_or(ApiError::NotFound("Group"))?;
    Ok(Json(convert::group(row)))
}

pub async fn join_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let gid = group_id.to_string();
    let uid = claims.sub.to_string();
    let joined = db_call(&state, move |db| {
        if db.get_group(&gid)?.is_none() {
            return Ok(None);
        }
        db.join_group(&gid, &uid).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("Group"))?;

    if joined {
        info!("{} ({}) joined group {}", claims.name, claims.sub, group_id);
    }
    Ok(Json(json!({ "joined": joined })))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let gid = group_id.to_string();
    let uid = claims.sub.to_string();
    let left = db_call(&state, move |db| db.leave_group(&gid, &uid)).await?;
    Ok(Json(json!({ "left": left })))
}

#[derive(Debug, Deserialize)]
pub struct MembersQuery {
    #[serde(default = "default_member_limit")]
    pub limit: u32,
}

fn default_member_limit() -> u32 {
    100
}

pub async fn group_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<MembersQuery>,
) -> Result<Json<Vec<GroupMember>>, ApiError> {
    let gid = group_id.to_string();
    let limit = query.limit.clamp(1, 500);
    let rows = db_call(&state, move |db| {
        if db.get_group(&gid)?.is_none() {
            return Ok(None);
        }
        db.group_members(&gid, limit).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("Group"))?;
    Ok(Json(rows.into_iter().map(convert::member).collect()))
}

/// Join the rank group matching the caller's profile rank.
pub async fn auto_join_rank(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Group>, ApiError> {
    let uid = claims.sub.to_string();
    let user = db_call(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    let raw_rank = user
        .rank
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Set a rank on your profile first"))?;
    let rank_key = normalize_rank(raw_rank)
        .ok_or_else(|| ApiError::bad_request(format!("Unrecognised rank: {}", raw_rank)))?;

    let uid = user.id.clone();
    let group = db_call(&state, move |db| {
        let Some(group) = db.get_group_by_rank_key(rank_key)? else {
            return Ok(None);
        };
        db.join_group(&group.id, &uid)?;
        db.get_group(&group.id)
    })
    .await?
    .ok_or(ApiError::NotFound("Rank group"))?;

    info!("{} ({}) auto-joined rank group {}", claims.name, claims.sub, rank_key);
    Ok(Json(convert::group(group)))
}

/// Join a Country > Port > Suburb > Service community, creating any
/// missing level. Returns the whole path, top level first.
pub async fn join_cpss(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CpssJoinRequest>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let levels = cpss_levels(&req)?;

    let uid = claims.sub.to_string();
    let path = db_call(&state, move |db| {
        let refs: Vec<(&str, &str)> = levels.iter().map(|(l, n)| (l.as_str(), n.as_str())).collect();
        let path = db.ensure_cpss_path(&refs)?;
        if let Some(deepest) = path.last() {
            db.join_group(&deepest.id, &uid)?;
        }
        // Re-read so member counts include the new member
        let mut fresh = Vec::with_capacity(path.len());
        for node in &path {
            fresh.push(db.get_group(&node.id)?.unwrap_or_else(|| node.clone()));
        }
        Ok(fresh)
    })
    .await?;

    if let Some(deepest) = path.last() {
        info!("{} ({}) joined CPSS group {}", claims.name, claims.sub, deepest.path_key);
    }
    Ok(Json(path.into_iter().map(convert::group).collect()))
}

/// Validate a CPSS request into `(level, name)` pairs. Levels cannot skip:
/// a suburb needs a port, a service needs a suburb.
pub fn cpss_levels(req: &CpssJoinRequest) -> Result<Vec<(CpssLevel, String)>, ApiError> {
    let given = [
        (CpssLevel::Country, Some(req.country.as_str())),
        (CpssLevel::Port, req.port.as_deref()),
        (CpssLevel::Suburb, req.suburb.as_deref()),
        (CpssLevel::Service, req.service.as_deref()),
    ];

    let mut levels = Vec::new();
    let mut ended = false;
    for (level, name) in given {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        match name {
            Some(_) if ended => {
                return Err(ApiError::bad_request(format!(
                    "{} given without the level above it",
                    level.as_str()
                )));
            }
            Some(name) if name.chars().count() > MAX_PLACE_NAME_CHARS => {
                return Err(ApiError::bad_request(format!("{} name is too long", level.as_str())));
            }
            Some(name) => levels.push((level, name.to_string())),
            None => ended = true,
        }
    }

    if levels.is_empty() {
        return Err(ApiError::bad_request("country is required"));
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(country: &str, port: Option<&str>, suburb: Option<&str>, service: Option<&str>) -> CpssJoinRequest {
        CpssJoinRequest {
            country: country.into(),
            port: port.map(Into::into),
            suburb: suburb.map(Into::into),
            service: service.map(Into::into),
        }
    }

    #[test]
    fn full_path_is_accepted() {
        let levels = cpss_levels(&req("India", Some(" Mumbai "), Some("Colaba"), Some("Ship Chandlers"))).unwrap();
        let names: Vec<_> = levels.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["India", "Mumbai", "Colaba", "Ship Chandlers"]);
        assert_eq!(levels[3].0, CpssLevel::Service);
    }

    #[test]
    fn gaps_and_blanks_are_rejected() {
        assert!(cpss_levels(&req("", None, None, None)).is_err());
        assert!(cpss_levels(&req("India", None, Some("Colaba"), None)).is_err());
        assert!(cpss_levels(&req("India", Some("  "), None, Some("Bunkering"))).is_err());
        assert_eq!(cpss_levels(&req("India", Some("Kochi"), None, None)).unwrap().len(), 2);
    }
}
