use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use qaaq_db::models::ProfileUpdate;
use qaaq_types::api::{Claims, UpdateLocationRequest, UpdateProfileRequest};
use qaaq_types::geo::{EARTH_RADIUS_KM, haversine_km, valid_coordinates};
use qaaq_types::models::{NearbyUser, UserProfile, UserType};

use crate::auth::{clean_optional, normalize_email, normalize_phone, validate_full_name};
use crate::convert;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub const DEFAULT_RADIUS_KM: f64 = 50.0;
/// Half the planet's circumference; anything larger covers everyone.
pub const MAX_RADIUS_KM: f64 = 20_000.0;
const DEFAULT_NEARBY_LIMIT: usize = 100;
const MAX_NEARBY_LIMIT: usize = 500;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    let uid = claims.sub.to_string();
    let user = db_call(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(convert::user_profile(user)))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let update = ProfileUpdate {
        full_name: req.full_name.as_deref().map(validate_full_name).transpose()?,
        email: req.email.as_deref().map(normalize_email).transpose()?,
        whatsapp_number: req.whatsapp_number.as_deref().map(normalize_phone).transpose()?,
        user_type: req.user_type.map(|t| t.as_str().to_string()),
        rank: clean_optional(req.rank),
        ship_name: clean_optional(req.ship_name),
        imo_number: clean_optional(req.imo_number),
        port: clean_optional(req.port),
        city: clean_optional(req.city),
        country: clean_optional(req.country),
    };

    let uid = claims.sub.to_string();
    let user = db_call(&state, move |db| db.update_profile(&uid, &update))
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(convert::user_profile(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserProfile>, ApiError> {
    let uid = user_id.to_string();
    let user = db_call(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(convert::public_profile(user)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    20
}

pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let q = query.q.trim().to_string();
    if q.chars().count() < 2 {
        return Err(ApiError::bad_request("Search needs at least 2 characters"));
    }
    let limit = query.limit.clamp(1, 50);
    let uid = claims.sub.to_string();
    let users = db_call(&state, move |db| db.search_users(&uid, &q, limit)).await?;
    Ok(Json(users.into_iter().map(convert::public_profile).collect()))
}

pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationRequest>,
) -> Result<StatusCode, ApiError> {
    if !valid_coordinates(req.latitude, req.longitude) {
        return Err(ApiError::bad_request("Coordinates out of range"));
    }
    let uid = claims.sub.to_string();
    let source = req.source.as_str();
    db_call(&state, move |db| db.update_location(&uid, req.latitude, req.longitude, source)).await?;
    debug!("{} ({}) moved to {:.4},{:.4}", claims.name, claims.sub, req.latitude, req.longitude);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub user_type: Option<UserType>,
    pub limit: Option<usize>,
}

/// Users within `radius_km` of a point, nearest first. The point defaults
/// to the caller's last stored location.
pub async fn nearby_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyUser>>, ApiError> {
    let radius_km = query.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    if !(radius_km > 0.0 && radius_km <= MAX_RADIUS_KM) {
        return Err(ApiError::bad_request(format!("radius_km must be in (0, {}]", MAX_RADIUS_KM)));
    }
    let limit = query.limit.unwrap_or(DEFAULT_NEARBY_LIMIT).clamp(1, MAX_NEARBY_LIMIT);

    let uid = claims.sub.to_string();
    let (lat, lon) = match (query.lat, query.lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        (None, None) => {
            let me = db_call(&state, move |db| db.get_user_by_id(&uid))
                .await?
                .ok_or(ApiError::NotFound("User"))?;
            me.latitude
                .zip(me.longitude)
                .ok_or_else(|| ApiError::bad_request("No location given and none stored"))?
        }
        _ => return Err(ApiError::bad_request("lat and lon must be given together")),
    };
    if !valid_coordinates(lat, lon) {
        return Err(ApiError::bad_request("Coordinates out of range"));
    }

    let (min_lat, max_lat) = latitude_band(lat, radius_km);
    let uid = claims.sub.to_string();
    let user_type = query.user_type.map(|t| t.as_str());
    let candidates = db_call(&state, move |db| db.users_with_location(&uid, min_lat, max_lat, user_type)).await?;

    Ok(Json(rank_by_distance(candidates, lat, lon, radius_km, limit)))
}

/// Latitudes that can hold a point within `radius_km`; longitude is left to
/// the exact distance check so the band works across the antimeridian.
pub fn latitude_band(lat: f64, radius_km: f64) -> (f64, f64) {
    let delta = (radius_km / EARTH_RADIUS_KM).to_degrees();
    ((lat - delta).max(-90.0), (lat + delta).min(90.0))
}

fn rank_by_distance(
    candidates: Vec<qaaq_db::models::UserRow>,
    lat: f64,
    lon: f64,
    radius_km: f64,
    limit: usize,
) -> Vec<NearbyUser> {
    let mut nearby: Vec<NearbyUser> = candidates
        .into_iter()
        .filter_map(|row| {
            let distance_km = haversine_km(lat, lon, row.latitude?, row.longitude?);
            (distance_km <= radius_km).then(|| NearbyUser { profile: convert::public_profile(row), distance_km })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby.truncate(limit);
    nearby
}

#[cfg(test)]
mod tests {
    use super::*;
    use qaaq_db::models::UserRow;

    fn at(name: &str, latitude: f64, longitude: f64) -> UserRow {
        UserRow {
            id: Uuid::new_v4().to_string(),
            full_name: name.into(),
            email: Some(format!("{}@example.com", name)),
            whatsapp_number: None,
            password: None,
            liberal_login_used: false,
            user_type: "local".into(),
            rank: None,
            ship_name: None,
            imo_number: None,
            port: None,
            city: None,
            country: None,
            latitude: Some(latitude),
            longitude: Some(longitude),
            location_source: Some("device".into()),
            location_updated_at: None,
            is_verified: true,
            is_admin: false,
            created_at: "2025-01-01 00:00:00.000".into(),
            last_login_at: None,
        }
    }

    #[test]
    fn band_covers_radius() {
        let (lo, hi) = latitude_band(19.0, 111.195);
        assert!((hi - 20.0).abs() < 0.01);
        assert!((lo - 18.0).abs() < 0.01);
        assert_eq!(latitude_band(89.5, 500.0).1, 90.0);
    }

    #[test]
    fn nearest_first_within_radius() {
        // Mumbai port, a few km away, Pune (~120 km), Singapore
        let rows = vec![
            at("pune", 18.52, 73.86),
            at("colaba", 18.91, 72.81),
            at("singapore", 1.29, 103.85),
            at("dock", 18.95, 72.84),
        ];
        let nearby = rank_by_distance(rows, 18.94, 72.84, DEFAULT_RADIUS_KM, 10);
        let names: Vec<_> = nearby.iter().map(|n| n.profile.full_name.as_str()).collect();
        assert_eq!(names, vec!["dock", "colaba"]);
        assert!(nearby.iter().all(|n| n.profile.email.is_none()));
    }

    #[test]
    fn limit_truncates() {
        let rows = (0..5).map(|i| at(&format!("u{}", i), 10.0 + i as f64 * 0.01, 10.0)).collect();
        assert_eq!(rank_by_distance(rows, 10.0, 10.0, 100.0, 3).len(), 3);
    }
}
