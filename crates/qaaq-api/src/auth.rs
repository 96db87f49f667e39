use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use qaaq_db::models::{NewUser, OtpCheck, UserRow};
use qaaq_types::api::{
    AuthResponse, Claims, LoginRequest, MergeRequest, PasswordResetConfirm, PasswordResetRequest,
    RegisterRequest, SetPasswordRequest, VerifyOtpRequest,
};
use qaaq_types::models::UserProfile;

use crate::convert;
use crate::error::ApiError;
use crate::otp::{self, OTP_MAX_ATTEMPTS, OTP_TTL_MINUTES, PURPOSE_PASSWORD_RESET, PURPOSE_VERIFY};
use crate::rank::normalize_rank;
use crate::state::{AppState, db_call};

/// Shared starter password: accepted once for accounts imported without a
/// password, after which the user must choose their own.
pub const STARTER_PASSWORD: &str = "1234koihai";

pub const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_TTL_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let full_name = validate_full_name(&req.full_name)?;
    let email = req.email.as_deref().map(normalize_email).transpose()?;
    let whatsapp_number = req.whatsapp_number.as_deref().map(normalize_phone).transpose()?;
    if email.is_none() && whatsapp_number.is_none() {
        return Err(ApiError::bad_request("An email address or WhatsApp number is required"));
    }

    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    let user_id = Uuid::new_v4();
    let new_user = NewUser {
        id: user_id.to_string(),
        full_name,
        email,
        whatsapp_number,
        password_hash,
        user_type: req.user_type.as_str().to_string(),
        rank: clean_optional(req.rank),
        ship_name: clean_optional(req.ship_name),
        imo_number: clean_optional(req.imo_number),
        port: clean_optional(req.port),
        city: clean_optional(req.city),
        country: clean_optional(req.country),
    };

    let user = db_call(&state, move |db| {
        db.create_user(&new_user)?;
        // Rank groups are joined automatically when the rank is recognisable
        if let Some(key) = new_user.rank.as_deref().and_then(normalize_rank) {
            if let Some(group) = db.get_group_by_rank_key(key)? {
                db.join_group(&group.id, &new_user.id)?;
            }
        }
        db.get_user_by_id(&new_user.id)
    })
    .await?
    .ok_or(ApiError::NotFound("User"))?;

    info!("Registered user {} ({})", user.full_name, user.id);

    if let Err(e) = issue_code(&state, &user, PURPOSE_VERIFY).await {
        // The account exists; the user can ask for a new code
        warn!("Could not send verification code to {}: {:#}", user.id, e);
    }

    let requires_password_setup = user.password.is_none();
    let token = create_token(&state.jwt_secret, user_id, &user.full_name)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse { token, user: convert::user_profile(user), requires_password_setup }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identifier = normalize_identifier(&req.identifier);
    let lookup = identifier.clone();
    let mut users = db_call(&state, move |db| db.find_users_by_identifier(&lookup)).await?;

    match users.len() {
        0 => Err(ApiError::Unauthorized),
        1 => {
            let user = users.remove(0);
            sign_in(&state, user, &req.password).await.map(Json)
        }
        _ => {
            let holder = users
                .iter()
                .find(|u| holds_account(u, &req.password))
                .or_else(|| users.iter().find(|u| password_matches(u, &req.password)))
                .cloned();
            let Some(holder) = holder else {
                return Err(ApiError::Unauthorized);
            };
            // Only list accounts the caller could actually fold into this one
            let candidates: Vec<&UserRow> = users
                .iter()
                .filter(|u| u.id == holder.id || may_absorb(&holder, u, &identifier, &req.password))
                .collect();
            if candidates.len() == 1 {
                return sign_in(&state, holder, &req.password).await.map(Json);
            }
            Err(ApiError::MergeRequired(candidates.into_iter().map(convert::merge_candidate).collect()))
        }
    }
}

pub async fn merge_accounts(
    State(state): State<AppState>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identifier = normalize_identifier(&req.identifier);
    let lookup = identifier.clone();
    let users = db_call(&state, move |db| db.find_users_by_identifier(&lookup)).await?;

    let primary_id = req.primary_id.to_string();

    let mut duplicates: Vec<String> = req
        .duplicate_ids
        .iter()
        .map(Uuid::to_string)
        .filter(|id| *id != primary_id)
        .collect();
    duplicates.sort();
    duplicates.dedup();
    if duplicates.is_empty() {
        return Err(ApiError::bad_request("Nothing to merge"));
    }
    if let Some(stray) = duplicates.iter().find(|d| !users.iter().any(|u| &u.id == *d)) {
        return Err(ApiError::bad_request(format!("Account {} does not match this identifier", stray)));
    }

    let Some(primary) = users.iter().find(|u| u.id == primary_id) else {
        return Err(ApiError::bad_request("Primary account does not match this identifier"));
    };
    let authorised = holds_account(primary, &req.password)
        && users
            .iter()
            .filter(|u| duplicates.contains(&u.id))
            .all(|u| may_absorb(primary, u, &identifier, &req.password));
    if !authorised {
        warn!("Refused merge into {} for identifier {}", primary_id, identifier);
        return Err(ApiError::Unauthorized);
    }

    let merged_count = duplicates.len();
    let pid = primary_id.clone();
    let user = db_call(&state, move |db| {
        db.merge_users(&pid, &duplicates)?;
        db.touch_last_login(&pid)?;
        db.get_user_by_id(&pid)
    })
    .await?
    .ok_or(ApiError::NotFound("User"))?;

    info!("Merged {} duplicate account(s) into {}", merged_count, primary_id);

    let requires_password_setup = user.password.is_none();
    if requires_password_setup {
        let pid = primary_id.clone();
        db_call(&state, move |db| db.consume_liberal_login(&pid)).await?;
    }

    let token = create_token(&state.jwt_secret, req.primary_id, &user.full_name)?;
    Ok(Json(AuthResponse { token, user: convert::user_profile(user), requires_password_setup }))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let uid = claims.sub.to_string();
    let code_hash = otp::hash_code(&req.code);

    let user = db_call(&state, move |db| {
        let outcome = db.check_otp(&uid, PURPOSE_VERIFY, &code_hash, OTP_MAX_ATTEMPTS)?;
        if outcome == OtpCheck::Valid {
            db.mark_verified(&uid)?;
        }
        Ok((outcome, db.get_user_by_id(&uid)?))
    })
    .await
    .and_then(|(outcome, user)| otp_outcome(outcome).map(|_| user))?
    .ok_or(ApiError::NotFound("User"))?;

    Ok(Json(convert::user_profile(user)))
}

pub async fn resend_otp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let user = db_call(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    if user.is_verified {
        return Err(ApiError::Conflict("Account is already verified".into()));
    }

    let sent_to = issue_code(&state, &user, PURPOSE_VERIFY).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "sent_to": sent_to }))))
}

pub async fn set_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    validate_password(&req.password)?;
    if req.password == STARTER_PASSWORD {
        return Err(ApiError::bad_request("Choose a password of your own"));
    }
    let password_hash = hash_password(&req.password)?;

    let uid = claims.sub.to_string();
    db_call(&state, move |db| db.set_password(&uid, &password_hash)).await?;

    info!("{} ({}) set a new password", claims.name, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = resolve_single_user(&state, &req.identifier).await?;
    let sent_to = issue_code(&state, &user, PURPOSE_PASSWORD_RESET).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "sent_to": sent_to }))))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetConfirm>,
) -> Result<Json<AuthResponse>, ApiError> {
    validate_password(&req.new_password)?;
    let user = resolve_single_user(&state, &req.identifier).await?;
    let password_hash = hash_password(&req.new_password)?;
    let code_hash = otp::hash_code(&req.code);

    let uid = user.id.clone();
    let outcome = db_call(&state, move |db| {
        let outcome = db.check_otp(&uid, PURPOSE_PASSWORD_RESET, &code_hash, OTP_MAX_ATTEMPTS)?;
        if outcome == OtpCheck::Valid {
            db.set_password(&uid, &password_hash)?;
            db.touch_last_login(&uid)?;
        }
        Ok(outcome)
    })
    .await?;
    otp_outcome(outcome)?;

    info!("Password reset for {}", user.id);

    let user_id = convert::uuid(&user.id);
    let token = create_token(&state.jwt_secret, user_id, &user.full_name)?;
    Ok(Json(AuthResponse { token, user: convert::user_profile(user), requires_password_setup: false }))
}

/// Check the password and issue a token for a single matched account.
async fn sign_in(state: &AppState, user: UserRow, password: &str) -> Result<AuthResponse, ApiError> {
    let requires_password_setup = match user.password.as_deref() {
        Some(hash) => {
            if !verify_hash(hash, password) {
                return Err(ApiError::Unauthorized);
            }
            false
        }
        None => {
            if password != STARTER_PASSWORD {
                return Err(ApiError::Unauthorized);
            }
            let uid = user.id.clone();
            if !db_call(state, move |db| db.consume_liberal_login(&uid)).await? {
                return Err(ApiError::Unauthorized);
            }
            info!("{} ({}) used the starter password", user.full_name, user.id);
            true
        }
    };

    let uid = user.id.clone();
    db_call(state, move |db| db.touch_last_login(&uid)).await?;

    let user_id = convert::uuid(&user.id);
    let token = create_token(&state.jwt_secret, user_id, &user.full_name)?;
    Ok(AuthResponse { token, user: convert::user_profile(user), requires_password_setup })
}

/// Whether `password` would sign in to `user`, without burning the starter password.
fn password_matches(user: &UserRow, password: &str) -> bool {
    match user.password.as_deref() {
        Some(hash) => verify_hash(hash, password),
        None => password == STARTER_PASSWORD && !user.liberal_login_used,
    }
}

/// Whether `password` proves control of `user` strongly enough to merge
/// other accounts. The starter password counts only on a verified account.
fn holds_account(user: &UserRow, password: &str) -> bool {
    match user.password.as_deref() {
        Some(hash) => verify_hash(hash, password),
        None => user.is_verified && password == STARTER_PASSWORD && !user.liberal_login_used,
    }
}

/// Whether the holder of `primary` may fold `duplicate` into it: the same
/// password opens both, or both were verified through `identifier` itself.
fn may_absorb(primary: &UserRow, duplicate: &UserRow, identifier: &str, password: &str) -> bool {
    holds_account(duplicate, password) || (verified_on(primary, identifier) && verified_on(duplicate, identifier))
}

/// Codes go to the WhatsApp number when there is one, else to the email.
fn code_destination(user: &UserRow) -> Option<&str> {
    user.whatsapp_number.as_deref().or(user.email.as_deref())
}

fn verified_on(user: &UserRow, identifier: &str) -> bool {
    user.is_verified && code_destination(user) == Some(identifier)
}

async fn resolve_single_user(state: &AppState, identifier: &str) -> Result<UserRow, ApiError> {
    let identifier = normalize_identifier(identifier);
    let mut users = db_call(state, move |db| db.find_users_by_identifier(&identifier)).await?;
    match users.len() {
        0 => Err(ApiError::NotFound("Account")),
        1 => Ok(users.remove(0)),
        _ => Err(ApiError::Conflict(
            "Several accounts share this identifier; use the account id instead".into(),
        )),
    }
}

/// Store a fresh code for `user` and deliver it. Returns the masked destination.
async fn issue_code(state: &AppState, user: &UserRow, purpose: &'static str) -> Result<String, ApiError> {
    let destination = code_destination(user)
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Account has no contact details"))?;

    let code = otp::generate_code();
    let code_hash = otp::hash_code(&code);
    let uid = user.id.clone();
    db_call(state, move |db| {
        db.insert_otp(&Uuid::new_v4().to_string(), &uid, purpose, &code_hash, OTP_TTL_MINUTES)
    })
    .await?;

    state.otp.send(&destination, &code, purpose).await?;
    Ok(otp::mask_destination(&destination))
}

fn otp_outcome(outcome: OtpCheck) -> Result<(), ApiError> {
    match outcome {
        OtpCheck::Valid => Ok(()),
        OtpCheck::Invalid => Err(ApiError::bad_request("Incorrect code")),
        OtpCheck::Expired => Err(ApiError::bad_request("Code has expired; request a new one")),
        OtpCheck::NotFound => Err(ApiError::bad_request("No pending code; request a new one")),
        OtpCheck::TooManyAttempts => Err(ApiError::TooManyAttempts),
    }
}

pub fn create_token(secret: &str, user_id: Uuid, full_name: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        name: full_name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(token)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_hash(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            warn!("Unreadable password hash in database: {}", e);
            false
        }
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_full_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(2..=100).contains(&len) {
        return Err(ApiError::bad_request("Full name must be 2 to 100 characters"));
    }
    Ok(name.to_string())
}

pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if !valid {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    Ok(email)
}

/// International format: `+` followed by 8 to 15 digits.
pub fn normalize_phone(raw: &str) -> Result<String, ApiError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let only_phone_chars = raw.trim().chars().all(|c| c.is_ascii_digit() || "+ -().".contains(c));
    if !only_phone_chars || !(8..=15).contains(&digits.len()) {
        return Err(ApiError::bad_request("Invalid WhatsApp number"));
    }
    Ok(format!("+{}", digits))
}

/// Login identifiers may be an account id, an email or a WhatsApp number.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return trimmed.to_lowercase();
    }
    normalize_phone(trimmed).unwrap_or_else(|_| trimmed.to_string())
}

pub fn clean_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(password: Option<String>, liberal_login_used: bool) -> UserRow {
        UserRow {
            id: Uuid::new_v4().to_string(),
            full_name: "Test Sailor".into(),
            email: None,
            whatsapp_number: Some("+919876543210".into()),
            password,
            liberal_login_used,
            user_type: "sailor".into(),
            rank: None,
            ship_name: None,
            imo_number: None,
            port: None,
            city: None,
            country: None,
            latitude: None,
            longitude: None,
            location_source: None,
            location_updated_at: None,
            is_verified: false,
            is_admin: false,
            created_at: "2025-01-01 00:00:00.000".into(),
            last_login_at: None,
        }
    }

    #[test]
    fn identifiers_are_normalised() {
        assert_eq!(normalize_identifier(" Bosun@Example.COM "), "bosun@example.com");
        assert_eq!(normalize_identifier("+91 98765-43210"), "+919876543210");
        assert_eq!(normalize_identifier("919876543210"), "+919876543210");
        let id = Uuid::new_v4().to_string();
        assert_eq!(normalize_identifier(&id), id);
    }

    #[test]
    fn phone_and_email_validation() {
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("+91 abc 43210").is_err());
        assert_eq!(normalize_phone("(044) 2345-6789").unwrap(), "+04423456789");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("a@localhost").is_err());
        assert_eq!(normalize_email(" Chief@Ship.IO").unwrap(), "chief@ship.io");
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
        assert!(validate_full_name(" A ").is_err());
        assert_eq!(validate_full_name("  Ravi Kumar ").unwrap(), "Ravi Kumar");
    }

    #[test]
    fn starter_password_matches_only_until_used() {
        assert!(password_matches(&row(None, false), STARTER_PASSWORD));
        assert!(!password_matches(&row(None, true), STARTER_PASSWORD));
        assert!(!password_matches(&row(None, false), "something-else"));
    }

    #[test]
    fn starter_password_gives_no_merge_authority_when_unverified() {
        let squatter = row(None, false);
        assert!(!holds_account(&squatter, STARTER_PASSWORD));

        let mut verified = row(None, false);
        verified.is_verified = true;
        assert!(holds_account(&verified, STARTER_PASSWORD));
    }

    #[test]
    fn absorbing_needs_the_password_or_shared_verification() {
        let phone = "+919876543210";
        let owner = row(Some(hash_password("seaworthy").unwrap()), false);
        let other = row(Some(hash_password("different").unwrap()), false);
        assert!(!may_absorb(&owner, &other, phone, "seaworthy"));

        let mut owner_verified = owner.clone();
        owner_verified.is_verified = true;
        let mut other_verified = other.clone();
        other_verified.is_verified = true;
        assert!(may_absorb(&owner_verified, &other_verified, phone, "seaworthy"));
        // Verified through a different contact proves nothing about this one
        assert!(!may_absorb(&owner_verified, &other_verified, "chief@ship.io", "seaworthy"));
    }

    #[test]
    fn hashed_passwords_verify() {
        let hash = hash_password("seaworthy").unwrap();
        let user = row(Some(hash), false);
        assert!(password_matches(&user, "seaworthy"));
        assert!(!password_matches(&user, STARTER_PASSWORD));
        assert!(!verify_hash("not-a-phc-string", "seaworthy"));
    }

    #[test]
    fn tokens_carry_the_user() {
        let id = Uuid::new_v4();
        let token = create_token("secret", id, "Ravi").unwrap();
        let claims = qaaq_gateway::connection::verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.name, "Ravi");
    }
}
