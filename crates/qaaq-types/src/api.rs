use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Answer, ChatConnection, ChatMessage, LocationSource, QbotMessage, Question, UserProfile,
    UserType,
};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the chat gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub user_type: UserType,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub imo_number: Option<String>,
    pub port: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
    /// True after a first login with the shared starter password.
    pub requires_password_setup: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// User id, email address or WhatsApp number
    pub identifier: String,
    pub password: String,
}

/// One of several accounts that share an identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub id: Uuid,
    pub full_name: String,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeRequiredResponse {
    pub error: String,
    pub message: String,
    pub candidates: Vec<MergeCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeRequest {
    pub identifier: String,
    pub password: String,
    pub primary_id: Uuid,
    pub duplicate_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyOtpRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetRequest {
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetConfirm {
    pub identifier: String,
    pub code: String,
    pub new_password: String,
}

// -- Users --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub user_type: Option<UserType>,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub imo_number: Option<String>,
    pub port: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub source: LocationSource,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConnectionRequest {
    pub receiver_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub connection: ChatConnection,
    pub peer: UserProfile,
    pub last_message: Option<ChatMessage>,
    pub unread_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CpssJoinRequest {
    pub country: String,
    pub port: Option<String>,
    pub suburb: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
}

// -- Q&A --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateQuestionRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub question: Question,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAnswerRequest {
    pub content: String,
}

// -- QBOT --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QbotChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QbotChatResponse {
    pub message: QbotMessage,
    pub reply: QbotMessage,
}

// -- Misc --

/// Public settings the web client needs before login.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub google_maps_api_key: Option<String>,
    pub ais_enabled: bool,
}
