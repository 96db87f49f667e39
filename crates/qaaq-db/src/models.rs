//! Database row types. These map directly to SQLite rows and stay
//! independent of the qaaq-types API models.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub password: Option<String>,
    pub liberal_login_used: bool,
    pub user_type: String,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub imo_number: Option<String>,
    pub port: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_source: Option<String>,
    pub location_updated_at: Option<String>,
    pub is_verified: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub password_hash: Option<String>,
    pub user_type: String,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub imo_number: Option<String>,
    pub port: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Partial profile update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub whatsapp_number: Option<String>,
    pub user_type: Option<String>,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub imo_number: Option<String>,
    pub port: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: String,
    pub created_at: String,
    pub accepted_at: Option<String>,
}

impl ConnectionRow {
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The participant that is not `user_id`.
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub connection_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub cpss_level: Option<String>,
    pub parent_id: Option<String>,
    pub rank_key: Option<String>,
    pub path_key: String,
    pub member_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub user_id: String,
    pub full_name: String,
    pub rank: Option<String>,
    pub role: String,
    pub joined_at: String,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub group_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub like_count: i64,
    pub liked_by_viewer: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct QuestionRow {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub title: String,
    pub content: String,
    pub tags: String,
    pub answer_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AnswerRow {
    pub id: String,
    pub question_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub is_accepted: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct QbotRow {
    pub id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Result of checking a one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Valid,
    Invalid,
    Expired,
    TooManyAttempts,
    NotFound,
}
