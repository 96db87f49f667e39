use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Enumerations stored as text columns --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Sailor,
    Local,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sailor => "sailor",
            Self::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sailor" => Some(Self::Sailor),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Where a user's last known position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Device,
    Ship,
    Manual,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Ship => "ship",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "device" => Some(Self::Device),
            "ship" => Some(Self::Ship),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Rank,
    Cpss,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rank => "rank",
            Self::Cpss => "cpss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rank" => Some(Self::Rank),
            "cpss" => Some(Self::Cpss),
            _ => None,
        }
    }
}

/// Level in the Country > Port > Suburb > Service hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpssLevel {
    Country,
    Port,
    Suburb,
    Service,
}

impl CpssLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Port => "port",
            Self::Suburb => "suburb",
            Self::Service => "service",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "country" => Some(Self::Country),
            "port" => Some(Self::Port),
            "suburb" => Some(Self::Suburb),
            "service" => Some(Self::Service),
            _ => None,
        }
    }

    pub fn child(&self) -> Option<Self> {
        match self {
            Self::Country => Some(Self::Port),
            Self::Port => Some(Self::Suburb),
            Self::Suburb => Some(Self::Service),
            Self::Service => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QbotRole {
    User,
    Assistant,
}

impl QbotRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

// -- Entities as returned by the API --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub full_name: String,
    /// Contact details are only present on the caller's own profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_number: Option<String>,
    pub user_type: UserType,
    pub rank: Option<String>,
    pub ship_name: Option<String>,
    pub imo_number: Option<String>,
    pub port: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_source: Option<LocationSource>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Strip contact details for display to other users.
    pub fn into_public(mut self) -> Self {
        self.email = None;
        self.whatsapp_number = None;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConnection {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: GroupKind,
    pub cpss_level: Option<CpssLevel>,
    pub parent_id: Option<Uuid>,
    pub rank_key: Option<String>,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: Uuid,
    pub full_name: String,
    pub rank: Option<String>,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub group_id: Option<Uuid>,
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub like_count: i64,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub answer_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub question_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QbotMessage {
    pub id: Uuid,
    pub role: QbotRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
