//! Database rows to API models. Corrupt rows are logged and patched with
//! defaults rather than failing the whole response.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use qaaq_db::models::{
    AnswerRow, ConnectionRow, GroupRow, MemberRow, MessageRow, PostRow, QbotRow, QuestionRow, UserRow,
};
use qaaq_db::parse_timestamp;
use qaaq_types::api::MergeCandidate;
use qaaq_types::models::{
    Answer, ChatConnection, ChatMessage, ConnectionStatus, CpssLevel, Group, GroupKind, GroupMember,
    LocationSource, Post, QbotMessage, QbotRole, Question, UserProfile, UserType,
};

pub fn uuid(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|_| {
        warn!("Corrupt UUID in database: {:?}", raw);
        Uuid::default()
    })
}

pub fn time(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt timestamp in database: {:?}", raw);
        DateTime::<Utc>::default()
    })
}

fn opt_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_timestamp)
}

/// Turn a client-supplied cursor (RFC 3339, as the API emits) into the
/// stored timestamp format so string comparison in SQL stays ordered.
pub fn cursor(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

/// The caller's own profile, contact details included.
pub fn user_profile(row: UserRow) -> UserProfile {
    UserProfile {
        id: uuid(&row.id),
        user_type: UserType::parse(&row.user_type).unwrap_or(UserType::Sailor),
        location_source: row.location_source.as_deref().and_then(LocationSource::parse),
        location_updated_at: opt_time(row.location_updated_at.as_deref()),
        created_at: time(&row.created_at),
        full_name: row.full_name,
        email: row.email,
        whatsapp_number: row.whatsapp_number,
        rank: row.rank,
        ship_name: row.ship_name,
        imo_number: row.imo_number,
        port: row.port,
        city: row.city,
        country: row.country,
        latitude: row.latitude,
        longitude: row.longitude,
        is_verified: row.is_verified,
    }
}

pub fn public_profile(row: UserRow) -> UserProfile {
    user_profile(row).into_public()
}

pub fn merge_candidate(row: &UserRow) -> MergeCandidate {
    MergeCandidate {
        id: uuid(&row.id),
        full_name: row.full_name.clone(),
        rank: row.rank.clone(),
        ship_name: row.ship_name.clone(),
        created_at: time(&row.created_at),
        last_login_at: opt_time(row.last_login_at.as_deref()),
    }
}

pub fn connection(row: ConnectionRow) -> ChatConnection {
    ChatConnection {
        id: uuid(&row.id),
        sender_id: uuid(&row.sender_id),
        receiver_id: uuid(&row.receiver_id),
        status: ConnectionStatus::parse(&row.status).unwrap_or(ConnectionStatus::Pending),
        created_at: time(&row.created_at),
        accepted_at: opt_time(row.accepted_at.as_deref()),
    }
}

pub fn message(row: MessageRow) -> ChatMessage {
    ChatMessage {
        id: uuid(&row.id),
        connection_id: uuid(&row.connection_id),
        sender_id: uuid(&row.sender_id),
        content: row.content,
        is_read: row.is_read,
        created_at: time(&row.created_at),
    }
}

pub fn group(row: GroupRow) -> Group {
    Group {
        id: uuid(&row.id),
        kind: GroupKind::parse(&row.kind).unwrap_or(GroupKind::Cpss),
        cpss_level: row.cpss_level.as_deref().and_then(CpssLevel::parse),
        parent_id: row.parent_id.as_deref().map(uuid),
        created_at: time(&row.created_at),
        name: row.name,
        description: row.description,
        rank_key: row.rank_key,
        member_count: row.member_count,
    }
}

pub fn member(row: MemberRow) -> GroupMember {
    GroupMember {
        user_id: uuid(&row.user_id),
        joined_at: time(&row.joined_at),
        full_name: row.full_name,
        rank: row.rank,
        role: row.role,
    }
}

pub fn post(row: PostRow) -> Post {
    Post {
        id: uuid(&row.id),
        group_id: row.group_id.as_deref().map(uuid),
        author_id: uuid(&row.author_id),
        created_at: time(&row.created_at),
        author_name: row.author_name,
        content: row.content,
        like_count: row.like_count,
        liked_by_me: row.liked_by_viewer,
    }
}

/// Tags are stored as `,a,b,` so a LIKE on `,tag,` matches whole tags.
pub fn tags_to_column(tags: &[String]) -> String {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase().replace(',', " ");
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    if cleaned.is_empty() {
        String::new()
    } else {
        format!(",{},", cleaned.join(","))
    }
}

pub fn tags_from_column(raw: &str) -> Vec<String> {
    raw.split(',').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

pub fn question(row: QuestionRow) -> Question {
    Question {
        id: uuid(&row.id),
        author_id: uuid(&row.author_id),
        tags: tags_from_column(&row.tags),
        created_at: time(&row.created_at),
        author_name: row.author_name,
        title: row.title,
        content: row.content,
        answer_count: row.answer_count,
    }
}

pub fn answer(row: AnswerRow) -> Answer {
    Answer {
        id: uuid(&row.id),
        question_id: uuid(&row.question_id),
        author_id: uuid(&row.author_id),
        created_at: time(&row.created_at),
        author_name: row.author_name,
        content: row.content,
        is_accepted: row.is_accepted,
    }
}

pub fn qbot_message(row: QbotRow) -> QbotMessage {
    QbotMessage {
        id: uuid(&row.id),
        role: QbotRole::parse(&row.role).unwrap_or(QbotRole::Assistant),
        created_at: time(&row.created_at),
        content: row.content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_column() {
        let tags = vec![" Engine ".to_string(), "".to_string(), "BWTS".to_string()];
        let column = tags_to_column(&tags);
        assert_eq!(column, ",engine,bwts,");
        assert_eq!(tags_from_column(&column), vec!["engine", "bwts"]);
        assert_eq!(tags_to_column(&[]), "");
        assert!(tags_from_column("").is_empty());
    }

    #[test]
    fn repeated_tags_are_kept_once_in_order() {
        let tags: Vec<String> = ["ballast", "Engine", "BALLAST", "engine"].iter().map(|t| t.to_string()).collect();
        assert_eq!(tags_to_column(&tags), ",ballast,engine,");
    }

    #[test]
    fn cursors_match_stored_format() {
        assert_eq!(cursor("2025-03-01T10:20:30.456Z").as_deref(), Some("2025-03-01 10:20:30.456"));
        assert_eq!(cursor("2025-03-01 10:20:30.456").as_deref(), Some("2025-03-01 10:20:30.456"));
        assert!(cursor("last tuesday").is_none());
    }

    #[test]
    fn corrupt_ids_fall_back_to_nil() {
        assert_eq!(uuid("not-a-uuid"), Uuid::nil());
        assert_eq!(time("yesterday"), DateTime::<Utc>::default());
    }
}
