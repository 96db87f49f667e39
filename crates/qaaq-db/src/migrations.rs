use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Shipboard ranks that get a discussion group out of the box: (key, group name).
pub const RANK_GROUPS: &[(&str, &str)] = &[
    ("master", "Masters & Captains"),
    ("chief_officer", "Chief Officers"),
    ("second_officer", "2nd Officers"),
    ("third_officer", "3rd Officers"),
    ("chief_engineer", "Chief Engineers"),
    ("second_engineer", "2nd Engineers"),
    ("third_engineer", "3rd Engineers"),
    ("fourth_engineer", "4th Engineers"),
    ("eto", "Electro-Technical Officers"),
    ("cadet", "Cadets & Trainees"),
    ("crew", "Ratings & Crew"),
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                  TEXT PRIMARY KEY,
            full_name           TEXT NOT NULL,
            email               TEXT,
            whatsapp_number     TEXT,
            password            TEXT,
            liberal_login_used  INTEGER NOT NULL DEFAULT 0,
            user_type           TEXT NOT NULL DEFAULT 'sailor',
            rank                TEXT,
            ship_name           TEXT,
            imo_number          TEXT,
            port                TEXT,
            city                TEXT,
            country             TEXT,
            latitude            REAL,
            longitude           REAL,
            location_source     TEXT,
            location_updated_at TEXT,
            is_verified         INTEGER NOT NULL DEFAULT 0,
            is_admin            INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            last_login_at       TEXT
        );

        -- Not unique: duplicate records are resolved by the merge flow
        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
        CREATE INDEX IF NOT EXISTS idx_users_whatsapp ON users(whatsapp_number);
        CREATE INDEX IF NOT EXISTS idx_users_latitude ON users(latitude);

        CREATE TABLE IF NOT EXISTS otp_codes (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            purpose     TEXT NOT NULL,
            code_hash   TEXT NOT NULL,
            attempts    INTEGER NOT NULL DEFAULT 0,
            consumed    INTEGER NOT NULL DEFAULT 0,
            expires_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_otp_user ON otp_codes(user_id, purpose);

        CREATE TABLE IF NOT EXISTS chat_connections (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            pair_key    TEXT NOT NULL UNIQUE,
            status      TEXT NOT NULL DEFAULT 'pending',
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            accepted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id              TEXT PRIMARY KEY,
            connection_id   TEXT NOT NULL REFERENCES chat_connections(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content         TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_connection
            ON chat_messages(connection_id, created_at);

        CREATE TABLE IF NOT EXISTS groups (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            description     TEXT,
            kind            TEXT NOT NULL,
            cpss_level      TEXT,
            parent_id       TEXT REFERENCES groups(id),
            rank_key        TEXT,
            path_key        TEXT NOT NULL UNIQUE,
            member_count    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_groups_parent ON groups(parent_id);

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role        TEXT NOT NULL DEFAULT 'member',
            joined_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            PRIMARY KEY (group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            group_id    TEXT REFERENCES groups(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            like_count  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_group ON posts(group_id, created_at);

        CREATE TABLE IF NOT EXISTS post_likes (
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS questions (
            id              TEXT PRIMARY KEY,
            author_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL,
            tags            TEXT NOT NULL DEFAULT '',
            answer_count    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE TABLE IF NOT EXISTS answers (
            id          TEXT PRIMARY KEY,
            question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            is_accepted INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id, created_at);

        CREATE TABLE IF NOT EXISTS qbot_messages (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_qbot_user ON qbot_messages(user_id, created_at);
        ",
    )?;

    seed_rank_groups(conn)?;

    info!("Database migrations complete");
    Ok(())
}

fn seed_rank_groups(conn: &Connection) -> Result<()> {
    for (i, (key, name)) in RANK_GROUPS.iter().enumerate() {
        let id = format!("00000000-0000-0000-0000-{:012}", 101 + i);
        conn.execute(
            "INSERT OR IGNORE INTO groups (id, name, description, kind, rank_key, path_key)
             VALUES (?1, ?2, ?3, 'rank', ?4, ?5)",
            (
                &id,
                name,
                format!("Discussion group for {}", name.to_lowercase()),
                key,
                format!("rank:{}", key),
            ),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM groups WHERE kind = 'rank'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, RANK_GROUPS.len() as i64);
    }
}
