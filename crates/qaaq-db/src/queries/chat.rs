use anyhow::Result;
use rusqlite::{Connection, Row};

use super::OptionalExt;
use crate::models::{ConnectionRow, MessageRow};
use crate::{Database, SQL_NOW};

const CONNECTION_COLUMNS: &str = "id, sender_id, receiver_id, status, created_at, accepted_at";
const MESSAGE_COLUMNS: &str = "id, connection_id, sender_id, content, is_read, created_at";

/// Order-independent key for a pair of users; one connection per pair.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl Database {
    // -- Connections --

    /// Connection for the pair, creating it when there is none yet. The flag
    /// is true only for the caller whose insert won.
    pub fn create_connection(&self, id: &str, sender_id: &str, receiver_id: &str) -> Result<(ConnectionRow, bool)> {
        self.with_conn(|conn| {
            let key = pair_key(sender_id, receiver_id);
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chat_connections (id, sender_id, receiver_id, pair_key)
                 VALUES (?1, ?2, ?3, ?4)",
                (id, sender_id, receiver_id, &key),
            )?;
            let row = query_pair(conn, &key)?
                .ok_or_else(|| anyhow::anyhow!("Connection vanished after insert: {}", key))?;
            Ok((row, inserted == 1))
        })
    }

    pub fn get_connection(&self, id: &str) -> Result<Option<ConnectionRow>> {
        self.with_conn(|conn| query_connection(conn, id))
    }

    pub fn find_connection_between(&self, a: &str, b: &str) -> Result<Option<ConnectionRow>> {
        self.with_conn(|conn| query_pair(conn, &pair_key(a, b)))
    }

    /// Accepting stamps `accepted_at`; any status change returns the updated row.
    pub fn set_connection_status(&self, id: &str, status: &str) -> Result<Option<ConnectionRow>> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE chat_connections SET status = ?2,
                        accepted_at = CASE WHEN ?2 = 'accepted' THEN {SQL_NOW} ELSE accepted_at END
                     WHERE id = ?1"
                ),
                (id, status),
            )?;
            query_connection(conn, id)
        })
    }

    /// Connections a user takes part in, most recently active first.
    pub fn list_connections(&self, user_id: &str) -> Result<Vec<ConnectionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.sender_id, c.receiver_id, c.status, c.created_at, c.accepted_at
                 FROM chat_connections c
                 WHERE c.sender_id = ?1 OR c.receiver_id = ?1
                 ORDER BY COALESCE(
                    (SELECT MAX(m.created_at) FROM chat_messages m WHERE m.connection_id = c.id),
                    c.created_at) DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_connection_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, id: &str, connection_id: &str, sender_id: &str, content: &str) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, connection_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, connection_id, sender_id, content),
            )?;
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], map_message_row)?)
        })
    }

    /// Messages in ascending order. `after` returns the ones newer than a
    /// timestamp (polling); `before` pages backwards from a timestamp.
    pub fn get_messages(
        &self,
        connection_id: &str,
        limit: u32,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            if let Some(after) = after {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                     WHERE connection_id = ?1 AND created_at > ?2
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT ?3"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![connection_id, after, limit], map_message_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                return Ok(rows);
            }

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                 WHERE connection_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params![connection_id, before, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn last_message(&self, connection_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE connection_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            );
            let row = conn.query_row(&sql, [connection_id], map_message_row).optional()?;
            Ok(row)
        })
    }

    pub fn unread_count(&self, connection_id: &str, reader_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chat_messages
                 WHERE connection_id = ?1 AND sender_id != ?2 AND is_read = 0",
                (connection_id, reader_id),
                |row| row.get(0),
            )?)
        })
    }

    /// Flag every message the peer sent as read. Returns how many changed.
    pub fn mark_messages_read(&self, connection_id: &str, reader_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE connection_id = ?1 AND sender_id != ?2 AND is_read = 0",
                (connection_id, reader_id),
            )?;
            Ok(changed)
        })
    }
}

fn query_connection(conn: &Connection, id: &str) -> Result<Option<ConnectionRow>> {
    let sql = format!("SELECT {CONNECTION_COLUMNS} FROM chat_connections WHERE id = ?1");
    let row = conn.query_row(&sql, [id], map_connection_row).optional()?;
    Ok(row)
}

fn query_pair(conn: &Connection, key: &str) -> Result<Option<ConnectionRow>> {
    let sql = format!("SELECT {CONNECTION_COLUMNS} FROM chat_connections WHERE pair_key = ?1");
    let row = conn.query_row(&sql, [key], map_connection_row).optional()?;
    Ok(row)
}

fn map_connection_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRow> {
    Ok(ConnectionRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        accepted_at: row.get(5)?,
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{db, user};
    use super::pair_key;

    #[test]
    fn pair_key_is_symmetric() {
        assert_eq!(pair_key("a", "b"), pair_key("b", "a"));
        assert_ne!(pair_key("a", "b"), pair_key("a", "c"));
    }

    #[test]
    fn second_connection_for_pair_returns_the_first() {
        let db = db();
        let a = user(&db, "A");
        let b = user(&db, "B");
        let (first, created) = db.create_connection("c1", &a, &b).unwrap();
        assert!(created);
        let (again, created) = db.create_connection("c2", &b, &a).unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(db.find_connection_between(&b, &a).unwrap().unwrap().id, "c1");
    }

    #[test]
    fn accepting_stamps_time() {
        let db = db();
        let a = user(&db, "A");
        let b = user(&db, "B");
        db.create_connection("c1", &a, &b).unwrap();
        let row = db.set_connection_status("c1", "accepted").unwrap().unwrap();
        assert_eq!(row.status, "accepted");
        assert!(row.accepted_at.is_some());
    }

    #[test]
    fn messages_page_in_insert_order() {
        let db = db();
        let a = user(&db, "A");
        let b = user(&db, "B");
        db.create_connection("c1", &a, &b).unwrap();
        for i in 0..5 {
            db.insert_message(&format!("m{i}"), "c1", &a, &format!("msg {i}")).unwrap();
        }

        let latest = db.get_messages("c1", 3, None, None).unwrap();
        let ids: Vec<_> = latest.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);

        let all = db.get_messages("c1", 50, None, None).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "msg 0");
    }

    #[test]
    fn unread_tracking_ignores_own_messages() {
        let db = db();
        let a = user(&db, "A");
        let b = user(&db, "B");
        db.create_connection("c1", &a, &b).unwrap();
        db.insert_message("m1", "c1", &a, "hi").unwrap();
        db.insert_message("m2", "c1", &a, "you there?").unwrap();
        db.insert_message("m3", "c1", &b, "yes").unwrap();

        assert_eq!(db.unread_count("c1", &b).unwrap(), 2);
        assert_eq!(db.unread_count("c1", &a).unwrap(), 1);
        assert_eq!(db.mark_messages_read("c1", &b).unwrap(), 2);
        assert_eq!(db.unread_count("c1", &b).unwrap(), 0);
        assert_eq!(db.last_message("c1").unwrap().unwrap().id, "m3");
    }
}
