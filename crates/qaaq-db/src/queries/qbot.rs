use anyhow::Result;
use rusqlite::Row;

use crate::Database;
use crate::models::QbotRow;

const QBOT_COLUMNS: &str = "id, user_id, role, content, created_at";

impl Database {
    pub fn insert_qbot_message(&self, id: &str, user_id: &str, role: &str, content: &str) -> Result<QbotRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO qbot_messages (id, user_id, role, content) VALUES (?1, ?2, ?3, ?4)",
                (id, user_id, role, content),
            )?;
            let sql = format!("SELECT {QBOT_COLUMNS} FROM qbot_messages WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], map_qbot_row)?)
        })
    }

    /// The most recent `limit` turns, oldest first.
    pub fn qbot_history(&self, user_id: &str, limit: u32) -> Result<Vec<QbotRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {QBOT_COLUMNS} FROM qbot_messages WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params![user_id, limit], map_qbot_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn clear_qbot_history(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM qbot_messages WHERE user_id = ?1", [user_id])?))
    }
}

fn map_qbot_row(row: &Row<'_>) -> rusqlite::Result<QbotRow> {
    Ok(QbotRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{db, user};

    #[test]
    fn history_window_is_latest_turns_in_order() {
        let db = db();
        let u = user(&db, "Chat");
        for i in 0..4 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            db.insert_qbot_message(&format!("m{i}"), &u, role, &format!("turn {i}")).unwrap();
        }

        let window = db.qbot_history(&u, 2).unwrap();
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 2", "turn 3"]);

        assert_eq!(db.clear_qbot_history(&u).unwrap(), 4);
        assert!(db.qbot_history(&u, 10).unwrap().is_empty());
    }
}
