use anyhow::Result;
use rusqlite::Row;

use super::OptionalExt;
use crate::Database;
use crate::models::PostRow;

/// `?1` is always the viewer id, for the `liked_by_viewer` column.
const POST_SELECT: &str = "SELECT p.id, p.group_id, p.author_id, COALESCE(u.full_name, 'unknown'),
        p.content, p.like_count,
        EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1),
        p.created_at
    FROM posts p
    LEFT JOIN users u ON u.id = p.author_id";

impl Database {
    pub fn create_post(&self, id: &str, group_id: Option<&str>, author_id: &str, content: &str) -> Result<PostRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, group_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, group_id, author_id, content],
            )?;
            let sql = format!("{POST_SELECT} WHERE p.id = ?2");
            Ok(conn.query_row(&sql, (author_id, id), map_post_row)?)
        })
    }

    pub fn get_post(&self, id: &str, viewer_id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!("{POST_SELECT} WHERE p.id = ?2");
            let row = conn.query_row(&sql, (viewer_id, id), map_post_row).optional()?;
            Ok(row)
        })
    }

    /// Newest first. `group_id = None` is the public feed.
    pub fn list_posts(
        &self,
        group_id: Option<&str>,
        viewer_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{POST_SELECT}
                 WHERE ((?2 IS NULL AND p.group_id IS NULL) OR p.group_id = ?2)
                   AND (?3 IS NULL OR p.created_at < ?3)
                 ORDER BY p.created_at DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![viewer_id, group_id, before, limit], map_post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Like or unlike. Returns (liked, new like count).
    pub fn toggle_post_like(&self, post_id: &str, user_id: &str) -> Result<(bool, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                (post_id, user_id),
            )?;
            let liked = if removed == 1 {
                tx.execute("UPDATE posts SET like_count = like_count - 1 WHERE id = ?1", [post_id])?;
                false
            } else {
                tx.execute(
                    "INSERT INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
                    (post_id, user_id),
                )?;
                tx.execute("UPDATE posts SET like_count = like_count + 1 WHERE id = ?1", [post_id])?;
                true
            };
            let count: i64 =
                tx.query_row("SELECT like_count FROM posts WHERE id = ?1", [post_id], |row| row.get(0))?;
            tx.commit()?;
            Ok((liked, count))
        })
    }
}

fn map_post_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        like_count: row.get(5)?,
        liked_by_viewer: row.get(6)?,
        created_at: row.get(7)?,
    })
}
