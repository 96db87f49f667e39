use anyhow::Result;
use rusqlite::{Connection, Row};
use tracing::info;

use super::OptionalExt;
use super::chat::pair_key;
use crate::models::{NewUser, ProfileUpdate, UserRow};
use crate::{Database, SQL_NOW};

const USER_COLUMNS: &str = "id, full_name, email, whatsapp_number, password, liberal_login_used,
    user_type, rank, ship_name, imo_number, port, city, country, latitude, longitude,
    location_source, location_updated_at, is_verified, is_admin, created_at, last_login_at";

impl Database {
    pub fn create_user(&self, user: &NewUser) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, full_name, email, whatsapp_number, password, user_type,
                    rank, ship_name, imo_number, port, city, country)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    user.id,
                    user.full_name,
                    user.email,
                    user.whatsapp_number,
                    user.password_hash,
                    user.user_type,
                    user.rank,
                    user.ship_name,
                    user.imo_number,
                    user.port,
                    user.city,
                    user.country,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// All users whose id, email or WhatsApp number equals `identifier`.
    /// Oldest first; more than one row means the identifier is shared.
    pub fn find_users_by_identifier(&self, identifier: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id = ?1 OR email = ?1 OR whatsapp_number = ?1
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([identifier], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET password = ?2 WHERE id = ?1", (id, password_hash))?;
            Ok(())
        })
    }

    /// Burn the one-time starter password. Returns false if it was already used.
    pub fn consume_liberal_login(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET liberal_login_used = 1
                 WHERE id = ?1 AND liberal_login_used = 0 AND password IS NULL",
                [id],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn touch_last_login(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE users SET last_login_at = {SQL_NOW} WHERE id = ?1"),
                [id],
            )?;
            Ok(())
        })
    }

    pub fn mark_verified(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET is_verified = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    full_name = COALESCE(?2, full_name),
                    email = COALESCE(?3, email),
                    whatsapp_number = COALESCE(?4, whatsapp_number),
                    user_type = COALESCE(?5, user_type),
                    rank = COALESCE(?6, rank),
                    ship_name = COALESCE(?7, ship_name),
                    imo_number = COALESCE(?8, imo_number),
                    port = COALESCE(?9, port),
                    city = COALESCE(?10, city),
                    country = COALESCE(?11, country)
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    update.full_name,
                    update.email,
                    update.whatsapp_number,
                    update.user_type,
                    update.rank,
                    update.ship_name,
                    update.imo_number,
                    update.port,
                    update.city,
                    update.country,
                ],
            )?;
            query_user_by_id(conn, id)
        })
    }

    pub fn update_location(&self, id: &str, latitude: f64, longitude: f64, source: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE users SET latitude = ?2, longitude = ?3, location_source = ?4,
                        location_updated_at = {SQL_NOW}
                     WHERE id = ?1"
                ),
                rusqlite::params![id, latitude, longitude, source],
            )?;
            Ok(())
        })
    }

    /// Users with a known position inside a latitude band, excluding `exclude_id`.
    /// Distance filtering happens in the caller; the band only narrows the scan.
    pub fn users_with_location(
        &self,
        exclude_id: &str,
        min_lat: f64,
        max_lat: f64,
        user_type: Option<&str>,
    ) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id != ?1
                   AND latitude IS NOT NULL AND longitude IS NOT NULL
                   AND latitude BETWEEN ?2 AND ?3
                   AND (?4 IS NULL OR user_type = ?4)"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![exclude_id, min_lat, max_lat, user_type], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn search_users(&self, exclude_id: &str, query: &str, limit: u32) -> Result<Vec<UserRow>> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id != ?1
                   AND (lower(full_name) LIKE ?2
                     OR lower(COALESCE(ship_name, '')) LIKE ?2
                     OR lower(COALESCE(rank, '')) LIKE ?2
                     OR lower(COALESCE(port, '')) LIKE ?2
                     OR lower(COALESCE(city, '')) LIKE ?2)
                 ORDER BY full_name ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![exclude_id, pattern, limit], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fold duplicate accounts into `primary_id`: every owned row moves to
    /// the primary, empty profile fields are filled from the duplicates, then
    /// the duplicates are deleted. Runs in a single transaction.
    pub fn merge_users(&self, primary_id: &str, duplicate_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for dup in duplicate_ids.iter().filter(|d| d.as_str() != primary_id) {
                if query_user_by_id(&tx, dup)?.is_none() {
                    continue;
                }
                merge_connections(&tx, primary_id, dup)?;

                tx.execute(
                    "UPDATE chat_messages SET sender_id = ?1 WHERE sender_id = ?2",
                    (primary_id, dup),
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
                     SELECT group_id, ?1, role, joined_at FROM group_members WHERE user_id = ?2",
                    (primary_id, dup),
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO post_likes (post_id, user_id)
                     SELECT post_id, ?1 FROM post_likes WHERE user_id = ?2",
                    (primary_id, dup),
                )?;
                for table in ["posts", "questions", "answers"] {
                    tx.execute(
                        &format!("UPDATE {table} SET author_id = ?1 WHERE author_id = ?2"),
                        (primary_id, dup),
                    )?;
                }
                tx.execute(
                    "UPDATE qbot_messages SET user_id = ?1 WHERE user_id = ?2",
                    (primary_id, dup),
                )?;
                tx.execute(
                    "UPDATE users SET
                        email = COALESCE(users.email, d.email),
                        whatsapp_number = COALESCE(users.whatsapp_number, d.whatsapp_number),
                        rank = COALESCE(users.rank, d.rank),
                        ship_name = COALESCE(users.ship_name, d.ship_name),
                        imo_number = COALESCE(users.imo_number, d.imo_number),
                        port = COALESCE(users.port, d.port),
                        city = COALESCE(users.city, d.city),
                        country = COALESCE(users.country, d.country),
                        is_verified = MAX(users.is_verified, d.is_verified)
                     FROM (SELECT * FROM users WHERE id = ?2) AS d
                     WHERE users.id = ?1",
                    (primary_id, dup),
                )?;
                // Cascades remove the duplicate's leftover memberships, likes and codes
                tx.execute("DELETE FROM users WHERE id = ?1", [dup])?;
                info!("Merged user {} into {}", dup, primary_id);
            }

            tx.execute_batch(
                "UPDATE groups SET member_count =
                    (SELECT COUNT(*) FROM group_members WHERE group_members.group_id = groups.id);
                 UPDATE posts SET like_count =
                    (SELECT COUNT(*) FROM post_likes WHERE post_likes.post_id = posts.id);",
            )?;

            tx.commit()?;
            Ok(())
        })
    }
}

/// Re-home the duplicate's chat connections. A chat with the primary itself
/// is dropped; a chat with a peer the primary already talks to is folded
/// into the primary's connection.
fn merge_connections(conn: &Connection, primary_id: &str, dup: &str) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id FROM chat_connections
         WHERE sender_id = ?1 OR receiver_id = ?1",
    )?;
    let connections = stmt
        .query_map([dup], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (id, sender, receiver) in connections {
        let peer = if sender == dup { &receiver } else { &sender };
        if peer == primary_id {
            conn.execute("DELETE FROM chat_connections WHERE id = ?1", [&id])?;
            continue;
        }

        let key = pair_key(primary_id, peer);
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM chat_connections WHERE pair_key = ?1",
                [&key],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(existing_id) => {
                conn.execute(
                    "UPDATE chat_messages SET connection_id = ?1 WHERE connection_id = ?2",
                    (&existing_id, &id),
                )?;
                conn.execute("DELETE FROM chat_connections WHERE id = ?1", [&id])?;
            }
            None => {
                let (new_sender, new_receiver) = if sender == dup {
                    (primary_id, receiver.as_str())
                } else {
                    (sender.as_str(), primary_id)
                };
                conn.execute(
                    "UPDATE chat_connections SET sender_id = ?2, receiver_id = ?3, pair_key = ?4
                     WHERE id = ?1",
                    (&id, new_sender, new_receiver, &key),
                )?;
            }
        }
    }

    Ok(())
}

pub(crate) fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], map_user_row).optional()?;
    Ok(row)
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        whatsapp_number: row.get(3)?,
        password: row.get(4)?,
        liberal_login_used: row.get(5)?,
        user_type: row.get(6)?,
        rank: row.get(7)?,
        ship_name: row.get(8)?,
        imo_number: row.get(9)?,
        port: row.get(10)?,
        city: row.get(11)?,
        country: row.get(12)?,
        latitude: row.get(13)?,
        longitude: row.get(14)?,
        location_source: row.get(15)?,
        location_updated_at: row.get(16)?,
        is_verified: row.get(17)?,
        is_admin: row.get(18)?,
        created_at: row.get(19)?,
        last_login_at: row.get(20)?,
    })
}
