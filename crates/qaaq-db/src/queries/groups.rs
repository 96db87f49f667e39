use anyhow::Result;
use rusqlite::{Connection, Row};

use super::OptionalExt;
use crate::Database;
use crate::models::{GroupRow, MemberRow};

const GROUP_COLUMNS: &str =
    "id, name, description, kind, cpss_level, parent_id, rank_key, path_key, member_count, created_at";

/// Unique key for a CPSS node: the lower-cased names from the country down.
/// `%` and `/` inside a name are percent-escaped so segments never run together.
pub fn cpss_path_key(names: &[&str]) -> String {
    let parts: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_lowercase().replace('%', "%25").replace('/', "%2f"))
        .collect();
    format!("cpss:{}", parts.join("/"))
}

impl Database {
    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| query_group(conn, "id", id))
    }

    pub fn get_group_by_rank_key(&self, rank_key: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| query_group(conn, "path_key", &format!("rank:{}", rank_key)))
    }

    /// Groups of one kind. For CPSS, `parent_id = None` lists the countries.
    pub fn list_groups(&self, kind: &str, parent_id: Option<&str>) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_COLUMNS} FROM groups
                 WHERE kind = ?1
                   AND ((?2 IS NULL AND parent_id IS NULL) OR parent_id = ?2)
                 ORDER BY member_count DESC, name ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![kind, parent_id], map_group_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Walk a CPSS path from the country down, creating missing nodes.
    /// `levels` is `(level, name)` from the top. Returns every node on the path.
    pub fn ensure_cpss_path(&self, levels: &[(&str, &str)]) -> Result<Vec<GroupRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut path = Vec::with_capacity(levels.len());
            let mut names: Vec<&str> = Vec::with_capacity(levels.len());
            let mut parent_id: Option<String> = None;

            for (level, name) in levels {
                names.push(*name);
                let key = cpss_path_key(&names);
                tx.execute(
                    "INSERT OR IGNORE INTO groups (id, name, description, kind, cpss_level, parent_id, path_key)
                     VALUES (?1, ?2, ?3, 'cpss', ?4, ?5, ?6)",
                    rusqlite::params![
                        uuid::Uuid::new_v4().to_string(),
                        name.trim(),
                        format!("{} community", name.trim()),
                        level,
                        parent_id,
                        key,
                    ],
                )?;
                let row = query_group(&tx, "path_key", &key)?
                    .ok_or_else(|| anyhow::anyhow!("CPSS node missing after insert: {}", key))?;
                if row.kind != "cpss" || row.cpss_level.as_deref() != Some(*level) || row.parent_id != parent_id {
                    anyhow::bail!("CPSS node {} does not sit at {} under {:?}", key, level, parent_id);
                }
                parent_id = Some(row.id.clone());
                path.push(row);
            }

            tx.commit()?;
            Ok(path)
        })
    }

    /// Add a member. Returns false if they already were one.
    pub fn join_group(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                (group_id, user_id),
            )?;
            if inserted == 1 {
                tx.execute(
                    "UPDATE groups SET member_count = member_count + 1 WHERE id = ?1",
                    [group_id],
                )?;
            }
            tx.commit()?;
            Ok(inserted == 1)
        })
    }

    /// Remove a member. Returns false if they were not one.
    pub fn leave_group(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                (group_id, user_id),
            )?;
            if removed == 1 {
                tx.execute(
                    "UPDATE groups SET member_count = member_count - 1 WHERE id = ?1",
                    [group_id],
                )?;
            }
            tx.commit()?;
            Ok(removed == 1)
        })
    }

    pub fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    (group_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn group_members(&self, group_id: &str, limit: u32) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT gm.user_id, u.full_name, u.rank, gm.role, gm.joined_at
                 FROM group_members gm
                 JOIN users u ON u.id = gm.user_id
                 WHERE gm.group_id = ?1
                 ORDER BY gm.joined_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![group_id, limit], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        full_name: row.get(1)?,
                        rank: row.get(2)?,
                        role: row.get(3)?,
                        joined_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn groups_for_user(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.description, g.kind, g.cpss_level, g.parent_id, g.rank_key,
                        g.path_key, g.member_count, g.created_at
                 FROM groups g
                 JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.user_id = ?1
                 ORDER BY g.kind ASC, g.name ASC",
            )?;
            let rows = stmt
                .query_map([user_id], map_group_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// `column` is always a literal from this module, never user input.
fn query_group(conn: &Connection, column: &str, value: &str) -> Result<Option<GroupRow>> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE {column} = ?1");
    let row = conn.query_row(&sql, [value], map_group_row).optional()?;
    Ok(row)
}

fn map_group_row(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind: row.get(3)?,
        cpss_level: row.get(4)?,
        parent_id: row.get(5)?,
        rank_key: row.get(6)?,
        path_key: row.get(7)?,
        member_count: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{db, user};

    #[test]
    fn rank_groups_are_seeded() {
        let db = db();
        let groups = db.list_groups("rank", None).unwrap();
        assert!(groups.iter().any(|g| g.rank_key.as_deref() == Some("chief_engineer")));
        assert!(db.get_group_by_rank_key("cadet").unwrap().is_some());
    }

    #[test]
    fn cpss_path_is_idempotent_and_case_insensitive() {
        let db = db();
        let first = db
            .ensure_cpss_path(&[("country", "India"), ("port", "Mumbai"), ("suburb", "Colaba")])
            .unwrap();
        let second = db
            .ensure_cpss_path(&[("country", "india"), ("port", " MUMBAI "), ("suburb", "colaba")])
            .unwrap();

        assert_eq!(first.len(), 3);
        let ids: Vec<_> = first.iter().map(|g| &g.id).collect();
        let again: Vec<_> = second.iter().map(|g| &g.id).collect();
        assert_eq!(ids, again);
        assert_eq!(first[1].parent_id.as_deref(), Some(first[0].id.as_str()));
        assert_eq!(first[2].cpss_level.as_deref(), Some("suburb"));

        let countries = db.list_groups("cpss", None).unwrap();
        assert_eq!(countries.len(), 1);
        let ports = db.list_groups("cpss", Some(&first[0].id)).unwrap();
        assert_eq!(ports[0].name, "Mumbai");
    }

    #[test]
    fn slashes_in_names_do_not_collide_with_deeper_levels() {
        let db = db();
        let joined = db.ensure_cpss_path(&[("country", "A/B")]).unwrap();
        let nested = db.ensure_cpss_path(&[("country", "A"), ("port", "B")]).unwrap();

        assert_ne!(nested[1].id, joined[0].id);
        assert_eq!(nested[1].cpss_level.as_deref(), Some("port"));
        assert_eq!(nested[1].parent_id.as_deref(), Some(nested[0].id.as_str()));
        assert_eq!(db.list_groups("cpss", None).unwrap().len(), 2);
    }

    #[test]
    fn membership_keeps_count_in_step() {
        let db = db();
        let u = user(&db, "Sailor");
        let group = db.get_group_by_rank_key("master").unwrap().unwrap();

        assert!(db.join_group(&group.id, &u).unwrap());
        assert!(!db.join_group(&group.id, &u).unwrap());
        assert_eq!(db.get_group(&group.id).unwrap().unwrap().member_count, 1);
        assert_eq!(db.groups_for_user(&u).unwrap().len(), 1);
        assert_eq!(db.group_members(&group.id, 10).unwrap()[0].full_name, "Sailor");

        assert!(db.leave_group(&group.id, &u).unwrap());
        assert!(!db.leave_group(&group.id, &u).unwrap());
        assert_eq!(db.get_group(&group.id).unwrap().unwrap().member_count, 0);
    }
}
