use anyhow::Result;
use rusqlite::{Connection, Row};

use super::OptionalExt;
use crate::Database;
use crate::models::{AnswerRow, QuestionRow};

const QUESTION_SELECT: &str = "SELECT q.id, q.author_id, COALESCE(u.full_name, 'unknown'), q.title,
        q.content, q.tags, q.answer_count, q.created_at
    FROM questions q
    LEFT JOIN users u ON u.id = q.author_id";

const ANSWER_SELECT: &str = "SELECT a.id, a.question_id, a.author_id, COALESCE(u.full_name, 'unknown'),
        a.content, a.is_accepted, a.created_at
    FROM answers a
    LEFT JOIN users u ON u.id = a.author_id";

impl Database {
    /// `tags` is stored comma separated.
    pub fn create_question(&self, id: &str, author_id: &str, title: &str, content: &str, tags: &str) -> Result<QuestionRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO questions (id, author_id, title, content, tags) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, author_id, title, content, tags),
            )?;
            query_question(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Question vanished after insert: {}", id))
        })
    }

    pub fn get_question(&self, id: &str) -> Result<Option<QuestionRow>> {
        self.with_conn(|conn| query_question(conn, id))
    }

    /// Newest first, optionally filtered by free text and/or a single tag.
    pub fn list_questions(&self, search: Option<&str>, tag: Option<&str>, limit: u32, offset: u32) -> Result<Vec<QuestionRow>> {
        let pattern = search.map(|s| format!("%{}%", s.trim().to_lowercase()));
        let tag = tag.map(|t| format!("%,{},%", t.trim().to_lowercase()));
        self.with_conn(|conn| {
            let sql = format!(
                "{QUESTION_SELECT}
                 WHERE (?1 IS NULL OR lower(q.title) LIKE ?1 OR lower(q.content) LIKE ?1)
                   AND (?2 IS NULL OR (',' || q.tags || ',') LIKE ?2)
                 ORDER BY q.created_at DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, tag, limit, offset], map_question_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_answer(&self, id: &str, question_id: &str, author_id: &str, content: &str) -> Result<AnswerRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO answers (id, question_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, question_id, author_id, content),
            )?;
            tx.execute(
                "UPDATE questions SET answer_count = answer_count + 1 WHERE id = ?1",
                [question_id],
            )?;
            let sql = format!("{ANSWER_SELECT} WHERE a.id = ?1");
            let row = tx.query_row(&sql, [id], map_answer_row)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Accepted answer first, then oldest first.
    pub fn list_answers(&self, question_id: &str) -> Result<Vec<AnswerRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{ANSWER_SELECT} WHERE a.question_id = ?1
                 ORDER BY a.is_accepted DESC, a.created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([question_id], map_answer_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark one answer accepted and clear any previous choice.
    /// Returns false if the answer does not belong to the question.
    pub fn accept_answer(&self, question_id: &str, answer_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let belongs: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM answers WHERE id = ?1 AND question_id = ?2",
                    (answer_id, question_id),
                    |row| row.get(0),
                )
                .optional()?;
            if belongs.is_none() {
                return Ok(false);
            }
            tx.execute(
                "UPDATE answers SET is_accepted = (id = ?2) WHERE question_id = ?1",
                (question_id, answer_id),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }
}

fn query_question(conn: &Connection, id: &str) -> Result<Option<QuestionRow>> {
    let sql = format!("{QUESTION_SELECT} WHERE q.id = ?1");
    let row = conn.query_row(&sql, [id], map_question_row).optional()?;
    Ok(row)
}

fn map_question_row(row: &Row<'_>) -> rusqlite::Result<QuestionRow> {
    Ok(QuestionRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_name: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        tags: row.get(5)?,
        answer_count: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_answer_row(row: &Row<'_>) -> rusqlite::Result<AnswerRow> {
    Ok(AnswerRow {
        id: row.get(0)?,
        question_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        is_accepted: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{db, user};

    #[test]
    fn search_and_tag_filters() {
        let db = db();
        let u = user(&db, "Asker");
        db.create_question("q1", &u, "Ballast water treatment", "UV or chlorination?", "ballast,environment")
            .unwrap();
        db.create_question("q2", &u, "Purifier gravity disc", "How to choose the disc?", "engine")
            .unwrap();

        assert_eq!(db.list_questions(Some("BALLAST"), None, 10, 0).unwrap().len(), 1);
        let engine = db.list_questions(None, Some("engine"), 10, 0).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine[0].id, "q2");
        // "environment" must not match the tag "env"
        assert!(db.list_questions(None, Some("env"), 10, 0).unwrap().is_empty());
        assert_eq!(db.list_questions(None, None, 10, 0).unwrap().len(), 2);
    }

    #[test]
    fn one_accepted_answer() {
        let db = db();
        let asker = user(&db, "Asker");
        let helper = user(&db, "Helper");
        db.create_question("q1", &asker, "Title", "Body", "").unwrap();
        db.create_answer("a1", "q1", &helper, "first").unwrap();
        db.create_answer("a2", "q1", &helper, "second").unwrap();
        db.create_question("q2", &asker, "Other", "Body", "").unwrap();

        assert_eq!(db.get_question("q1").unwrap().unwrap().answer_count, 2);
        assert!(!db.accept_answer("q2", "a1").unwrap());

        assert!(db.accept_answer("q1", "a1").unwrap());
        assert!(db.accept_answer("q1", "a2").unwrap());
        let answers = db.list_answers("q1").unwrap();
        assert_eq!(answers[0].id, "a2");
        assert!(answers[0].is_accepted);
        assert!(!answers[1].is_accepted);
    }
}
