use anyhow::Result;

use super::OptionalExt;
use crate::models::OtpCheck;
use crate::{Database, SQL_NOW};

impl Database {
    /// Store a new code hash for `(user, purpose)`, retiring any earlier one.
    pub fn insert_otp(&self, id: &str, user_id: &str, purpose: &str, code_hash: &str, ttl_minutes: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE otp_codes SET consumed = 1 WHERE user_id = ?1 AND purpose = ?2 AND consumed = 0",
                (user_id, purpose),
            )?;
            tx.execute(
                "INSERT INTO otp_codes (id, user_id, purpose, code_hash, expires_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%d %H:%M:%f', 'now', ?5))",
                (id, user_id, purpose, code_hash, format!("{:+} minutes", ttl_minutes)),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Check a code hash against the live code for `(user, purpose)`.
    /// A match consumes the code; a miss counts as an attempt.
    pub fn check_otp(&self, user_id: &str, purpose: &str, code_hash: &str, max_attempts: u32) -> Result<OtpCheck> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let live: Option<(String, String, u32, bool)> = tx
                .query_row(
                    &format!(
                        "SELECT id, code_hash, attempts, expires_at > {SQL_NOW}
                         FROM otp_codes
                         WHERE user_id = ?1 AND purpose = ?2 AND consumed = 0
                         ORDER BY created_at DESC LIMIT 1"
                    ),
                    (user_id, purpose),
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((id, stored_hash, attempts, fresh)) = live else {
                return Ok(OtpCheck::NotFound);
            };

            let outcome = if !fresh {
                OtpCheck::Expired
            } else if attempts >= max_attempts {
                OtpCheck::TooManyAttempts
            } else if stored_hash == code_hash {
                tx.execute("UPDATE otp_codes SET consumed = 1 WHERE id = ?1", [&id])?;
                OtpCheck::Valid
            } else {
                tx.execute("UPDATE otp_codes SET attempts = attempts + 1 WHERE id = ?1", [&id])?;
                OtpCheck::Invalid
            };

            tx.commit()?;
            Ok(outcome)
        })
    }
}
