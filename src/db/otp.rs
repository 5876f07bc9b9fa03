//! Passcode record storage.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_datetime, parse_datetime, Database};
use crate::models::PasscodeRecord;

const OTP_COLUMNS: &str =
    "id, phone_number, code, is_verified, attempts, created_at, expires_at, verified_at";

impl Database {
    /// Insert a passcode unless the phone already has an active one.
    ///
    /// The existence check and the insert are one statement, so concurrent
    /// issuers cannot create two active records. Returns true if inserted.
    pub fn insert_otp_if_none_active(
        &self,
        phone_number: &str,
        code: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT INTO otp_records (phone_number, code, created_at, expires_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE NOT EXISTS (
                 SELECT 1 FROM otp_records
                 WHERE phone_number = ?1 AND is_verified = 0 AND expires_at >= ?3
             )",
            rusqlite::params![
                phone_number,
                code,
                format_datetime(now),
                format_datetime(expires_at)
            ],
        )?;
        Ok(rows > 0)
    }

    /// Most recently created record for a phone, in any state.
    pub fn latest_otp(&self, phone_number: &str) -> Result<Option<PasscodeRecord>> {
        let sql = format!(
            "SELECT {} FROM otp_records WHERE phone_number = ? ORDER BY id DESC LIMIT 1",
            OTP_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, [phone_number], row_to_passcode)
            .optional()?;
        Ok(record)
    }

    /// Newest unverified, unexpired record for a phone.
    pub fn active_otp(&self, phone_number: &str, now: DateTime<Utc>) -> Result<Option<PasscodeRecord>> {
        let sql = format!(
            "SELECT {} FROM otp_records
             WHERE phone_number = ? AND is_verified = 0 AND expires_at >= ?
             ORDER BY id DESC LIMIT 1",
            OTP_COLUMNS
        );
        let record = self
            .conn
            .query_row(
                &sql,
                rusqlite::params![phone_number, format_datetime(now)],
                row_to_passcode,
            )
            .optional()?;
        Ok(record)
    }

    /// Charge one attempt against a record if budget remains.
    ///
    /// Returns the new attempt count, or None when the budget was already
    /// spent (possibly by a concurrent verifier).
    pub fn increment_otp_attempts(&self, id: i64, max_attempts: u32) -> Result<Option<u32>> {
        let attempts = self
            .conn
            .query_row(
                "UPDATE otp_records SET attempts = attempts + 1
                 WHERE id = ? AND attempts < ?
                 RETURNING attempts",
                rusqlite::params![id, max_attempts],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(attempts)
    }

    pub fn mark_otp_verified(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE otp_records SET is_verified = 1, verified_at = ? WHERE id = ?",
            rusqlite::params![format_datetime(now), id],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_passcode(row: &rusqlite::Row) -> rusqlite::Result<PasscodeRecord> {
    Ok(PasscodeRecord {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        code: row.get(2)?,
        is_verified: row.get::<_, i64>(3)? != 0,
        attempts: row.get(4)?,
        created_at: parse_datetime(5, &row.get::<_, String>(5)?)?,
        expires_at: parse_datetime(6, &row.get::<_, String>(6)?)?,
        verified_at: row.get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(7, &s))
            .transpose()?,
    })
}
