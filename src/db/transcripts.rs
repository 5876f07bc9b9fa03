//! Session and phone transcripts plus the consolidated conversation log.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_datetime, parse_datetime, Database};
use crate::models::{ConversationEntry, Role, Transcript};

impl Database {
    /// Append one line to a session transcript, creating it if needed.
    ///
    /// The phone link is only filled in when the row does not have one yet.
    pub fn append_session_transcript(
        &self,
        session_id: &str,
        phone_number: Option<&str>,
        line: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO session_transcripts (session_id, phone_number, history, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 history = CASE WHEN history = '' THEN excluded.history
                                ELSE history || char(10) || excluded.history END,
                 phone_number = COALESCE(phone_number, excluded.phone_number),
                 updated_at = excluded.updated_at",
            rusqlite::params![session_id, phone_number, line, format_datetime(now)],
        )?;
        Ok(())
    }

    /// Append one line to the per-phone transcript, creating it if needed.
    pub fn append_phone_transcript(
        &self,
        phone_number: &str,
        line: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO phone_transcripts (phone_number, history, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(phone_number) DO UPDATE SET
                 history = CASE WHEN history = '' THEN excluded.history
                                ELSE history || char(10) || excluded.history END,
                 updated_at = excluded.updated_at",
            rusqlite::params![phone_number, line, format_datetime(now)],
        )?;
        Ok(())
    }

    pub fn get_session_transcript(&self, session_id: &str) -> Result<Option<Transcript>> {
        let transcript = self
            .conn
            .query_row(
                "SELECT session_id, phone_number, history, updated_at
                 FROM session_transcripts WHERE session_id = ?",
                [session_id],
                |row| {
                    Ok(Transcript {
                        key: row.get(0)?,
                        phone_number: row.get(1)?,
                        history: row.get(2)?,
                        updated_at: parse_datetime(3, &row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(transcript)
    }

    pub fn get_phone_transcript(&self, phone_number: &str) -> Result<Option<Transcript>> {
        let transcript = self
            .conn
            .query_row(
                "SELECT phone_number, history, updated_at
                 FROM phone_transcripts WHERE phone_number = ?",
                [phone_number],
                |row| {
                    let key: String = row.get(0)?;
                    Ok(Transcript {
                        phone_number: Some(key.clone()),
                        key,
                        history: row.get(1)?,
                        updated_at: parse_datetime(2, &row.get::<_, String>(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(transcript)
    }

    /// Insert a row into the consolidated conversation log.
    pub fn insert_conversation(
        &self,
        phone_number: &str,
        role: Role,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO conversations (phone_number, role, message, created_at) VALUES (?, ?, ?, ?)",
            rusqlite::params![phone_number, role.as_str(), message, format_datetime(now)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Conversation rows for a phone, oldest first.
    pub fn list_conversations(&self, phone_number: &str) -> Result<Vec<ConversationEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phone_number, role, message, created_at
             FROM conversations WHERE phone_number = ?
             ORDER BY id ASC",
        )?;

        let entries = stmt
            .query_map([phone_number], |row| {
                Ok(ConversationEntry {
                    id: row.get(0)?,
                    phone_number: row.get(1)?,
                    role: Role::from_str(&row.get::<_, String>(2)?),
                    message: row.get(3)?,
                    created_at: parse_datetime(4, &row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}
