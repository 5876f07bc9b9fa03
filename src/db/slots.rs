//! Admission pool rows.
//!
//! Every state change is a single conditional statement so that several
//! processes sharing the database file cannot double-book a slot.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_datetime, parse_datetime, Database};
use crate::models::Slot;

impl Database {
    /// Create slots 1..=size that do not exist yet. Returns how many were added.
    pub fn init_slot_pool(&self, size: u32) -> Result<usize> {
        let existing: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM session_slots WHERE slot_number <= ?",
            [size],
            |row| row.get(0),
        )?;
        if existing >= size {
            return Ok(0);
        }

        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO session_slots (slot_number, is_busy) VALUES (?, 0)")?;
        let mut created = 0;
        for slot in 1..=size {
            created += stmt.execute([slot])?;
        }
        Ok(created)
    }

    /// Slot currently bound to a session, if any.
    pub fn slot_for_session(&self, session_id: &str) -> Result<Option<u32>> {
        let slot = self
            .conn
            .query_row(
                "SELECT slot_number FROM session_slots WHERE session_id = ? AND is_busy = 1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(slot)
    }

    /// Bind the lowest-numbered free slot to a session.
    ///
    /// Returns None when every slot in 1..=pool_size is busy. If another
    /// writer bound this session first, that binding is returned instead.
    pub fn claim_free_slot(
        &self,
        session_id: &str,
        pool_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let result = self
            .conn
            .query_row(
                "UPDATE session_slots
                 SET is_busy = 1, session_id = ?1, assigned_at = ?2
                 WHERE slot_number = (
                     SELECT slot_number FROM session_slots
                     WHERE is_busy = 0 AND slot_number <= ?3
                     ORDER BY slot_number ASC LIMIT 1
                 ) AND is_busy = 0
                 RETURNING slot_number",
                rusqlite::params![session_id, format_datetime(now), pool_size],
                |row| row.get::<_, u32>(0),
            )
            .optional();

        match result {
            Ok(slot) => Ok(slot),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                self.slot_for_session(session_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Free whatever slot is bound to a session. Returns true if one was freed.
    pub fn release_slot(&self, session_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE session_slots SET is_busy = 0, session_id = NULL, assigned_at = NULL
             WHERE session_id = ?",
            [session_id],
        )?;
        Ok(rows > 0)
    }

    /// Free busy slots whose sessions have gone quiet.
    ///
    /// A busy slot is reclaimed when it has no session id, or when it was
    /// assigned before `cutoff` and its session transcript is either missing
    /// or was last updated before `cutoff`. Returns the freed slot numbers.
    pub fn reclaim_stale_slots(&self, cutoff: DateTime<Utc>) -> Result<Vec<u32>> {
        let mut stmt = self.conn.prepare(
            "UPDATE session_slots
             SET is_busy = 0, session_id = NULL, assigned_at = NULL
             WHERE is_busy = 1 AND (
                 session_id IS NULL
                 OR (
                     (assigned_at IS NULL OR assigned_at < ?1)
                     AND NOT EXISTS (
                         SELECT 1 FROM session_transcripts t
                         WHERE t.session_id = session_slots.session_id
                           AND t.updated_at >= ?1
                     )
                 )
             )
             RETURNING slot_number",
        )?;

        let freed = stmt
            .query_map([format_datetime(cutoff)], |row| row.get::<_, u32>(0))?
            .collect::<rusqlite::Result<Vec<u32>>>()?;
        Ok(freed)
    }

    pub fn list_slots(&self) -> Result<Vec<Slot>> {
        let mut stmt = self.conn.prepare(
            "SELECT slot_number, is_busy, session_id, assigned_at
             FROM session_slots ORDER BY slot_number ASC",
        )?;

        let slots = stmt
            .query_map([], |row| {
                Ok(Slot {
                    slot_number: row.get(0)?,
                    is_busy: row.get::<_, i64>(1)? != 0,
                    session_id: row.get(2)?,
                    assigned_at: row
                        .get::<_, Option<String>>(3)?
                        .map(|s| parse_datetime(3, &s))
                        .transpose()?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(slots)
    }

    #[cfg(test)]
    pub(crate) fn force_slot_state(
        &self,
        slot_number: u32,
        session_id: Option<&str>,
        assigned_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE session_slots SET is_busy = 1, session_id = ?, assigned_at = ?
             WHERE slot_number = ?",
            rusqlite::params![session_id, assigned_at.map(format_datetime), slot_number],
        )?;
        Ok(())
    }
}
