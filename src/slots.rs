//! Bounded admission of concurrent chat sessions.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::config::SlotConfig;
use crate::db::Database;
use crate::models::Admission;

#[derive(Debug, Clone, Copy)]
pub struct SlotController {
    pool_size: u32,
    ttl: Duration,
}

impl SlotController {
    pub fn new(pool_size: u32, ttl: Duration) -> Self {
        Self { pool_size, ttl }
    }

    pub fn from_config(config: &SlotConfig) -> Self {
        Self::new(config.pool_size, config.ttl)
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn acquire(&self, db: &Database, session_id: &str) -> Result<Admission> {
        self.acquire_at(db, session_id, Utc::now())
    }

    /// Bind a slot to the session, or report that it has to wait.
    ///
    /// Stale slots are reclaimed first so abandoned sessions free up
    /// capacity without an explicit release.
    pub fn acquire_at(&self, db: &Database, session_id: &str, now: DateTime<Utc>) -> Result<Admission> {
        let created = db.init_slot_pool(self.pool_size)?;
        if created > 0 {
            tracing::info!(created, pool_size = self.pool_size, "slot pool initialized");
        }

        let freed = db.reclaim_stale_slots(now - self.ttl)?;
        if !freed.is_empty() {
            tracing::info!(slots = ?freed, "reclaimed stale slots");
        }

        if let Some(slot) = db.slot_for_session(session_id)? {
            return Ok(Admission::granted(slot));
        }

        match db.claim_free_slot(session_id, self.pool_size, now)? {
            Some(slot) => {
                tracing::debug!(session_id, slot, "slot acquired");
                Ok(Admission::granted(slot))
            }
            None => {
                tracing::info!(session_id, pool_size = self.pool_size, "slot pool exhausted");
                Ok(Admission::waiting())
            }
        }
    }

    /// Free the session's slot. False when it held none.
    pub fn release(&self, db: &Database, session_id: &str) -> Result<bool> {
        let released = db.release_slot(session_id)?;
        if released {
            tracing::debug!(session_id, "slot released");
        }
        Ok(released)
    }
}
