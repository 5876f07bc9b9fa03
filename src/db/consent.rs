//! Consent records per phone and purpose.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_datetime, parse_datetime, Database};
use crate::models::{ConsentPurpose, ConsentRecord};

/// Request metadata captured alongside a consent decision.
#[derive(Debug, Clone, Default)]
pub struct ConsentOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

const CONSENT_COLUMNS: &str = "id, phone_number, purpose, consent_version, granted, granted_at,
     revoked_at, consent_text, created_at, updated_at";

impl Database {
    /// Record a consent decision, superseding any open record for the purpose.
    pub fn record_consent(
        &self,
        phone_number: &str,
        purpose: ConsentPurpose,
        version: &str,
        granted: bool,
        consent_text: &str,
        origin: &ConsentOrigin,
        now: DateTime<Utc>,
    ) -> Result<ConsentRecord> {
        self.ensure_phone_owner(phone_number, now)?;
        let ts = format_datetime(now);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE consents SET revoked_at = ?1, updated_at = ?1
             WHERE phone_number = ?2 AND purpose = ?3 AND revoked_at IS NULL",
            rusqlite::params![ts, phone_number, purpose.as_str()],
        )?;
        tx.execute(
            "INSERT INTO consents
             (phone_number, purpose, consent_version, granted, granted_at, consent_text,
              ip_address, user_agent, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                phone_number,
                purpose.as_str(),
                version,
                granted,
                if granted { Some(ts.clone()) } else { None },
                consent_text,
                origin.ip_address,
                origin.user_agent,
                ts
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        self.get_consent(id)?
            .ok_or_else(|| anyhow::anyhow!("consent {} missing after insert", id))
    }

    pub fn get_consent(&self, id: i64) -> Result<Option<ConsentRecord>> {
        let sql = format!("SELECT {} FROM consents WHERE id = ?", CONSENT_COLUMNS);
        let record = self.conn.query_row(&sql, [id], row_to_consent).optional()?;
        Ok(record)
    }

    /// Newest granted, unrevoked consent for a purpose.
    pub fn active_consent(
        &self,
        phone_number: &str,
        purpose: ConsentPurpose,
    ) -> Result<Option<ConsentRecord>> {
        let sql = format!(
            "SELECT {} FROM consents
             WHERE phone_number = ? AND purpose = ? AND granted = 1 AND revoked_at IS NULL
             ORDER BY id DESC LIMIT 1",
            CONSENT_COLUMNS
        );
        let record = self
            .conn
            .query_row(
                &sql,
                rusqlite::params![phone_number, purpose.as_str()],
                row_to_consent,
            )
            .optional()?;
        Ok(record)
    }

    /// Revoke granted consents for a purpose. Returns how many were revoked.
    pub fn revoke_consent(
        &self,
        phone_number: &str,
        purpose: ConsentPurpose,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let ts = format_datetime(now);
        let rows = self.conn.execute(
            "UPDATE consents SET revoked_at = ?1, updated_at = ?1
             WHERE phone_number = ?2 AND purpose = ?3 AND granted = 1 AND revoked_at IS NULL",
            rusqlite::params![ts, phone_number, purpose.as_str()],
        )?;
        Ok(rows)
    }

    /// All consent records for a phone, newest first.
    pub fn consent_history(&self, phone_number: &str) -> Result<Vec<ConsentRecord>> {
        let sql = format!(
            "SELECT {} FROM consents WHERE phone_number = ? ORDER BY id DESC",
            CONSENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([phone_number], row_to_consent)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn row_to_consent(row: &rusqlite::Row) -> rusqlite::Result<ConsentRecord> {
    Ok(ConsentRecord {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        purpose: row.get(2)?,
        consent_version: row.get(3)?,
        granted: row.get::<_, i64>(4)? != 0,
        granted_at: row.get::<_, Option<String>>(5)?
            .map(|s| parse_datetime(5, &s))
            .transpose()?,
        revoked_at: row.get::<_, Option<String>>(6)?
            .map(|s| parse_datetime(6, &s))
            .transpose()?,
        consent_text: row.get(7)?,
        created_at: parse_datetime(8, &row.get::<_, String>(8)?)?,
        updated_at: parse_datetime(9, &row.get::<_, String>(9)?)?,
    })
}
