//! Phone owner registry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{format_datetime, parse_datetime, Database};
use crate::models::{DocumentKind, PhoneOwner};

impl Database {
    /// Get-or-create the owner record for a normalized phone number.
    ///
    /// Safe under concurrent creation: the insert is ignored when the row
    /// already exists and the row is read back afterwards.
    pub fn ensure_phone_owner(&self, phone_number: &str, now: DateTime<Utc>) -> Result<PhoneOwner> {
        self.conn.execute(
            "INSERT OR IGNORE INTO phone_owners (phone_number, created_at) VALUES (?, ?)",
            rusqlite::params![phone_number, format_datetime(now)],
        )?;

        self.get_phone_owner(phone_number)?
            .ok_or_else(|| anyhow::anyhow!("phone owner {} vanished after insert", phone_number))
    }

    pub fn get_phone_owner(&self, phone_number: &str) -> Result<Option<PhoneOwner>> {
        let owner = self
            .conn
            .query_row(
                "SELECT phone_number, pan_number, tan_number, created_at
                 FROM phone_owners WHERE phone_number = ?",
                [phone_number],
                |row| {
                    Ok(PhoneOwner {
                        phone_number: row.get(0)?,
                        pan_number: row.get(1)?,
                        tan_number: row.get(2)?,
                        created_at: parse_datetime(3, &row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(owner)
    }

    /// Store a document identifier for a phone, overwriting any earlier value.
    ///
    /// The value is trimmed and uppercased. The owner row is created if needed.
    pub fn record_document_id(
        &self,
        phone_number: &str,
        kind: DocumentKind,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<PhoneOwner> {
        self.ensure_phone_owner(phone_number, now)?;

        let normalized = value.trim().to_uppercase();
        let sql = format!(
            "UPDATE phone_owners SET {} = ? WHERE phone_number = ?",
            kind.column()
        );
        self.conn
            .execute(&sql, rusqlite::params![normalized, phone_number])?;

        self.get_phone_owner(phone_number)?
            .ok_or_else(|| anyhow::anyhow!("phone owner {} missing", phone_number))
    }
}
