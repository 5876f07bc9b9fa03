use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single issued one-time passcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasscodeRecord {
    pub id: i64,
    pub phone_number: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub is_verified: bool,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl PasscodeRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
