use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the consent notice currently shown to users.
pub const CURRENT_CONSENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentPurpose {
    PanTanAssistance,
    DataAnalytics,
    Marketing,
    CustomerSupport,
}

impl ConsentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PanTanAssistance => "PAN_TAN_ASSISTANCE",
            Self::DataAnalytics => "DATA_ANALYTICS",
            Self::Marketing => "MARKETING",
            Self::CustomerSupport => "CUSTOMER_SUPPORT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentStatus {
    Granted,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentRecord {
    pub id: i64,
    pub phone_number: String,
    pub purpose: String,
    pub consent_version: String,
    pub granted: bool,
    pub granted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub consent_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
