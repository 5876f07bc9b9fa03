//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConsentPurpose, ConsentStatus, ConversationEntry, Role};

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResponse {
    pub session_id: String,
    pub released: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpGenerateRequest {
    pub phone_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpVerifyRequest {
    pub phone_number: String,
    pub otp_code: String,
}

/// Outcome of a generate or verify call.
#[derive(Debug, Clone, Serialize)]
pub struct OtpResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OtpResponse {
    pub fn ok(message: impl Into<String>, phone_number: &str) -> Self {
        Self {
            success: true,
            message: message.into(),
            phone_number: Some(phone_number.to_string()),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedResponse {
    pub phone_number: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanStatusRequest {
    pub pan_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PanStatusResponse {
    pub pan_number: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TanStatusRequest {
    pub tan_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TanStatusResponse {
    pub tan_number: String,
    pub status: String,
    pub message: String,
}

/// Explicitly link a PAN to a phone.
#[derive(Debug, Clone, Deserialize)]
pub struct SavePanRequest {
    pub phone_number: String,
    pub pan_number: String,
}

/// Explicitly link a TAN to a phone.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveTanRequest {
    pub phone_number: String,
    pub tan_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsurePhoneResponse {
    pub phone_number: String,
    pub created: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentGrantRequest {
    pub phone_number: String,
    pub purpose: ConsentPurpose,
    pub granted: bool,
    pub consent_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentCheckRequest {
    pub phone_number: String,
    pub purpose: ConsentPurpose,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentRevokeRequest {
    pub phone_number: String,
    pub purpose: ConsentPurpose,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsentCheckResponse {
    pub has_consent: bool,
    pub consent_status: ConsentStatus,
    pub consent_version: Option<String>,
    pub granted_at: Option<DateTime<Utc>>,
    pub requires_new_consent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentRevokeResponse {
    pub message: String,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationLine {
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<ConversationEntry> for ConversationLine {
    fn from(entry: ConversationEntry) -> Self {
        Self {
            role: entry.role,
            message: entry.message,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationsResponse {
    pub phone_number: String,
    pub conversations: Vec<ConversationLine>,
    /// Newline-joined phone transcript, empty when none exists.
    pub transcript: String,
}
