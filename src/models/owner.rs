use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Government document identifiers that can be linked to a phone owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Permanent account number: five letters, four digits, one letter.
    Pan,
    /// Tax deduction account number: four letters, five digits, one letter.
    Tan,
}

impl DocumentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pan => "PAN",
            Self::Tan => "TAN",
        }
    }

    /// Column in `phone_owners` holding this identifier.
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Pan => "pan_number",
            Self::Tan => "tan_number",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneOwner {
    pub phone_number: String,
    pub pan_number: Option<String>,
    pub tan_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PhoneOwner {
    pub fn document(&self, kind: DocumentKind) -> Option<&str> {
        match kind {
            DocumentKind::Pan => self.pan_number.as_deref(),
            DocumentKind::Tan => self.tan_number.as_deref(),
        }
    }
}
