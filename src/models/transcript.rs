use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bot" | "assistant" => Self::Bot,
            _ => Self::User,
        }
    }

    /// Prefix used for transcript lines.
    pub fn speaker(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Bot => "Bot",
        }
    }

    pub fn line(&self, message: &str) -> String {
        format!("{}: {}", self.speaker(), message)
    }
}

/// Append-only, newline-joined log for a session or a phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub key: String,
    pub phone_number: Option<String>,
    pub history: String,
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    pub fn is_blank(&self) -> bool {
        self.history.trim().is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.history.lines().filter(|l| !l.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationEntry {
    pub id: i64,
    pub phone_number: String,
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
