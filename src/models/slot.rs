use chrono::{DateTime, Utc};
use serde::Serialize;

/// One unit of the admission pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub slot_number: u32,
    pub is_busy: bool,
    pub session_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
}

/// Outcome of an acquire call.
///
/// `slot` is 0 while `waiting` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub slot: u32,
    pub waiting: bool,
}

impl Admission {
    pub fn granted(slot: u32) -> Self {
        Self {
            slot,
            waiting: false,
        }
    }

    pub fn waiting() -> Self {
        Self {
            slot: 0,
            waiting: true,
        }
    }
}
