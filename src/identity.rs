//! Phone number normalization and document identifier recognition.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::DocumentKind;

/// Minimum digit count for free text to be treated as a phone number.
pub const MIN_PHONE_DIGITS: usize = 10;

/// Length of PAN and TAN identifiers.
pub const DOCUMENT_ID_LEN: usize = 10;

/// Reduce a phone number to its digits.
///
/// Falls back to the trimmed input when it contains no digits at all.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        raw.trim().to_string()
    } else {
        digits
    }
}

/// True when the text, ignoring surrounding whitespace, is a run of at
/// least ten digits.
pub fn looks_like_phone_number(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() >= MIN_PHONE_DIGITS && trimmed.chars().all(|c| c.is_ascii_digit())
}

fn pan_pattern() -> &'static Regex {
    static PAN: OnceLock<Regex> = OnceLock::new();
    PAN.get_or_init(|| Regex::new(r"(?i)\b[A-Z]{5}[0-9]{4}[A-Z]\b").expect("valid PAN pattern"))
}

fn tan_pattern() -> &'static Regex {
    static TAN: OnceLock<Regex> = OnceLock::new();
    TAN.get_or_init(|| Regex::new(r"(?i)\b[A-Z]{4}[0-9]{5}[A-Z]\b").expect("valid TAN pattern"))
}

/// Find the first identifier of the given kind in free text, uppercased.
pub fn extract_document_id(kind: DocumentKind, text: &str) -> Option<String> {
    let pattern = match kind {
        DocumentKind::Pan => pan_pattern(),
        DocumentKind::Tan => tan_pattern(),
    };
    pattern.find(text).map(|m| m.as_str().to_uppercase())
}

/// All identifiers recognized in a message, PAN first.
pub fn extract_document_ids(text: &str) -> Vec<(DocumentKind, String)> {
    [DocumentKind::Pan, DocumentKind::Tan]
        .into_iter()
        .filter_map(|kind| extract_document_id(kind, text).map(|id| (kind, id)))
        .collect()
}

/// Trim and uppercase a user-supplied identifier, rejecting wrong lengths.
pub fn normalize_document_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_uppercase();
    if id.chars().count() == DOCUMENT_ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(id)
    } else {
        None
    }
}
