//! One-time passcode issuance and verification.
//!
//! A phone moves NONE -> ISSUED -> {VERIFIED | EXPIRED | ATTEMPTS_EXHAUSTED}.
//! Verification only ever looks at the newest record, so a code superseded
//! by a later issuance is dead.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::config::OtpConfig;
use crate::db::Database;
use crate::models::PasscodeRecord;

pub const CODE_LEN: usize = 6;

pub const MSG_SENT: &str = "OTP sent successfully. Please enter the 6-digit code.";
pub const MSG_ALREADY_SENT: &str =
    "OTP already sent. Please check your messages or wait for expiry.";
pub const MSG_VERIFIED: &str = "OTP verified successfully! You can now access your chat history.";
const MSG_NOT_FOUND: &str = "No OTP found for this phone number. Please request a new OTP.";
const MSG_EXPIRED: &str = "OTP has expired. Please request a new OTP.";
const MSG_EXHAUSTED: &str = "Maximum verification attempts exceeded. Please request a new OTP.";

/// True for exactly six ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("{}", MSG_NOT_FOUND)]
    NotFound,
    #[error("{}", MSG_EXPIRED)]
    Expired,
    #[error("{}", MSG_EXHAUSTED)]
    AttemptsExhausted,
    #[error("{}", mismatch_message(.remaining))]
    Mismatch { remaining: u32 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn mismatch_message(remaining: &u32) -> String {
    if *remaining == 0 {
        MSG_EXHAUSTED.to_string()
    } else {
        format!("Invalid OTP. {} attempts remaining.", remaining)
    }
}

impl OtpError {
    /// Whether the user needs a fresh code to make progress.
    pub fn requires_reissue(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired | Self::AttemptsExhausted)
    }
}

/// Where new codes come from.
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> String;

    /// Codes that may be shown back to the user, such as a testing code.
    fn is_public(&self) -> bool {
        false
    }
}

/// Same code every time. Used while no delivery channel exists.
#[derive(Debug, Clone)]
pub struct FixedCode(pub String);

impl CodeSource for FixedCode {
    fn next_code(&self) -> String {
        self.0.clone()
    }

    fn is_public(&self) -> bool {
        true
    }
}

/// Uniformly random six-digit codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCode;

impl CodeSource for RandomCode {
    fn next_code(&self) -> String {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{:06}", n)
    }
}

/// Result of an issue call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedOtp {
    pub phone_number: String,
    pub expires_at: DateTime<Utc>,
    /// An active code already existed and was left untouched.
    pub already_sent: bool,
    pub message: String,
}

#[derive(Clone)]
pub struct OtpVerifier {
    ttl: Duration,
    max_attempts: u32,
    codes: Arc<dyn CodeSource>,
}

impl OtpVerifier {
    pub fn new(ttl: Duration, max_attempts: u32, codes: Arc<dyn CodeSource>) -> Self {
        Self {
            ttl,
            max_attempts,
            codes,
        }
    }

    pub fn from_config(config: &OtpConfig) -> Self {
        let codes: Arc<dyn CodeSource> = match &config.fixed_code {
            Some(code) => Arc::new(FixedCode(code.clone())),
            None => Arc::new(RandomCode),
        };
        Self::new(config.ttl, config.max_attempts, codes)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn issue(&self, db: &Database, phone_number: &str) -> Result<IssuedOtp> {
        self.issue_at(db, phone_number, Utc::now())
    }

    /// Issue a code unless an active one exists, in which case that one is
    /// reported unchanged.
    pub fn issue_at(&self, db: &Database, phone_number: &str, now: DateTime<Utc>) -> Result<IssuedOtp> {
        // Storage keeps microseconds; match it so a later read reports the same expiry.
        let now = now.trunc_subsecs(6);
        db.ensure_phone_owner(phone_number, now)?;

        let code = self.codes.next_code();
        let expires_at = now + self.ttl;

        if db.insert_otp_if_none_active(phone_number, &code, now, expires_at)? {
            tracing::info!(phone = %phone_number, %expires_at, "otp issued");
            let message = if self.codes.is_public() {
                format!("{} (For testing: {})", MSG_SENT, code)
            } else {
                MSG_SENT.to_string()
            };
            return Ok(IssuedOtp {
                phone_number: phone_number.to_string(),
                expires_at,
                already_sent: false,
                message,
            });
        }

        let existing = db.active_otp(phone_number, now)?;
        tracing::debug!(phone = %phone_number, "otp already active");
        Ok(IssuedOtp {
            phone_number: phone_number.to_string(),
            expires_at: existing.map(|r| r.expires_at).unwrap_or(expires_at),
            already_sent: true,
            message: MSG_ALREADY_SENT.to_string(),
        })
    }

    pub fn verify(&self, db: &Database, phone_number: &str, code: &str) -> Result<PasscodeRecord, OtpError> {
        self.verify_at(db, phone_number, code, Utc::now())
    }

    /// Check a code against the newest record for the phone.
    ///
    /// Every comparison costs one attempt, charged atomically before the
    /// code is compared.
    pub fn verify_at(
        &self,
        db: &Database,
        phone_number: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<PasscodeRecord, OtpError> {
        let now = now.trunc_subsecs(6);
        let record = db
            .latest_otp(phone_number)?
            .filter(|r| !r.is_verified)
            .ok_or(OtpError::NotFound)?;

        if record.is_expired(now) {
            return Err(OtpError::Expired);
        }
        if record.attempts >= self.max_attempts {
            return Err(OtpError::AttemptsExhausted);
        }

        let attempts = db
            .increment_otp_attempts(record.id, self.max_attempts)?
            .ok_or(OtpError::AttemptsExhausted)?;

        if record.code == code.trim() {
            db.mark_otp_verified(record.id, now)?;
            tracing::info!(phone = %phone_number, attempts, "otp verified");
            return Ok(PasscodeRecord {
                is_verified: true,
                attempts,
                verified_at: Some(now),
                ..record
            });
        }

        let remaining = self.max_attempts.saturating_sub(attempts);
        tracing::info!(phone = %phone_number, remaining, "otp mismatch");
        Err(OtpError::Mismatch { remaining })
    }

    pub fn is_verified(&self, db: &Database, phone_number: &str) -> Result<bool> {
        self.is_verified_at(db, phone_number, Utc::now())
    }

    /// Newest record is verified and still inside its validity window.
    pub fn is_verified_at(&self, db: &Database, phone_number: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(db
            .latest_otp(phone_number)?
            .map(|r| r.is_verified && !r.is_expired(now))
            .unwrap_or(false))
    }

    /// Newest record in any state.
    pub fn status(&self, db: &Database, phone_number: &str) -> Result<Option<PasscodeRecord>> {
        db.latest_otp(phone_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const PHONE: &str = "9876543210";

    /// Hands out 100001, 100002, ...
    struct SequenceCode(AtomicU32);

    impl CodeSource for SequenceCode {
        fn next_code(&self) -> String {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{:06}", 100_000 + n)
        }
    }

    fn fixed() -> OtpVerifier {
        OtpVerifier::new(Duration::minutes(5), 3, Arc::new(FixedCode("000000".to_string())))
    }

    fn sequence() -> OtpVerifier {
        OtpVerifier::new(Duration::minutes(5), 3, Arc::new(SequenceCode(AtomicU32::new(0))))
    }

    #[test]
    fn test_valid_code() {
        assert!(is_valid_code("000000"));
        assert!(!is_valid_code("00000"));
        assert!(!is_valid_code("12345a"));
    }

    #[test]
    fn test_random_code_shape() {
        for _ in 0..20 {
            assert!(is_valid_code(&RandomCode.next_code()));
        }
        assert!(!RandomCode.is_public());
    }

    #[test]
    fn test_issue_is_idempotent_while_active() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        let now = Utc::now();

        let first = otp.issue_at(&db, PHONE, now).unwrap();
        assert!(!first.already_sent);
        assert_eq!(
            first.message,
            "OTP sent successfully. Please enter the 6-digit code. (For testing: 000000)"
        );

        let second = otp
            .issue_at(&db, PHONE, now + Duration::minutes(1))
            .unwrap();
        assert!(second.already_sent);
        assert_eq!(second.message, MSG_ALREADY_SENT);
        assert_eq!(second.expires_at, first.expires_at);

        let stored = otp.status(&db, PHONE).unwrap().unwrap();
        assert_eq!(stored.expires_at, first.expires_at);
    }

    #[test]
    fn test_random_codes_are_not_revealed() {
        let db = Database::open_memory().unwrap();
        let otp = OtpVerifier::new(Duration::minutes(5), 3, Arc::new(RandomCode));
        let issued = otp.issue(&db, PHONE).unwrap();
        assert_eq!(issued.message, MSG_SENT);
    }

    #[test]
    fn test_verify_success() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        let now = Utc::now();
        otp.issue_at(&db, PHONE, now).unwrap();

        let rec = otp.verify_at(&db, PHONE, "000000", now).unwrap();
        assert!(rec.is_verified);
        assert_eq!(rec.attempts, 1);
        assert!(otp.is_verified_at(&db, PHONE, now).unwrap());
    }

    #[test]
    fn test_verify_without_record() {
        let db = Database::open_memory().unwrap();
        let err = fixed().verify(&db, PHONE, "000000").unwrap_err();
        assert!(matches!(err, OtpError::NotFound));
        assert!(err.requires_reissue());
        assert_eq!(
            err.to_string(),
            "No OTP found for this phone number. Please request a new OTP."
        );
    }

    #[test]
    fn test_verify_after_expiry() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        let now = Utc::now();
        otp.issue_at(&db, PHONE, now).unwrap();

        let err = otp
            .verify_at(&db, PHONE, "000000", now + Duration::minutes(6))
            .unwrap_err();
        assert!(matches!(err, OtpError::Expired));
    }

    #[test]
    fn test_superseded_code_fails() {
        let db = Database::open_memory().unwrap();
        let otp = sequence();
        let now = Utc::now();

        otp.issue_at(&db, PHONE, now).unwrap(); // 100001
        let later = now + Duration::minutes(6);
        otp.issue_at(&db, PHONE, later).unwrap(); // 100002

        let err = otp.verify_at(&db, PHONE, "100001", later).unwrap_err();
        assert!(matches!(err, OtpError::Mismatch { remaining: 2 }));
        assert!(otp.verify_at(&db, PHONE, "100002", later).is_ok());
    }

    #[test]
    fn test_attempt_budget() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        let now = Utc::now();
        otp.issue_at(&db, PHONE, now).unwrap();

        let e1 = otp.verify_at(&db, PHONE, "111111", now).unwrap_err();
        assert_eq!(e1.to_string(), "Invalid OTP. 2 attempts remaining.");
        assert!(!e1.requires_reissue());

        let e2 = otp.verify_at(&db, PHONE, "111111", now).unwrap_err();
        assert_eq!(e2.to_string(), "Invalid OTP. 1 attempts remaining.");

        let e3 = otp.verify_at(&db, PHONE, "111111", now).unwrap_err();
        assert!(matches!(e3, OtpError::Mismatch { remaining: 0 }));
        assert_eq!(
            e3.to_string(),
            "Maximum verification attempts exceeded. Please request a new OTP."
        );

        // Budget spent: even the right code is refused.
        let e4 = otp.verify_at(&db, PHONE, "000000", now).unwrap_err();
        assert!(matches!(e4, OtpError::AttemptsExhausted));
        assert!(!otp.is_verified_at(&db, PHONE, now).unwrap());
    }

    #[test]
    fn test_verification_lapses_with_expiry() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        let now = Utc::now();
        otp.issue_at(&db, PHONE, now).unwrap();
        otp.verify_at(&db, PHONE, "000000", now).unwrap();

        assert!(otp.is_verified_at(&db, PHONE, now + Duration::minutes(4)).unwrap());
        assert!(!otp.is_verified_at(&db, PHONE, now + Duration::minutes(6)).unwrap());
    }

    #[test]
    fn test_verified_record_cannot_be_reused() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        let now = Utc::now();
        otp.issue_at(&db, PHONE, now).unwrap();
        otp.verify_at(&db, PHONE, "000000", now).unwrap();

        let err = otp.verify_at(&db, PHONE, "000000", now).unwrap_err();
        assert!(matches!(err, OtpError::NotFound));
    }

    #[test]
    fn test_status_hides_code() {
        let db = Database::open_memory().unwrap();
        let otp = fixed();
        assert!(otp.status(&db, PHONE).unwrap().is_none());
        otp.issue(&db, PHONE).unwrap();
        let rec = otp.status(&db, PHONE).unwrap().unwrap();
        assert_eq!(rec.attempts, 0);
        assert!(!serde_json::to_string(&rec).unwrap().contains("000000"));
    }
}
