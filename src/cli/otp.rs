use anyhow::Result;

use super::OtpAction;
use crate::db::Database;
use crate::identity::normalize_phone;
use crate::otp::{OtpError, OtpVerifier, MSG_VERIFIED};

pub fn run_otp(db: &Database, otp: &OtpVerifier, action: OtpAction) -> Result<()> {
    match action {
        OtpAction::Issue { phone } => {
            let phone = normalize_phone(&phone);
            let issued = otp.issue(db, &phone)?;
            println!("{}", issued.message);
            println!("Expires: {}", issued.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        OtpAction::Verify { phone, code } => {
            let phone = normalize_phone(&phone);
            match otp.verify(db, &phone, &code) {
                Ok(_) => println!("{}", MSG_VERIFIED),
                Err(OtpError::Storage(e)) => return Err(e),
                Err(e) => println!("{}", e),
            }
        }
        OtpAction::Status { phone } => {
            let phone = normalize_phone(&phone);
            match otp.status(db, &phone)? {
                Some(record) => {
                    println!("Phone:     {}", record.phone_number);
                    println!("Verified:  {}", if record.is_verified { "yes" } else { "no" });
                    println!("Attempts:  {}/{}", record.attempts, otp.max_attempts());
                    println!("Created:   {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
                    println!("Expires:   {}", record.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
                    if let Some(at) = record.verified_at {
                        println!("Verified:  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                }
                None => println!("No OTP found for {}.", phone),
            }
        }
    }
    Ok(())
}
