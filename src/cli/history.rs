use anyhow::Result;

use crate::db::Database;
use crate::identity::normalize_phone;

/// Print what a phone number has said and been told.
pub fn run_history(db: &Database, phone: &str, transcript: bool) -> Result<()> {
    let phone = normalize_phone(phone);

    if let Some(owner) = db.get_phone_owner(&phone)? {
        let pan = owner.pan_number.as_deref().unwrap_or("-");
        let tan = owner.tan_number.as_deref().unwrap_or("-");
        println!("{}  PAN {}  TAN {}", owner.phone_number, pan, tan);
    } else {
        println!("No records for {}.", phone);
        return Ok(());
    }
    println!();

    if transcript {
        match db.get_phone_transcript(&phone)? {
            Some(t) if !t.is_blank() => {
                for line in t.lines() {
                    println!("{}", line);
                }
            }
            _ => println!("No transcript."),
        }
        return Ok(());
    }

    let entries = db.list_conversations(&phone)?;
    if entries.is_empty() {
        println!("No conversations.");
    }
    for entry in entries {
        println!(
            "{}  {:<4}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.role.as_str(),
            entry.message
        );
    }
    Ok(())
}
