use anyhow::Result;

use crate::db::Database;
use crate::slots::SlotController;

/// Print every slot with its binding.
pub fn run_slots(db: &Database, slots: &SlotController) -> Result<()> {
    db.init_slot_pool(slots.pool_size())?;
    let rows = db.list_slots()?;

    println!("{:<6}  {:<6}  {:<38}  ASSIGNED", "SLOT", "STATE", "SESSION");
    for slot in &rows {
        let state = if slot.is_busy { "busy" } else { "free" };
        let assigned = slot
            .assigned_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{:<6}  {:<6}  {:<38}  {}",
            slot.slot_number,
            state,
            slot.session_id.as_deref().unwrap_or("-"),
            assigned
        );
    }

    let busy = rows.iter().filter(|s| s.is_busy).count();
    println!();
    println!("{} of {} slots busy", busy, rows.len());
    Ok(())
}

pub fn run_release(db: &Database, slots: &SlotController, session_id: &str) -> Result<()> {
    if slots.release(db, session_id.trim())? {
        println!("Released slot for session {}.", session_id.trim());
    } else {
        println!("Session {} holds no slot.", session_id.trim());
    }
    Ok(())
}
