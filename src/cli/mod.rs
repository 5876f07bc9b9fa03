use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod history;
pub mod otp;
pub mod slots;

pub use history::run_history;
pub use otp::run_otp;
pub use slots::{run_release, run_slots};

#[derive(Parser)]
#[command(name = "chatbridge")]
#[command(about = "Phone-verified chat bridge in front of a dialogue engine")]
#[command(version)]
pub struct Cli {
    /// Database file (defaults to CHATBRIDGE_DATABASE_PATH or the data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Show the session slot pool
    Slots,
    /// Release the slot held by a session
    Release(ReleaseArgs),
    /// Issue, verify or inspect one-time passcodes
    Otp(OtpArgs),
    /// Print the conversation history for a phone number
    History(HistoryArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct ReleaseArgs {
    /// Session id
    pub session_id: String,
}

#[derive(Args)]
pub struct OtpArgs {
    #[command(subcommand)]
    pub action: OtpAction,
}

#[derive(Subcommand)]
pub enum OtpAction {
    /// Issue a code unless one is already active
    Issue { phone: String },
    /// Check a code
    Verify { phone: String, code: String },
    /// Show the newest passcode record
    Status { phone: String },
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Phone number
    pub phone: String,
    /// Print the raw transcript instead of the conversation log
    #[arg(long)]
    pub transcript: bool,
}
