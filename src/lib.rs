pub mod cli;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod identity;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod otp;
pub mod server;
pub mod slots;

pub use db::Database;
