use clap::Parser;
use chatbridge::cli::{run_history, run_otp, run_release, run_slots, Cli, Commands};
use chatbridge::config::Config;
use chatbridge::db::Database;
use chatbridge::logging::init_logging;
use chatbridge::otp::OtpVerifier;
use chatbridge::server;
use chatbridge::slots::SlotController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = cli.db {
        config.database_path = Some(path);
    }
    init_logging(config.log_format);

    match cli.command {
        Commands::Serve(args) => {
            if let Some(port) = args.port {
                config.http_port = port;
            }
            server::serve(config).await?;
        }
        Commands::Slots => {
            let db = open_db(&config)?;
            run_slots(&db, &SlotController::from_config(&config.slots))?;
        }
        Commands::Release(args) => {
            let db = open_db(&config)?;
            run_release(&db, &SlotController::from_config(&config.slots), &args.session_id)?;
        }
        Commands::Otp(args) => {
            let db = open_db(&config)?;
            run_otp(&db, &OtpVerifier::from_config(&config.otp), args.action)?;
        }
        Commands::History(args) => {
            let db = open_db(&config)?;
            run_history(&db, &args.phone, args.transcript)?;
        }
    }

    Ok(())
}

fn open_db(config: &Config) -> anyhow::Result<Database> {
    match &config.database_path {
        Some(path) => Database::open_at(path.clone()),
        None => Database::open(),
    }
}
