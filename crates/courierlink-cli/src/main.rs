//! courierlink - connects courier accounts and keeps their data synced.
//!
//! One-shot commands manage connected accounts; `serve` runs the daily
//! delivery and round syncs until interrupted.

mod commands;
mod logging;

use anyhow::{bail, Result};
use tracing::info;

use courierlink_core::models::SyncKind;
use courierlink_core::Config;

use commands::{Services, Stores};

const USAGE: &str = "\
Usage: courierlink <command> [args]

Commands:
  connect <account> <email>     Validate and store upstream credentials
  disconnect <account>          Forget credentials and cached session
  token <account> [--reveal]    Print a valid bearer token (masked by default)
  delivery <account> <id>       Fetch one delivery live as JSON
  sync <deliveries|rounds>      Run one sync job now
  serve                         Run the daily sync schedule
  status                        Show connected accounts and sync state
  config [init]                 Show effective config, or write defaults

Environment:
  COURIER_BASE_URL, COGNITO_USER_POOL_ID, COGNITO_CLIENT_ID,
  COURIERLINK_ENCRYPTION_KEY, COURIERLINK_DATA_DIR,
  COURIERLINK_CONNECT_POLICY, COURIERLINK_TIMEZONE, COURIERLINK_APP_PASSWORD,
  RUST_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let arg = |n: usize, name: &str| -> Result<String> {
        match args.get(n) {
            Some(value) => Ok(value.clone()),
            None => bail!("Missing <{}>\n\n{}", name, USAGE),
        }
    };

    let config = Config::load()?;

    if command == "serve" {
        let _guard = logging::init_with_file(&config.data_dir()?)?;
        info!("courierlink starting");
        let services = Services::build(&config)?;
        commands::serve(&services, &config).await?;
        info!("courierlink shutting down");
        return Ok(());
    }

    logging::init_stderr();

    match command {
        "connect" => {
            let services = Services::build(&config)?;
            commands::connect(&services, &arg(1, "account")?, &arg(2, "email")?).await
        }
        "disconnect" => {
            let stores = Stores::open(&config)?;
            commands::disconnect(&stores, &arg(1, "account")?)
        }
        "token" => {
            let services = Services::build(&config)?;
            let reveal = args.iter().any(|a| a == "--reveal");
            commands::token(&services, &arg(1, "account")?, reveal).await
        }
        "delivery" => {
            let services = Services::build(&config)?;
            commands::delivery(&services, &arg(1, "account")?, &arg(2, "id")?).await
        }
        "sync" => {
            let kind: SyncKind = arg(1, "deliveries|rounds")?.parse()?;
            let services = Services::build(&config)?;
            commands::sync(&services, kind).await
        }
        "status" => {
            let stores = Stores::open(&config)?;
            commands::status(&stores, &config)
        }
        "config" => commands::config(&config, args.get(1).is_some_and(|a| a == "init")),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}
