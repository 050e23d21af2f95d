//! phatso-admin - command line access to the queue-management admin API.
//!
//! Logs in, shows the state of the stored bearer credential, and can hold a
//! guarded session open until the credential expires.

mod app;

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

const USAGE: &str = "\
Usage: phatso-admin <command>

Commands:
  login [username] [--force]   Log in and store the bearer credential
  logout                       Remove the stored credential
  status                       Show whether the stored credential is valid
  validate                     Ask the API to validate the credential
  info                         Show API authentication info
  watch                        Guard the session until it expires or Ctrl-C

Environment:
  RUST_LOG                     Log filter (default: warn)
  PHATSO_WEB_CONFIG            Path to web.config.json
  PHATSO_API_BASE_URL          Override the API base URL
  PHATSO_CREDENTIAL_STORE      keyring | file";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines when dropped.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    if matches!(command.as_str(), "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    info!(command = %command, "phatso-admin starting");
    let mut app = App::new()?;

    match command.as_str() {
        "login" => {
            let force = args.iter().any(|a| a == "--force");
            let username = args[1..].iter().find(|a| !a.starts_with("--")).cloned();
            app.login(username, force).await?;
        }
        "logout" => app.logout()?,
        "status" => app.status()?,
        "validate" => app.validate().await?,
        "info" => app.info().await?,
        "watch" => {
            if !app.watch().await? {
                drop(log_guard);
                std::process::exit(1);
            }
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            drop(log_guard);
            std::process::exit(2);
        }
    }

    Ok(())
}
