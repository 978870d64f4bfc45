//! Operator command line for the balance ledger.
//!
//! Each invocation connects to PostgreSQL, runs one command and prints its
//! result as JSON on stdout. Failures print a client-safe message on stderr
//! and exit with a code derived from the error class.

mod commands;
mod config;
mod logging;

use std::process::ExitCode;

use anyhow::Error;
use balance_ledger::LedgerError;
use balance_ledger::db::Database;
use balance_ledger::ledger::ErrorClass;
use pico_args::Arguments;

use crate::commands::Command;
use crate::config::CliConfig;

const HELP: &str = "\
Operate the balance ledger

USAGE:
  ledger_cli [OPTIONS] <COMMAND>

COMMANDS:
  migrate                                      Apply pending schema migrations
  seed                                         Insert the demo users (idempotent)
  deposit  --user ID --amount DEC [--comment TEXT]
  withdraw --user ID --amount DEC [--comment TEXT]
  transfer --from ID --to ID --amount DEC [--comment TEXT]
  balance  --user ID
  history  --user ID [--limit N]

OPTIONS:
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  DATABASE_URL             PostgreSQL connection string
  DB_MAX_CONNECTIONS       Maximum pool size (default: 20)
  DB_MIN_CONNECTIONS       Minimum pool size (default: 5)
  DB_CONNECTION_TIMEOUT_SECS
  DB_IDLE_TIMEOUT_SECS
  DB_MAX_LIFETIME_SECS
  DB_LOCK_TIMEOUT_MS       Row lock wait in milliseconds (default: 5000)
  LEDGER_MAX_AMOUNT_SCALE  Decimal places accepted in amounts (default: 2)
  LEDGER_MAX_AMOUNT        Largest amount per operation (default: 9999999999999.99)
  LEDGER_HISTORY_LIMIT     Default history page size (default: 50)
  RUST_LOG                 Log filter (default: info,sqlx=warn)
";

const EXIT_USAGE: u8 = 2;
const EXIT_NOT_FOUND: u8 = 3;
const EXIT_CONFLICT: u8 = 4;
/// EX_TEMPFAIL from sysexits.h
const EXIT_RETRYABLE: u8 = 75;
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        return ExitCode::SUCCESS;
    }

    let database_url: Option<String> = match pargs.opt_value_from_str("--db-url") {
        Ok(url) => url,
        Err(err) => return usage_error(&err.into()),
    };

    let command = match Command::parse(pargs) {
        Ok(command) => command,
        Err(err) => return usage_error(&err),
    };

    logging::init();

    let config = match CliConfig::from_env(database_url) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let name = command.name();
    match execute(command, &config).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => report_failure(name, &err),
    }
}

async fn execute(command: Command, config: &CliConfig) -> Result<String, Error> {
    let db = Database::connect(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let outcome = command
        .run(&db, &config.ledger, config.database.lock_timeout())
        .await;
    db.close().await;

    Ok(serde_json::to_string_pretty(&outcome?)?)
}

fn usage_error(err: &Error) -> ExitCode {
    eprintln!("error: {err}\n\n{HELP}");
    ExitCode::from(EXIT_USAGE)
}

/// Print a sanitized message and map the failure to an exit code
fn report_failure(command: &str, err: &Error) -> ExitCode {
    let Some(ledger_err) = err.downcast_ref::<LedgerError>() else {
        logging::log_command_failure(command, "Internal", false, &format!("{err:#}"));
        eprintln!("error: {err}");
        return ExitCode::from(EXIT_FAILURE);
    };

    let class = ledger_err.class();
    logging::log_command_failure(
        command,
        &format!("{class:?}"),
        ledger_err.is_retryable(),
        &ledger_err.to_string(),
    );

    if ledger_err.is_retryable() {
        eprintln!("error: {} (retryable)", ledger_err.client_message());
    } else {
        eprintln!("error: {}", ledger_err.client_message());
    }

    ExitCode::from(exit_code(class))
}

fn exit_code(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::InvalidInput => EXIT_USAGE,
        ErrorClass::NotFound => EXIT_NOT_FOUND,
        ErrorClass::Conflict => EXIT_CONFLICT,
        ErrorClass::Transient => EXIT_RETRYABLE,
        ErrorClass::Internal => EXIT_FAILURE,
    }
}
