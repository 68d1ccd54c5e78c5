//! Operator repair tool: recompute `budget_used` for every phase.
//!
//! Usage: `recalculate_budgets [path/to/sitebudget.db]`
//!
//! Without an argument the database named in `~/.sitebudget/config.json` (or
//! the default location) is used. Prints the repair report as JSON on stdout
//! and exits non-zero if any step fails.

use std::path::PathBuf;
use std::process::ExitCode;

use sitebudget_lib::db::BudgetDb;
use sitebudget_lib::error::BudgetErrorPayload;
use sitebudget_lib::services::budget;
use sitebudget_lib::state::{database_path, load_config, StateError};

fn resolve_path() -> Result<PathBuf, StateError> {
    match std::env::args().nth(1) {
        Some(arg) => Ok(PathBuf::from(arg)),
        None => database_path(&load_config()?),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let path = match resolve_path() {
        Ok(path) => path,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let db = match BudgetDb::open_at(path.clone()) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to open {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match budget::recalculate_all(&db) {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("Failed to serialize report: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            let payload = BudgetErrorPayload::from(&e);
            log::error!("Recalculation failed: {}", e);
            if let Ok(json) = serde_json::to_string_pretty(&payload) {
                eprintln!("{}", json);
            }
            ExitCode::FAILURE
        }
    }
}
