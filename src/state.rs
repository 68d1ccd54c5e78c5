use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::db::{BudgetDb, DbError};
use crate::error::BudgetError;
use crate::services::budget::{self, RecalculationReport};
use crate::types::{Config, NumberingPolicy};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Could not find home directory")]
    HomeDirNotFound,

    #[error("Failed to read config {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Location of the engine config: `~/.sitebudget/config.json`.
pub fn config_path() -> Result<PathBuf, StateError> {
    let home = dirs::home_dir().ok_or(StateError::HomeDirNotFound)?;
    Ok(home.join(".sitebudget").join("config.json"))
}

/// Load the config from its default location.
pub fn load_config() -> Result<Config, StateError> {
    load_config_from(&config_path()?)
}

/// Load a config file. A missing file means all defaults; a malformed one is
/// an error rather than a silent fallback.
pub fn load_config_from(path: &Path) -> Result<Config, StateError> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|source| StateError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| StateError::ParseConfig {
        path: path.to_path_buf(),
        source,
    })
}

/// Database file named by the config, or the default location.
pub fn database_path(config: &Config) -> Result<PathBuf, StateError> {
    match &config.database_path {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(BudgetDb::default_path()?),
    }
}

/// Shared engine handle: one store connection plus the loaded config.
///
/// Services take `&BudgetDb`; callers on several threads go through `db()`,
/// which serialises access to the connection.
pub struct EngineState {
    db: Mutex<BudgetDb>,
    pub config: Config,
}

impl EngineState {
    /// Open the configured store. With `recalculateOnStartup` every phase's
    /// `budget_used` is repaired before the handle is returned.
    pub fn open(config: Config) -> Result<Self, StateError> {
        let path = database_path(&config)?;
        let db = BudgetDb::open_at(path.clone())?;
        log::info!("Opened budget store at {}", path.display());

        if config.recalculate_on_startup {
            let report = budget::recalculate_all(&db)?;
            if !report.repaired.is_empty() {
                log::warn!(
                    "Start-up repair corrected {} of {} phases",
                    report.repaired.len(),
                    report.phases_checked
                );
            }
        }

        Ok(Self {
            db: Mutex::new(db),
            config,
        })
    }

    /// Open using `~/.sitebudget/config.json`.
    pub fn open_default() -> Result<Self, StateError> {
        Self::open(load_config()?)
    }

    pub fn db(&self) -> MutexGuard<'_, BudgetDb> {
        self.db.lock()
    }

    pub fn numbering_policy(&self) -> NumberingPolicy {
        NumberingPolicy::from(&self.config)
    }

    /// Run the repair pass on demand.
    pub fn recalculate_all(&self) -> Result<RecalculationReport, BudgetError> {
        budget::recalculate_all(&self.db())
    }
}
