use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Who is editing which branch, and where the shared files live.
///
/// Built by the login layer and handed to the core; nothing in the crate keeps
/// a process-wide copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub branch: String,
    pub data_folder: PathBuf,
}

impl Session {
    pub fn new(username: impl Into<String>, branch: impl Into<String>, data_folder: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            branch: branch.into(),
            data_folder: data_folder.into(),
        }
    }

    pub fn branch_key(&self) -> &str {
        self.branch.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub io_retry_count: u32,
    pub io_retry_delay_ms: u64,
    pub suppression_settle_ms: u64,
    pub reload_debounce_ms: u64,
    pub autosave_delay_ms: u64,
    pub reload_after_save: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            io_retry_count: 5,
            io_retry_delay_ms: 200,
            suppression_settle_ms: 300,
            reload_debounce_ms: 500,
            autosave_delay_ms: 3_000,
            reload_after_save: true,
        }
    }
}

impl SyncSettings {
    /// Reads settings from a JSON file. Missing or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "settings unreadable; using defaults");
                return Self::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "settings malformed; using defaults");
                Self::default()
            }
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.io_retry_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.suppression_settle_ms)
    }

    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }
}

/// The two files backing one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPaths {
    pub active: PathBuf,
    pub finished: PathBuf,
}

impl BranchPaths {
    /// Resolves the branch files, creating the data folder if it does not exist yet.
    pub fn resolve(session: &Session) -> AppResult<Self> {
        let branch = session.branch_key();
        if branch.is_empty() {
            return Err(AppError::Invalid("branch name is empty".to_string()));
        }
        if !session.data_folder.is_dir() {
            tracing::info!(folder = %session.data_folder.display(), "creating data folder");
            fs::create_dir_all(&session.data_folder)?;
        }
        Ok(Self {
            active: session.data_folder.join(format!("{}.csv", branch)),
            finished: session.data_folder.join(format!("{}finished.csv", branch)),
        })
    }
}
