mod autosave;
mod codec;
mod config;
mod dataset;
mod debounce;
mod errors;
mod filter;
mod lifecycle;
mod models;
mod ordering;
mod sync;
mod worklist;

pub use crate::autosave::{run_cycle, AutosaveScheduler, CycleOutcome};
pub use crate::codec::{escape_field, format_record, header_line, logical_lines, parse_line, split_fields, DELIMITER};
pub use crate::config::{BranchPaths, Session, SyncSettings};
pub use crate::dataset::{Dataset, LoadReport};
pub use crate::debounce::Debouncer;
pub use crate::errors::{AppError, AppResult};
pub use crate::filter::{filter_rows, matches, row_matches};
pub use crate::lifecycle::{classify, is_terminal, status_profile, tier, Migration, StatusKind, StatusProfile, STATUS_TABLE};
pub use crate::models::{
    BranchView, DisplayRow, DueDate, Entry, Partition, Record, RecordField, RecordId, Separator, Tier, DATE_FORMAT,
};
pub use crate::ordering::{active_rows, finished_rows, order_active, order_finished, strip_separators, DateKey, NO_DATE_LABEL};
pub use crate::sync::{
    is_transient, FileSync, FileWatch, RetryPolicy, StagedWrite, Suppression, SuppressionGuard, WatchFilter,
};
pub use crate::worklist::{ChangeListener, SaveErrorListener, Worklist, WorklistEvent};

use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global subscriber: JSON lines into a daily-rolling
/// `worklist.log` under `log_dir`, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("create log dir {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "worklist.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| anyhow::anyhow!(error.to_string()))
        .context("install tracing subscriber")
}
