use crate::codec;
use crate::config::SyncSettings;
use crate::errors::{AppError, AppResult};
use chrono::Local;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, PersistError};

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            attempts: settings.io_retry_count.max(1),
            delay: settings.retry_delay(),
        }
    }
}

/// Errors another process holding the file can cause. Windows reports these as
/// sharing (32) and lock (33) violations.
pub fn is_transient(error: &io::Error) -> bool {
    if cfg!(windows) {
        // A replace racing another seat's open handle surfaces as access denied.
        if matches!(error.raw_os_error(), Some(32) | Some(33))
            || error.kind() == io::ErrorKind::PermissionDenied
        {
            return true;
        }
    }
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Tracks in-flight self-writes for one file.
#[derive(Debug, Default)]
pub struct Suppression {
    in_flight: AtomicUsize,
    quiet_until: Mutex<Option<Instant>>,
}

impl Suppression {
    pub fn acquire(self: &Arc<Self>, settle: Duration) -> SuppressionGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        SuppressionGuard {
            owner: Arc::clone(self),
            settle,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return true;
        }
        let quiet_until = self.quiet_until.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        matches!(*quiet_until, Some(deadline) if Instant::now() < deadline)
    }
}

/// Held for the duration of a self-write. Dropping it keeps notifications
/// muted for the settle period so the OS's delayed events are absorbed too.
#[derive(Debug)]
pub struct SuppressionGuard {
    owner: Arc<Suppression>,
    settle: Duration,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        let deadline = Instant::now() + self.settle;
        {
            let mut quiet_until = self
                .owner
                .quiet_until
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *quiet_until = Some(match *quiet_until {
                Some(existing) if existing > deadline => existing,
                _ => deadline,
            });
        }
        self.owner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Retrying, atomic access to one shared file.
#[derive(Debug, Clone)]
pub struct FileSync {
    path: PathBuf,
    retry: RetryPolicy,
    settle: Duration,
    suppression: Arc<Suppression>,
}

impl FileSync {
    pub fn new(path: impl Into<PathBuf>, settings: &SyncSettings) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::from_settings(settings),
            settle: settings.settle(),
            suppression: Arc::new(Suppression::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn suppress(&self) -> SuppressionGuard {
        self.suppression.acquire(self.settle)
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppression.is_suppressed()
    }

    /// Reads every record line while other seats may hold the file open.
    /// Line breaks inside quoted fields stay part of their line.
    pub fn read_lines(&self) -> AppResult<Vec<String>> {
        let bytes = self.with_retry("read", || {
            let mut file = File::open(&self.path)?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(bytes)
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        Ok(codec::logical_lines(text))
    }

    /// Raw file content, or `None` when the file does not exist.
    pub fn read_bytes(&self) -> AppResult<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.with_retry("read", || fs::read(&self.path)).map(Some)
    }

    /// Stages the content in a sibling temp file and renames it over the
    /// target, so readers see either the old or the new file, never a mix.
    pub fn write_atomic(&self, lines: &[String]) -> AppResult<()> {
        self.stage(lines)?.commit()
    }

    /// Writes and syncs the content to a sibling temp file without touching
    /// the target. Notifications stay suppressed until the staged write is
    /// committed or dropped.
    pub fn stage(&self, lines: &[String]) -> AppResult<StagedWrite> {
        let mut content = lines.join(LINE_ENDING);
        content.push_str(LINE_ENDING);
        self.stage_bytes(content.as_bytes())
    }

    pub fn stage_bytes(&self, content: &[u8]) -> AppResult<StagedWrite> {
        let guard = self.suppress();
        let parent = self.parent_dir();
        fs::create_dir_all(&parent)?;

        let prefix = format!(".{}.", self.file_name().to_string_lossy());
        let temp = self.with_retry("stage", || {
            let mut temp = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(&parent)?;
            temp.write_all(content)?;
            temp.as_file().sync_all()?;
            Ok(temp)
        })?;

        Ok(StagedWrite {
            target: self.clone(),
            temp,
            bytes: content.len(),
            _guard: guard,
        })
    }

    /// Creates the file with only a header line when it does not exist yet.
    pub fn ensure_exists(&self, header: &str) -> AppResult<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        tracing::info!(path = %self.path.display(), "creating missing branch file");
        self.write_atomic(&[header.to_string()])?;
        Ok(true)
    }

    /// Copies the file to a timestamped sibling. Returns `None` if there is nothing to copy.
    pub fn backup(&self) -> AppResult<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let stem = self
            .path
            .file_stem()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| "worklist".to_string());
        let extension = self
            .path
            .extension()
            .map(|value| format!(".{}", value.to_string_lossy()))
            .unwrap_or_default();
        let target = self.parent_dir().join(format!(
            "{}_backup_{}{}",
            stem,
            Local::now().format("%Y%m%d_%H%M%S"),
            extension
        ));
        self.with_retry("backup", || fs::copy(&self.path, &target))?;
        tracing::info!(path = %self.path.display(), backup = %target.display(), "backup written");
        Ok(Some(target))
    }

    /// Starts watching the file. `on_changed` runs on the notification thread
    /// for every relevant event that is not a self-write.
    pub fn watch<F>(&self, on_changed: F) -> AppResult<FileWatch>
    where
        F: Fn() + Send + 'static,
    {
        let filter = WatchFilter {
            file_name: self.file_name(),
            suppression: Arc::clone(&self.suppression),
        };
        let path = self.path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if filter.accepts(&event) {
                        on_changed();
                    }
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "file watch error");
                }
            },
            notify::Config::default(),
        )?;
        // Watch the directory: an atomic replace swaps the inode under a file watch.
        watcher.watch(&self.parent_dir(), RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %self.path.display(), "watching file");
        Ok(FileWatch {
            _watcher: watcher,
            path: self.path.clone(),
        })
    }

    pub fn watch_filter(&self) -> WatchFilter {
        WatchFilter {
            file_name: self.file_name(),
            suppression: Arc::clone(&self.suppression),
        }
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> OsString {
        self.path.file_name().map(OsString::from).unwrap_or_default()
    }

    fn with_retry<T>(&self, operation: &str, mut action: impl FnMut() -> io::Result<T>) -> AppResult<T> {
        let mut attempt = 1;
        loop {
            match action() {
                Ok(value) => return Ok(value),
                Err(error) if is_transient(&error) => {
                    if attempt >= self.retry.attempts {
                        tracing::warn!(path = %self.path.display(), operation, attempt, error = %error, "retries exhausted");
                        return Err(AppError::TransientIo(format!(
                            "{} {} failed after {} attempts: {}",
                            operation,
                            self.path.display(),
                            attempt,
                            error
                        )));
                    }
                    tracing::debug!(path = %self.path.display(), operation, attempt, error = %error, "file busy; retrying");
                    std::thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(error) => {
                    return Err(AppError::Io(format!(
                        "{} {} failed: {}",
                        operation,
                        self.path.display(),
                        error
                    )));
                }
            }
        }
    }
}

/// Content synced to a temp file beside its target, waiting to replace it.
/// Dropping it without committing deletes the temp file.
#[derive(Debug)]
pub struct StagedWrite {
    target: FileSync,
    temp: NamedTempFile,
    bytes: usize,
    _guard: SuppressionGuard,
}

impl StagedWrite {
    pub fn path(&self) -> &Path {
        self.target.path()
    }

    /// Renames the temp file over the target, retrying while another seat holds it.
    pub fn commit(self) -> AppResult<()> {
        let Self {
            target,
            mut temp,
            bytes,
            _guard,
        } = self;
        let path = target.path();

        let mut attempt = 1;
        loop {
            match temp.persist(path) {
                Ok(_) => break,
                Err(PersistError { error, file }) => {
                    if !is_transient(&error) {
                        return Err(AppError::Io(format!("replace {} failed: {}", path.display(), error)));
                    }
                    if attempt >= target.retry.attempts {
                        tracing::warn!(path = %path.display(), attempt, error = %error, "replace retries exhausted");
                        return Err(AppError::TransientIo(format!(
                            "{} stayed locked after {} attempts: {}",
                            path.display(),
                            attempt,
                            error
                        )));
                    }
                    tracing::debug!(path = %path.display(), attempt, error = %error, "replace blocked; retrying");
                    std::thread::sleep(target.retry.delay);
                    attempt += 1;
                    temp = file;
                }
            }
        }

        tracing::debug!(path = %path.display(), bytes, "file replaced");
        Ok(())
    }
}

/// Decides whether a raw notification should count as an external change.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    file_name: OsString,
    suppression: Arc<Suppression>,
}

impl WatchFilter {
    pub fn accepts(&self, event: &Event) -> bool {
        if !is_relevant_kind(&event.kind) {
            return false;
        }
        let touches_file = event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(self.file_name.as_os_str()));
        if !touches_file {
            return false;
        }
        if self.suppression.is_suppressed() {
            tracing::trace!(file = ?self.file_name, "suppressed self-write notification");
            return false;
        }
        true
    }
}

fn is_relevant_kind(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Keeps the underlying watcher alive; dropping it stops notifications.
pub struct FileWatch {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl FileWatch {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatch").field("path", &self.path).finish()
    }
}
