use crate::autosave::{self, AutosaveScheduler};
use crate::config::{Session, SyncSettings};
use crate::dataset::Dataset;
use crate::debounce::Debouncer;
use crate::errors::{AppError, AppResult};
use crate::filter;
use crate::lifecycle;
use crate::models::{BranchView, DueDate, Entry, Partition, Record, RecordField, RecordId, Tier};
use crate::ordering::DateKey;
use crate::sync::FileWatch;
use chrono::Local;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Work posted back to the thread that owns the [`Worklist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorklistEvent {
    /// One of the branch files changed outside this process (already debounced).
    ExternalChange,
    /// The autosave quiet period elapsed.
    AutosaveDue,
}

pub type ChangeListener = Box<dyn FnMut(&BranchView) + Send>;
pub type SaveErrorListener = Box<dyn FnMut(&AppError) + Send>;

/// The core API the presentation layer drives. All mutation happens through
/// `&mut self` on the owning task; watcher and timer threads only post
/// [`WorklistEvent`]s.
pub struct Worklist {
    session: Session,
    settings: SyncSettings,
    dataset: Dataset,
    events: mpsc::UnboundedSender<WorklistEvent>,
    autosave: AutosaveScheduler,
    watches: Vec<FileWatch>,
    reload_pending: bool,
    change_listeners: Vec<ChangeListener>,
    save_error_listeners: Vec<SaveErrorListener>,
}

impl Worklist {
    pub fn event_channel() -> (
        mpsc::UnboundedSender<WorklistEvent>,
        mpsc::UnboundedReceiver<WorklistEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Opens and loads the session's branch. Must be called inside a tokio runtime.
    pub fn open(
        session: Session,
        settings: SyncSettings,
        events: mpsc::UnboundedSender<WorklistEvent>,
    ) -> AppResult<Self> {
        let mut dataset = Dataset::open(&session, &settings)?;
        dataset.load()?;
        let autosave = AutosaveScheduler::start(settings.autosave_delay(), events.clone());
        let worklist = Self {
            session,
            settings,
            dataset,
            events,
            autosave,
            watches: Vec::new(),
            reload_pending: false,
            change_listeners: Vec::new(),
            save_error_listeners: Vec::new(),
        };
        if worklist.dataset.is_dirty() {
            worklist.autosave.edit_committed();
        }
        Ok(worklist)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_dirty(&self) -> bool {
        self.dataset.is_dirty()
    }

    pub fn view(&self) -> BranchView {
        self.dataset.view()
    }

    pub fn get(&self, id: RecordId) -> Option<&Entry> {
        self.dataset.get(id)
    }

    pub fn search(&self, term: &str) -> BranchView {
        let view = self.dataset.view();
        BranchView {
            active: filter::filter_rows(&view.active, term),
            finished: filter::filter_rows(&view.finished, term),
        }
    }

    /// Switches to another branch. Unsaved edits on the current branch are saved first.
    pub fn load_branch(&mut self, branch: &str) -> AppResult<BranchView> {
        if self.dataset.is_dirty() {
            self.save()?;
        }
        let session = Session {
            branch: branch.to_string(),
            ..self.session.clone()
        };
        let mut dataset = Dataset::open(&session, &self.settings)?;
        dataset.load()?;

        let was_watching = !self.watches.is_empty();
        self.stop_watching();
        self.session = session;
        self.dataset = dataset;
        self.reload_pending = false;
        if was_watching {
            self.start_watching()?;
        }
        if self.dataset.is_dirty() {
            self.autosave.edit_committed();
        }
        Ok(self.view())
    }

    pub fn reload(&mut self) -> AppResult<BranchView> {
        self.dataset.load()?;
        self.reload_pending = false;
        if self.dataset.is_dirty() {
            self.autosave.edit_committed();
        }
        Ok(self.view())
    }

    pub fn apply_edit(&mut self, id: RecordId, field_name: &str, value: &str) -> AppResult<Partition> {
        let field: RecordField = field_name.parse()?;
        let username = self.session.username.clone();
        let entry = self
            .dataset
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", id)))?;
        entry.record.set_field(field, value)?;
        if field != RecordField::LastUser {
            entry.record.last_user = username;
        }
        self.commit();

        let (partition, _) = self
            .dataset
            .locate(id)
            .ok_or_else(|| AppError::Internal(format!("Record '{}' lost during reclassification", id)))?;
        Ok(partition)
    }

    /// Adds a default record to the active partition, after `after` when it is active.
    pub fn add_record(&mut self, after: Option<RecordId>) -> AppResult<RecordId> {
        let entry = Entry::new(self.default_record());
        let id = entry.id;
        let active = self.dataset.partition_mut(Partition::Active);
        let position = after
            .and_then(|anchor| active.iter().position(|candidate| candidate.id == anchor))
            .map(|index| index + 1)
            .unwrap_or(active.len());
        active.insert(position, entry);
        self.commit();
        Ok(id)
    }

    pub fn duplicate_record(&mut self, id: RecordId) -> AppResult<RecordId> {
        let (partition, index) = self
            .dataset
            .locate(id)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", id)))?;
        let username = self.session.username.clone();
        let entries = self.dataset.partition_mut(partition);
        let mut record = entries[index].record.clone();
        record.last_user = username;
        let copy = Entry::new(record);
        let copy_id = copy.id;
        entries.insert(index + 1, copy);
        self.commit();
        Ok(copy_id)
    }

    pub fn delete_record(&mut self, id: RecordId) -> AppResult<()> {
        self.dataset
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", id)))?;
        self.commit();
        Ok(())
    }

    /// Moves `id` directly before `before`. Only two non-pinned active records
    /// in the same due-date group can be reordered; the date sort would undo
    /// anything else.
    pub fn reorder(&mut self, id: RecordId, before: RecordId) -> AppResult<()> {
        if id == before {
            return Ok(());
        }
        let moving = self.reorderable(id)?;
        let target = self.reorderable(before)?;
        if moving != target {
            return Err(AppError::Invalid(format!(
                "Cannot move a record due {} into the {} group",
                moving.label(),
                target.label()
            )));
        }

        let active = self.dataset.partition_mut(Partition::Active);
        let from = active
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", id)))?;
        let entry = active.remove(from);
        let to = active
            .iter()
            .position(|entry| entry.id == before)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", before)))?;
        active.insert(to, entry);
        self.commit();
        Ok(())
    }

    fn reorderable(&self, id: RecordId) -> AppResult<DateKey> {
        let (partition, _) = self
            .dataset
            .locate(id)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", id)))?;
        let entry = self
            .dataset
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found", id)))?;
        if partition != Partition::Active {
            return Err(AppError::Invalid(format!("Record '{}' is finished and cannot be reordered", id)));
        }
        if lifecycle::tier(&entry.record.status) == Tier::Pinned {
            return Err(AppError::Invalid(format!("Record '{}' is pinned and cannot be reordered", id)));
        }
        Ok(DateKey::of(&entry.record))
    }

    /// Explicit save: reclassify, rebuild and write both files now.
    pub fn save(&mut self) -> AppResult<()> {
        self.dataset.reclassify();
        self.dataset.rebuild_order();
        match self.dataset.save() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.dataset.mark_dirty();
                self.notify_save_error(&error);
                Err(error)
            }
        }
    }

    pub fn backup(&self) -> AppResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for file in self.dataset.files() {
            if let Some(path) = file.backup()? {
                written.push(path);
            }
        }
        Ok(written)
    }

    pub fn on_external_change<F>(&mut self, listener: F)
    where
        F: FnMut(&BranchView) + Send + 'static,
    {
        self.change_listeners.push(Box::new(listener));
    }

    pub fn on_save_error<F>(&mut self, listener: F)
    where
        F: FnMut(&AppError) + Send + 'static,
    {
        self.save_error_listeners.push(Box::new(listener));
    }

    /// Watches both branch files. Notifications are filtered for self-writes
    /// on the watcher thread, debounced together, then posted as
    /// [`WorklistEvent::ExternalChange`].
    pub fn start_watching(&mut self) -> AppResult<()> {
        if !self.watches.is_empty() {
            return Ok(());
        }
        let events = self.events.clone();
        let reload = Debouncer::spawn(self.settings.reload_debounce(), move || {
            if events.send(WorklistEvent::ExternalChange).is_err() {
                tracing::debug!("external change after the event loop closed");
            }
        });

        let mut watches = Vec::with_capacity(2);
        for file in self.dataset.files() {
            let reload = reload.clone();
            watches.push(file.watch(move || reload.trigger())?);
        }
        self.watches = watches;
        tracing::info!(branch = %self.dataset.branch(), "watching branch files");
        Ok(())
    }

    pub fn stop_watching(&mut self) {
        if !self.watches.is_empty() {
            tracing::debug!(branch = %self.dataset.branch(), "stopped watching branch files");
        }
        self.watches.clear();
    }

    pub fn is_watching(&self) -> bool {
        !self.watches.is_empty()
    }

    pub fn handle_event(&mut self, event: WorklistEvent) -> AppResult<()> {
        match event {
            WorklistEvent::ExternalChange => self.handle_external_change(),
            WorklistEvent::AutosaveDue => self.handle_autosave(),
        }
    }

    /// Waits for the next posted event and handles it. Returns `false` once the channel is closed.
    pub async fn pump(&mut self, receiver: &mut mpsc::UnboundedReceiver<WorklistEvent>) -> bool {
        let Some(event) = receiver.recv().await else {
            return false;
        };
        if let Err(error) = self.handle_event(event) {
            tracing::warn!(?event, error = %error, "worklist event failed");
        }
        true
    }

    fn handle_external_change(&mut self) -> AppResult<()> {
        if self.dataset.is_dirty() {
            // Reloading now would discard local edits; the autosave cycle reloads after saving.
            tracing::debug!(branch = %self.dataset.branch(), "external change deferred until autosave");
            self.reload_pending = true;
            return Ok(());
        }
        self.dataset.load()?;
        if self.dataset.is_dirty() {
            self.autosave.edit_committed();
        }
        self.notify_change();
        Ok(())
    }

    fn handle_autosave(&mut self) -> AppResult<()> {
        if !self.dataset.is_dirty() {
            if self.reload_pending {
                self.reload_pending = false;
                return self.handle_external_change();
            }
            return Ok(());
        }

        let reload = self.settings.reload_after_save || self.reload_pending;
        match autosave::run_cycle(&mut self.dataset, reload) {
            Ok(outcome) => {
                if outcome.reload.is_some() {
                    self.reload_pending = false;
                    self.notify_change();
                }
                if self.dataset.is_dirty() {
                    self.autosave.edit_committed();
                }
                Ok(())
            }
            Err(error) => {
                self.dataset.mark_dirty();
                self.notify_save_error(&error);
                // Try again after another quiet period, the way a manual retry would.
                self.autosave.edit_committed();
                Err(error)
            }
        }
    }

    fn commit(&mut self) {
        self.dataset.reclassify();
        self.dataset.rebuild_order();
        self.dataset.mark_dirty();
        self.autosave.edit_committed();
    }

    fn default_record(&self) -> Record {
        let today = Local::now().date_naive();
        Record {
            retail: "N".to_string(),
            oe: "N".to_string(),
            day_due: today.format("%A").to_string(),
            due_date: DueDate::Known(today),
            status: "Quote".to_string(),
            quantity: 1,
            shaft_type: "Domestic".to_string(),
            priority: "N".to_string(),
            last_user: self.session.username.clone(),
            ..Record::default()
        }
    }

    fn notify_change(&mut self) {
        if self.change_listeners.is_empty() {
            return;
        }
        let view = self.dataset.view();
        for listener in self.change_listeners.iter_mut() {
            listener(&view);
        }
    }

    fn notify_save_error(&mut self, error: &AppError) {
        for listener in self.save_error_listeners.iter_mut() {
            listener(error);
        }
    }
}

impl std::fmt::Debug for Worklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worklist")
            .field("session", &self.session)
            .field("dataset", &self.dataset)
            .field("watching", &self.is_watching())
            .field("reload_pending", &self.reload_pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayRow;
    use std::sync::{Arc, Mutex};

    fn settings() -> SyncSettings {
        SyncSettings {
            io_retry_count: 1,
            io_retry_delay_ms: 1,
            suppression_settle_ms: 0,
            reload_after_save: false,
            ..SyncSettings::default()
        }
    }

    fn open(dir: &std::path::Path) -> (Worklist, mpsc::UnboundedReceiver<WorklistEvent>) {
        let (sender, receiver) = Worklist::event_channel();
        let worklist = Worklist::open(Session::new("alice", "east", dir), settings(), sender).expect("open");
        (worklist, receiver)
    }

    fn active_customers(worklist: &Worklist) -> Vec<String> {
        worklist
            .view()
            .active
            .iter()
            .filter_map(DisplayRow::entry)
            .map(|entry| entry.record.customer.clone())
            .collect()
    }

    #[tokio::test]
    async fn add_record_uses_defaults_and_session_user() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());

        let id = worklist.add_record(None).expect("add");
        let entry = worklist.get(id).expect("added");
        assert_eq!(entry.record.status, "Quote");
        assert_eq!(entry.record.quantity, 1);
        assert_eq!(entry.record.last_user, "alice");
        assert!(entry.record.due_date.date().is_some());
        assert!(worklist.is_dirty());
    }

    #[tokio::test]
    async fn status_edit_moves_record_between_partitions() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let id = worklist.add_record(None).expect("add");
        worklist.apply_edit(id, "customer", "Acme").expect("edit customer");
        let before = worklist.get(id).expect("entry").record.clone();

        assert_eq!(worklist.apply_edit(id, "STATUS", "picked up").expect("finish"), Partition::Finished);
        let view = worklist.view();
        assert!(view.active.iter().all(|row| row.entry().map(|entry| entry.id) != Some(id)));
        assert_eq!(view.finished.iter().filter(|row| row.entry().map(|entry| entry.id) == Some(id)).count(), 1);
        let moved = worklist.get(id).expect("entry").record.clone();
        assert_eq!(Record { status: before.status.clone(), ..moved }, before);

        assert_eq!(worklist.apply_edit(id, "status", "On Hold").expect("reopen"), Partition::Active);
    }

    #[tokio::test]
    async fn unknown_ids_and_fields_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let id = worklist.add_record(None).expect("add");

        assert!(matches!(worklist.apply_edit(id, "colour", "red"), Err(AppError::Invalid(_))));
        assert!(matches!(worklist.apply_edit(RecordId::new(), "customer", "x"), Err(AppError::NotFound(_))));
        assert!(matches!(worklist.delete_record(RecordId::new()), Err(AppError::NotFound(_))));
        assert!(matches!(worklist.apply_edit(id, "qty", "many"), Err(AppError::Invalid(_))));
    }

    #[tokio::test]
    async fn reorder_within_a_date_group() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let first = worklist.add_record(None).expect("first");
        let second = worklist.add_record(None).expect("second");
        worklist.apply_edit(first, "customer", "first").expect("name");
        worklist.apply_edit(second, "customer", "second").expect("name");

        worklist.reorder(second, first).expect("reorder");
        assert_eq!(active_customers(&worklist), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn reorder_rejects_pinned_finished_and_cross_group_targets() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let a = worklist.add_record(None).expect("a");
        let b = worklist.add_record(None).expect("b");
        let pinned = worklist.add_record(None).expect("pinned");
        let done = worklist.add_record(None).expect("done");
        worklist.apply_edit(b, "due_date", "01/01/2030").expect("date");
        worklist.apply_edit(pinned, "status", "Completed").expect("pin");
        worklist.apply_edit(done, "status", "Cancelled").expect("finish");

        assert!(matches!(worklist.reorder(a, b), Err(AppError::Invalid(_))));
        assert!(matches!(worklist.reorder(a, pinned), Err(AppError::Invalid(_))));
        assert!(matches!(worklist.reorder(a, done), Err(AppError::Invalid(_))));
    }

    #[tokio::test]
    async fn duplicate_and_delete() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let id = worklist.add_record(None).expect("add");
        worklist.apply_edit(id, "customer", "Acme").expect("edit");

        let copy = worklist.duplicate_record(id).expect("duplicate");
        assert_ne!(copy, id);
        assert_eq!(worklist.get(copy).expect("copy").record.customer, "Acme");

        worklist.delete_record(id).expect("delete");
        assert!(worklist.get(id).is_none());
        assert_eq!(active_customers(&worklist), vec!["Acme"]);
    }

    #[tokio::test]
    async fn search_keeps_separators() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let a = worklist.add_record(None).expect("a");
        let b = worklist.add_record(None).expect("b");
        worklist.apply_edit(a, "customer", "Acme").expect("edit");
        worklist.apply_edit(b, "customer", "Bolt").expect("edit");

        let view = worklist.search("acme");
        let items: Vec<_> = view.active.iter().filter_map(DisplayRow::entry).collect();
        assert_eq!(items.len(), 1);
        assert!(view.active.iter().any(DisplayRow::is_separator));
    }

    #[tokio::test]
    async fn external_change_is_deferred_while_dirty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let reloads = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&reloads);
        worklist.on_external_change(move |_| {
            *counter.lock().expect("counter") += 1;
        });

        let id = worklist.add_record(None).expect("add");
        worklist.handle_event(WorklistEvent::ExternalChange).expect("deferred");
        assert!(worklist.get(id).is_some());
        assert_eq!(*reloads.lock().expect("counter"), 0);

        worklist.handle_event(WorklistEvent::AutosaveDue).expect("autosave");
        assert!(!worklist.is_dirty());
        assert_eq!(*reloads.lock().expect("counter"), 1);
        assert_eq!(active_customers(&worklist).len(), 1);
    }

    #[tokio::test]
    async fn save_failure_keeps_edits_and_notifies() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut worklist, _events) = open(dir.path());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        worklist.on_save_error(move |error| {
            sink.lock().expect("sink").push(error.to_string());
        });
        worklist.add_record(None).expect("add");

        let finished_path = worklist.dataset.files()[1].path().to_path_buf();
        std::fs::remove_file(&finished_path).expect("remove");
        std::fs::create_dir(&finished_path).expect("block the file with a directory");

        let error = worklist.save().expect_err("save must fail");
        assert!(matches!(error, AppError::Save(_)));
        assert!(worklist.is_dirty());
        assert_eq!(active_customers(&worklist).len(), 1);
        assert_eq!(failures.lock().expect("sink").len(), 1);
    }
}
