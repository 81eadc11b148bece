use crate::codec;
use crate::config::{BranchPaths, Session, SyncSettings};
use crate::errors::{AppError, AppResult};
use crate::lifecycle::{self, Migration};
use crate::models::{BranchView, Entry, Partition, Record, RecordId};
use crate::ordering;
use crate::sync::FileSync;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub active: usize,
    pub finished: usize,
    /// Records whose status disagreed with the file they were read from.
    pub misplaced: usize,
}

/// The in-memory Active/Finished pair for one branch and the two files behind it.
#[derive(Debug)]
pub struct Dataset {
    branch: String,
    active_file: FileSync,
    finished_file: FileSync,
    active: Vec<Entry>,
    finished: Vec<Entry>,
    dirty: bool,
}

impl Dataset {
    /// Resolves the branch files without reading them.
    pub fn open(session: &Session, settings: &SyncSettings) -> AppResult<Self> {
        let paths = BranchPaths::resolve(session)?;
        Ok(Self {
            branch: session.branch_key().to_string(),
            active_file: FileSync::new(paths.active, settings),
            finished_file: FileSync::new(paths.finished, settings),
            active: Vec::new(),
            finished: Vec::new(),
            dirty: false,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn files(&self) -> [&FileSync; 2] {
        [&self.active_file, &self.finished_file]
    }

    pub fn active(&self) -> &[Entry] {
        &self.active
    }

    pub fn finished(&self) -> &[Entry] {
        &self.finished
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Re-reads both files and replaces the in-memory set. On a read failure
    /// the current state is left untouched.
    pub fn load(&mut self) -> AppResult<LoadReport> {
        let header = codec::header_line();
        self.active_file.ensure_exists(&header)?;
        self.finished_file.ensure_exists(&header)?;

        let active_lines = self.active_file.read_lines()?;
        let finished_lines = self.finished_file.read_lines()?;

        let from_active = parse_file(&active_lines);
        let from_finished = parse_file(&finished_lines);
        let misplaced = from_active
            .iter()
            .filter(|record| lifecycle::classify(&record.status) != Partition::Active)
            .count()
            + from_finished
                .iter()
                .filter(|record| lifecycle::classify(&record.status) != Partition::Finished)
                .count();

        let previous: Vec<Entry> = self.active.drain(..).chain(self.finished.drain(..)).collect();
        let loaded = from_active.into_iter().chain(from_finished).collect();
        let (active, finished) = lifecycle::partition_entries(reconcile_ids(&previous, loaded));

        self.active = ordering::order_active(active);
        self.finished = ordering::order_finished(finished);
        // Misplaced records get rewritten into the right file by the next save.
        self.dirty = misplaced > 0;

        let report = LoadReport {
            active: self.active.len(),
            finished: self.finished.len(),
            misplaced,
        };
        tracing::info!(
            branch = %self.branch,
            active = report.active,
            finished = report.finished,
            misplaced = report.misplaced,
            "branch loaded"
        );
        Ok(report)
    }

    /// Writes both partitions. Both files are staged and synced before either
    /// is replaced; if the second replace fails the first file is put back, so
    /// a record moving between partitions is never missing from both files.
    /// On failure the dataset stays dirty so a later save can retry.
    pub fn save(&mut self) -> AppResult<()> {
        let active_lines = render_file(&self.active);
        let finished_lines = render_file(&self.finished);

        self.replace_both(&active_lines, &finished_lines).map_err(|error| {
            tracing::warn!(branch = %self.branch, error = %error, "save failed");
            AppError::Save(error.to_string())
        })?;

        self.dirty = false;
        tracing::info!(
            branch = %self.branch,
            active = self.active.len(),
            finished = self.finished.len(),
            "branch saved"
        );
        Ok(())
    }

    fn replace_both(&self, active_lines: &[String], finished_lines: &[String]) -> AppResult<()> {
        let previous_active = self.active_file.read_bytes()?;
        let active = self.active_file.stage(active_lines)?;
        let finished = self.finished_file.stage(finished_lines)?;

        active.commit()?;
        if let Err(error) = finished.commit() {
            self.restore_active(previous_active);
            return Err(error);
        }
        Ok(())
    }

    fn restore_active(&self, previous: Option<Vec<u8>>) {
        let path = self.active_file.path();
        let Some(content) = previous else {
            tracing::warn!(branch = %self.branch, path = %path.display(), "no earlier active file to restore");
            return;
        };
        match self.active_file.stage_bytes(&content).and_then(|staged| staged.commit()) {
            Ok(()) => tracing::info!(branch = %self.branch, path = %path.display(), "active file restored after failed save"),
            Err(error) => {
                tracing::error!(branch = %self.branch, path = %path.display(), error = %error, "active file restore failed")
            }
        }
    }

    pub fn reclassify(&mut self) -> Migration {
        lifecycle::reclassify(&mut self.active, &mut self.finished)
    }

    pub fn rebuild_order(&mut self) {
        self.active = ordering::order_active(std::mem::take(&mut self.active));
        self.finished = ordering::order_finished(std::mem::take(&mut self.finished));
    }

    pub fn view(&self) -> BranchView {
        BranchView {
            active: ordering::active_rows(&self.active),
            finished: ordering::finished_rows(&self.finished),
        }
    }

    pub fn locate(&self, id: RecordId) -> Option<(Partition, usize)> {
        if let Some(index) = self.active.iter().position(|entry| entry.id == id) {
            return Some((Partition::Active, index));
        }
        self.finished
            .iter()
            .position(|entry| entry.id == id)
            .map(|index| (Partition::Finished, index))
    }

    pub fn get(&self, id: RecordId) -> Option<&Entry> {
        self.active.iter().chain(self.finished.iter()).find(|entry| entry.id == id)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut Entry> {
        self.active
            .iter_mut()
            .chain(self.finished.iter_mut())
            .find(|entry| entry.id == id)
    }

    pub fn partition_mut(&mut self, partition: Partition) -> &mut Vec<Entry> {
        match partition {
            Partition::Active => &mut self.active,
            Partition::Finished => &mut self.finished,
        }
    }

    pub fn remove(&mut self, id: RecordId) -> Option<Entry> {
        let (partition, index) = self.locate(id)?;
        Some(self.partition_mut(partition).remove(index))
    }
}

fn parse_file(lines: &[String]) -> Vec<Record> {
    lines
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| codec::parse_line(line))
        .collect()
}

fn render_file(entries: &[Entry]) -> Vec<String> {
    std::iter::once(codec::header_line())
        .chain(entries.iter().map(|entry| codec::format_record(&entry.record)))
        .collect()
}

fn fingerprint(record: &Record) -> Option<(String, String)> {
    let customer = record.customer.trim().to_lowercase();
    let serial = record.serial_number.trim().to_lowercase();
    if customer.is_empty() && serial.is_empty() {
        return None;
    }
    Some((customer, serial))
}

/// Carries ids from the previous in-memory set over to freshly loaded records:
/// exact field matches first, then customer + serial number. Each previous id
/// is reused at most once.
pub fn reconcile_ids(previous: &[Entry], loaded: Vec<Record>) -> Vec<Entry> {
    let mut available: Vec<Option<&Entry>> = previous.iter().map(Some).collect();
    let mut ids: Vec<Option<RecordId>> = vec![None; loaded.len()];

    for (slot, record) in ids.iter_mut().zip(loaded.iter()) {
        if let Some(candidate) = available
            .iter_mut()
            .find(|candidate| matches!(candidate, Some(entry) if entry.record == *record))
        {
            *slot = candidate.take().map(|entry| entry.id);
        }
    }

    for (slot, record) in ids.iter_mut().zip(loaded.iter()) {
        if slot.is_some() {
            continue;
        }
        let Some(wanted) = fingerprint(record) else {
            continue;
        };
        if let Some(candidate) = available.iter_mut().find(|candidate| {
            matches!(candidate, Some(entry) if fingerprint(&entry.record).as_ref() == Some(&wanted))
        }) {
            *slot = candidate.take().map(|entry| entry.id);
        }
    }

    loaded
        .into_iter()
        .zip(ids)
        .map(|(record, id)| Entry {
            id: id.unwrap_or_default(),
            record,
        })
        .collect()
}
