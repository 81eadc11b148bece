use crate::dataset::{Dataset, LoadReport};
use crate::debounce::Debouncer;
use crate::errors::AppResult;
use crate::lifecycle::Migration;
use crate::worklist::WorklistEvent;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// One debounce timer per dataset. Every committed edit restarts it; expiry
/// posts `AutosaveDue` to the owning event loop.
#[derive(Debug, Clone)]
pub struct AutosaveScheduler {
    debouncer: Debouncer,
}

impl AutosaveScheduler {
    pub fn start(delay: Duration, events: mpsc::UnboundedSender<WorklistEvent>) -> Self {
        let debouncer = Debouncer::spawn(delay, move || {
            if events.send(WorklistEvent::AutosaveDue).is_err() {
                tracing::debug!("autosave fired after the event loop closed");
            }
        });
        Self { debouncer }
    }

    pub fn edit_committed(&self) {
        self.debouncer.trigger();
    }

    pub fn delay(&self) -> Duration {
        self.debouncer.delay()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub migration: Migration,
    pub saved: bool,
    pub reload: Option<LoadReport>,
}

/// reclassify, rebuild, save, then optionally reload to pick up writes that
/// landed from another seat while we were saving. A clean dataset is not saved.
pub fn run_cycle(dataset: &mut Dataset, reload_after_save: bool) -> AppResult<CycleOutcome> {
    let mut outcome = CycleOutcome::default();
    if !dataset.is_dirty() {
        return Ok(outcome);
    }

    outcome.migration = dataset.reclassify();
    dataset.rebuild_order();
    dataset.save()?;
    outcome.saved = true;

    if reload_after_save {
        match dataset.load() {
            Ok(report) => outcome.reload = Some(report),
            Err(error) => {
                // The save itself succeeded; the next external change will reconcile.
                tracing::warn!(branch = %dataset.branch(), error = %error, "reload after save failed");
            }
        }
    }
    Ok(outcome)
}
