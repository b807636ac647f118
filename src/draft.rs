//! Scenario draft store
//!
//! ## Table of Contents
//! - **DraftStore**: One working scenario draft plus the known runs
//! - **RunEntry**: A run as tracked by the client
//!
//! Every draft is held behind an `Arc` and never mutated in place. A snapshot
//! obtained from [`DraftStore::draft`] keeps its values no matter how many
//! updates follow, which is what undo and diff views rely on.

use crate::schema::{Run, RunStatus, ScenarioCreateRequest, Validate, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A run as tracked by the client
#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    /// Run id
    pub id: Uuid,
    /// Last status observed
    pub status: RunStatus,
    /// Numeric summary metrics, if known
    pub metrics: HashMap<String, f64>,
}

impl RunEntry {
    /// Create an entry with no metrics
    pub fn new(id: Uuid, status: RunStatus) -> Self {
        Self {
            id,
            status,
            metrics: HashMap::new(),
        }
    }

    /// Add a metric
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

impl From<&Run> for RunEntry {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            status: run.status,
            metrics: run.numeric_metrics().into_iter().collect(),
        }
    }
}

/// Holds the working scenario draft and the runs list
#[derive(Debug, Clone)]
pub struct DraftStore {
    baseline: Arc<ScenarioCreateRequest>,
    draft: Arc<ScenarioCreateRequest>,
    runs: Vec<RunEntry>,
    active_run: Option<Uuid>,
}

impl Default for DraftStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftStore {
    /// Create a store seeded with the default scenario
    pub fn new() -> Self {
        Self::with_baseline(ScenarioCreateRequest::default())
    }

    /// Create a store that resets to `baseline`
    pub fn with_baseline(baseline: ScenarioCreateRequest) -> Self {
        let baseline = Arc::new(baseline);
        Self {
            draft: Arc::new((*baseline).clone()),
            baseline,
            runs: Vec::new(),
            active_run: None,
        }
    }

    /// Snapshot of the current draft
    pub fn draft(&self) -> Arc<ScenarioCreateRequest> {
        Arc::clone(&self.draft)
    }

    /// Apply `update` to a private copy of the draft and store the result
    pub fn set_draft<F>(&mut self, update: F)
    where
        F: FnOnce(ScenarioCreateRequest) -> ScenarioCreateRequest,
    {
        let working = (*self.draft).clone();
        let next = update(working);
        self.draft = Arc::new(next);
        debug!(title = %self.draft.title, "Scenario draft updated");
    }

    /// Validated copy of the draft ready for `POST /scenarios`
    pub fn submission(&self) -> Result<ScenarioCreateRequest, ValidationError> {
        self.draft.validate()?;
        Ok((*self.draft).clone())
    }

    /// Replace a run in place, or prepend it if unknown
    pub fn upsert_run(&mut self, run: RunEntry) {
        match self.runs.iter().position(|r| r.id == run.id) {
            Some(index) => self.runs[index] = run,
            None => self.runs.insert(0, run),
        }
    }

    /// Known runs, most recent first
    pub fn runs(&self) -> &[RunEntry] {
        &self.runs
    }

    /// Look up a run
    pub fn run(&self, id: Uuid) -> Option<&RunEntry> {
        self.runs.iter().find(|r| r.id == id)
    }

    /// Select the run shown by the playback view
    pub fn set_active_run(&mut self, id: Option<Uuid>) {
        self.active_run = id;
    }

    /// Currently selected run
    pub fn active_run(&self) -> Option<&RunEntry> {
        self.active_run.and_then(|id| self.run(id))
    }

    /// Restore the baseline draft and forget all runs
    pub fn reset(&mut self) {
        self.draft = Arc::new((*self.baseline).clone());
        self.runs.clear();
        self.active_run = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NpiDefinition, NpiTimelineEntry};

    fn rename(title: &'static str) -> impl Fn(ScenarioCreateRequest) -> ScenarioCreateRequest {
        move |mut d| {
            d.title = title.to_string();
            d
        }
    }

    fn add_lockdown(mut d: ScenarioCreateRequest) -> ScenarioCreateRequest {
        d.npi_catalog.push(NpiDefinition::new("lockdown", "Lockdown").with_effect("beta", 0.4));
        d.npi_timeline.push(NpiTimelineEntry::new(10, vec!["lockdown"]));
        d.pathogen.beta = 0.5;
        d
    }

    #[test]
    fn test_default_draft() {
        let store = DraftStore::new();
        let draft = store.draft();
        assert_eq!(draft.title, "New scenario");
        assert_eq!(draft.region_set, "global");
        assert_eq!(draft.pathogen.name, "Custom pathogen");
        assert_eq!(draft.engine.horizon, 180);
        assert_eq!(draft.engine.seed, 42);
    }

    #[test]
    fn test_set_draft_composition() {
        let mut stepwise = DraftStore::new();
        stepwise.set_draft(add_lockdown);
        stepwise.set_draft(rename("Stepwise"));

        let mut composed = DraftStore::new();
        composed.set_draft(|d| rename("Stepwise")(add_lockdown(d)));

        assert_eq!(*stepwise.draft(), *composed.draft());
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut store = DraftStore::new();
        let before = store.draft();

        store.set_draft(add_lockdown);
        let middle = store.draft();
        store.set_draft(|mut d| {
            d.npi_catalog.clear();
            d.engine.horizon = 5;
            d
        });

        assert!(before.npi_catalog.is_empty());
        assert_eq!(before.pathogen.beta, 0.28);
        assert_eq!(middle.npi_catalog.len(), 1);
        assert_eq!(middle.engine.horizon, 180);
        assert_eq!(store.draft().engine.horizon, 5);
        assert!(!Arc::ptr_eq(&before, &middle));
    }

    #[test]
    fn test_upsert_run_keeps_position() {
        let mut store = DraftStore::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        store.upsert_run(RunEntry::new(first, RunStatus::Queued));
        store.upsert_run(RunEntry::new(second, RunStatus::Queued));
        assert_eq!(store.runs()[0].id, second);

        store.upsert_run(RunEntry::new(first, RunStatus::Running));
        store.upsert_run(RunEntry::new(first, RunStatus::Completed));

        assert_eq!(store.runs().len(), 2);
        assert_eq!(store.runs()[1].id, first);
        assert_eq!(store.runs()[1].status, RunStatus::Completed);
    }

    #[test]
    fn test_reset() {
        let mut store = DraftStore::new();
        let id = Uuid::new_v4();
        store.set_draft(rename("Changed"));
        store.upsert_run(RunEntry::new(id, RunStatus::Running));
        store.set_active_run(Some(id));
        assert_eq!(store.active_run().map(|r| r.id), Some(id));

        store.reset();
        assert_eq!(store.draft().title, "New scenario");
        assert!(store.runs().is_empty());
        assert!(store.active_run().is_none());
    }

    #[test]
    fn test_submission_validates() {
        let mut store = DraftStore::new();
        assert!(store.submission().is_ok());

        store.set_draft(|mut d| {
            d.pathogen.gamma = -1.0;
            d.engine.dt = 0.0;
            d
        });
        let err = store.submission().unwrap_err();
        assert_eq!(err.paths(), vec!["pathogen.gamma", "engine.dt"]);
    }
}
