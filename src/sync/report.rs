use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;
use crate::platform::{Category, Side};
use crate::sync::conflict::Resolution;
use crate::sync::orchestrator::RunState;
use crate::sync::Direction;

/// Overall outcome of a run, as an operator would act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Already converged; nothing was created and nothing failed.
    UpToDate,
    /// New mirrors were created and nothing failed.
    Synced,
    /// Dry run found work a real run would do.
    PendingChanges,
    /// The run completed but some items failed, or it was cancelled.
    PartialFailure,
    /// The run could not proceed; nothing was persisted.
    Failed,
}

impl SyncStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            SyncStatus::UpToDate | SyncStatus::Synced | SyncStatus::PendingChanges => 0,
            SyncStatus::PartialFailure => 1,
            SyncStatus::Failed => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub direction: Option<Direction>,
    pub category: Option<Category>,
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub kind: String,
    pub message: String,
}

impl ItemFailure {
    pub fn from_error(error: &Error) -> Self {
        Self {
            direction: None,
            category: None,
            item_id: None,
            title: None,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    pub fn for_item(
        direction: Direction,
        category: Category,
        id: &str,
        title: &str,
        error: &Error,
    ) -> Self {
        Self {
            direction: Some(direction),
            category: Some(category),
            item_id: Some(id.to_string()),
            title: Some(title.to_string()),
            ..Self::from_error(error)
        }
    }
}

/// A create that a real run would perform. Produced by dry runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAction {
    pub direction: Direction,
    pub category: Category,
    pub source_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftRecord {
    pub direction: Direction,
    pub category: Category,
    /// Side whose copy changed since the last sync.
    pub changed_side: Side,
    pub key_a: String,
    pub key_b: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    pub category: Category,
    pub key_a: String,
    pub key_b: String,
    pub title: String,
    pub resolution: Resolution,
}

/// What happened to one source item during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Created {
        direction: Direction,
        category: Category,
        source_id: String,
        target_id: String,
        title: String,
    },
    WouldCreate(PlannedAction),
    Skipped {
        direction: Direction,
        source_id: String,
    },
    DriftDetected(DriftRecord),
    Conflict(ConflictRecord),
    Failed(ItemFailure),
    /// Not started because the run was cancelled.
    NotAttempted {
        direction: Direction,
        source_id: String,
    },
}

/// Structured result of a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: SyncStatus,
    pub dry_run: bool,
    pub cancelled: bool,
    pub created_on_a: usize,
    pub created_on_b: usize,
    pub skipped_existing: usize,
    pub drift_detected: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub failures: Vec<ItemFailure>,
    pub planned: Vec<PlannedAction>,
    pub drifted: Vec<DriftRecord>,
    pub conflicted: Vec<ConflictRecord>,
    pub notes: Vec<String>,
    pub final_state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    conflict_keys: HashSet<(Category, String, String)>,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            status: SyncStatus::UpToDate,
            dry_run,
            cancelled: false,
            created_on_a: 0,
            created_on_b: 0,
            skipped_existing: 0,
            drift_detected: 0,
            conflicts: 0,
            failed: 0,
            not_attempted: 0,
            failures: Vec::new(),
            planned: Vec::new(),
            drifted: Vec::new(),
            conflicted: Vec::new(),
            notes: Vec::new(),
            final_state: RunState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            conflict_keys: HashSet::new(),
        }
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Created { direction, .. } => match direction.target() {
                Side::A => self.created_on_a += 1,
                Side::B => self.created_on_b += 1,
            },
            ItemOutcome::WouldCreate(action) => self.planned.push(action),
            ItemOutcome::Skipped { .. } => self.skipped_existing += 1,
            ItemOutcome::DriftDetected(drift) => {
                self.skipped_existing += 1;
                self.drift_detected += 1;
                self.drifted.push(drift);
            }
            ItemOutcome::Conflict(conflict) => {
                self.skipped_existing += 1;
                // Both passes see a pair edited on both sides; count it once.
                let key = (conflict.category, conflict.key_a.clone(), conflict.key_b.clone());
                if self.conflict_keys.insert(key) {
                    self.conflicts += 1;
                    self.conflicted.push(conflict);
                }
            }
            ItemOutcome::Failed(failure) => self.record_failure(failure),
            ItemOutcome::NotAttempted { .. } => self.not_attempted += 1,
        }
    }

    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        log::info!("{note}");
        self.notes.push(note);
    }

    /// Close the summary and derive its status.
    pub fn finish(&mut self, state: RunState) {
        self.final_state = state;
        self.finished_at = Some(Utc::now());
        self.status = if state == RunState::Failed {
            SyncStatus::Failed
        } else if self.failed > 0 || self.cancelled {
            SyncStatus::PartialFailure
        } else if self.created_on_a + self.created_on_b > 0 {
            SyncStatus::Synced
        } else if self.dry_run && !self.planned.is_empty() {
            SyncStatus::PendingChanges
        } else {
            SyncStatus::UpToDate
        };
    }

    pub fn created(&self) -> usize {
        self.created_on_a + self.created_on_b
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headline = match self.status {
            SyncStatus::UpToDate => "Already in sync; nothing to do.",
            SyncStatus::Synced => "Sync complete.",
            SyncStatus::PendingChanges => "Dry run: changes pending.",
            SyncStatus::PartialFailure => "Sync finished with failures; re-run after fixing them.",
            SyncStatus::Failed => "Sync failed; nothing was written.",
        };
        writeln!(f, "{headline}")?;
        if self.dry_run {
            writeln!(f, "  (dry run, no changes made)")?;
        }
        writeln!(f, "  Created on A:     {}", self.created_on_a)?;
        writeln!(f, "  Created on B:     {}", self.created_on_b)?;
        writeln!(f, "  Already mirrored: {}", self.skipped_existing)?;
        writeln!(f, "  Drift detected:   {}", self.drift_detected)?;
        writeln!(f, "  Conflicts:        {}", self.conflicts)?;
        writeln!(f, "  Failed:           {}", self.failed)?;
        if self.cancelled {
            writeln!(f, "  Cancelled; {} items not attempted", self.not_attempted)?;
        }

        if !self.planned.is_empty() {
            writeln!(f, "Would create:")?;
            for action in &self.planned {
                writeln!(
                    f,
                    "  [{}] {} {} {:?}",
                    action.direction, action.category, action.source_id, action.title
                )?;
            }
        }
        if !self.drifted.is_empty() {
            writeln!(f, "Update pending (not propagated):")?;
            for drift in &self.drifted {
                writeln!(
                    f,
                    "  {} {}~{} changed on {} {:?}",
                    drift.category, drift.key_a, drift.key_b, drift.changed_side, drift.title
                )?;
            }
        }
        if !self.conflicted.is_empty() {
            writeln!(f, "Changed on both sides:")?;
            for c in &self.conflicted {
                writeln!(
                    f,
                    "  {} {}~{} {:?} ({:?})",
                    c.category, c.key_a, c.key_b, c.title, c.resolution
                )?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                let id = failure.item_id.as_deref().unwrap_or("-");
                writeln!(f, "  [{}] {id}: {}", failure.kind, failure.message)?;
            }
        }
        for note in &self.notes {
            writeln!(f, "Note: {note}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> ItemOutcome {
        ItemOutcome::Conflict(ConflictRecord {
            category: Category::Issues,
            key_a: "a1".into(),
            key_b: "1".into(),
            title: "t".into(),
            resolution: Resolution::Defer,
        })
    }

    #[test]
    fn test_status_up_to_date() {
        let mut s = RunSummary::new(false);
        s.record(ItemOutcome::Skipped {
            direction: Direction::AtoB,
            source_id: "a1".into(),
        });
        s.finish(RunState::Done);
        assert_eq!(s.status, SyncStatus::UpToDate);
        assert_eq!(s.status.exit_code(), 0);
    }

    #[test]
    fn test_status_partial_failure() {
        let mut s = RunSummary::new(false);
        s.record(ItemOutcome::Created {
            direction: Direction::BtoA,
            category: Category::Issues,
            source_id: "1".into(),
            target_id: "a1".into(),
            title: "t".into(),
        });
        s.record(ItemOutcome::Failed(ItemFailure::from_error(
            &Error::validation("radicle", "bad"),
        )));
        s.finish(RunState::Done);
        assert_eq!(s.created_on_a, 1);
        assert_eq!(s.status, SyncStatus::PartialFailure);
        assert_eq!(s.status.exit_code(), 1);
    }

    #[test]
    fn test_status_failed_overrides_counts() {
        let mut s = RunSummary::new(false);
        s.finish(RunState::Failed);
        assert_eq!(s.status, SyncStatus::Failed);
        assert_eq!(s.status.exit_code(), 2);
    }

    #[test]
    fn test_conflicts_counted_once() {
        let mut s = RunSummary::new(false);
        s.record(conflict());
        s.record(conflict());
        assert_eq!(s.conflicts, 1);
        assert_eq!(s.skipped_existing, 2);
    }

    #[test]
    fn test_summary_serializes() {
        let mut s = RunSummary::new(true);
        s.record(ItemOutcome::WouldCreate(PlannedAction {
            direction: Direction::AtoB,
            category: Category::Issues,
            source_id: "a1".into(),
            title: "t".into(),
        }));
        s.finish(RunState::Done);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "pending_changes");
        assert_eq!(json["planned"][0]["direction"], "a_to_b");
        assert_eq!(json["final_state"], "done");
        assert!(json.get("conflict_keys").is_none());
    }
}
