//! Run lifecycle: lock and load the store, snapshot both platforms, run the
//! A→B and B→A passes in sequence, persist, and summarize.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::platform::{Category, Platform, RemoteItem, Side};
use crate::store::{MappingEntry, MappingStore, StoreLock};
use crate::sync::conflict::ConflictResolver;
use crate::sync::reconciler::{self, AuthGate, PassContext};
use crate::sync::report::{ItemFailure, RunSummary};
use crate::sync::{CancelFlag, Direction, SyncOptions, SyncProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    LoadingStore,
    RunningAtoB,
    RunningBtoA,
    Persisting,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, LoadingStore)
            | (LoadingStore, RunningAtoB)
            | (RunningAtoB, RunningBtoA)
            | (RunningBtoA, Persisting)
            | (Persisting, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks the current state and rejects out-of-order transitions.
#[derive(Debug)]
pub struct RunLifecycle {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }
}

impl RunLifecycle {
    pub fn state(&self) -> RunState {
        self.state
    }

    #[cfg(test)]
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Internal(format!(
                "illegal run transition {:?} -> {next:?}",
                self.state
            )));
        }
        log::debug!("Run state {:?} -> {next:?}", self.state);
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

/// Item sets fetched once per run, before any pass mutates anything.
struct Snapshot {
    category: Category,
    a: Option<Vec<RemoteItem>>,
    b: Option<Vec<RemoteItem>>,
}

impl Snapshot {
    fn items(&self, side: Side) -> Option<&[RemoteItem]> {
        match side {
            Side::A => self.a.as_deref(),
            Side::B => self.b.as_deref(),
        }
    }
}

/// Drives one sync run between platform A and platform B.
pub struct Orchestrator<'a> {
    a: &'a dyn Platform,
    b: &'a dyn Platform,
    store_path: &'a Path,
    resolver: &'a dyn ConflictResolver,
    cancel: CancelFlag,
    lifecycle: RunLifecycle,
    auth: [AuthGate; 2],
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        a: &'a dyn Platform,
        b: &'a dyn Platform,
        store_path: &'a Path,
        resolver: &'a dyn ConflictResolver,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            a,
            b,
            store_path,
            resolver,
            cancel,
            lifecycle: RunLifecycle::default(),
            auth: Default::default(),
        }
    }

    fn platform(&self, side: Side) -> &'a dyn Platform {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }

    fn auth_gate(&self, side: Side) -> &AuthGate {
        match side {
            Side::A => &self.auth[0],
            Side::B => &self.auth[1],
        }
    }

    fn enter(&mut self, state: RunState, progress: &dyn SyncProgress) -> Result<()> {
        self.lifecycle.advance(state)?;
        progress.on_state(state);
        Ok(())
    }

    /// Execute the run. Structural failures end in [`RunState::Failed`] and are
    /// reported in the summary rather than returned.
    pub async fn run(&mut self, options: &SyncOptions, progress: &dyn SyncProgress) -> RunSummary {
        let mut summary = RunSummary::new(options.dry_run);
        if let Err(e) = self.run_inner(options, progress, &mut summary).await {
            log::error!("Sync failed: {e}");
            summary.record_failure(ItemFailure::from_error(&e));
            if !self.lifecycle.state().is_terminal() {
                // Failed is reachable from every non-terminal state.
                let _ = self.lifecycle.advance(RunState::Failed);
                progress.on_state(RunState::Failed);
            }
        }
        summary.finish(self.lifecycle.state());
        progress.on_complete(&summary);
        summary
    }

    async fn run_inner(
        &mut self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
        summary: &mut RunSummary,
    ) -> Result<()> {
        self.enter(RunState::LoadingStore, progress)?;
        let _lock = StoreLock::acquire(self.store_path)?;
        let mut store = MappingStore::load(self.store_path)?;
        store.bind_platforms(&self.a.identifier(), &self.b.identifier())?;

        let snapshots = self.snapshot(options, summary).await?;

        let mut completed_passes = 0;
        for (state, direction) in [
            (RunState::RunningAtoB, Direction::AtoB),
            (RunState::RunningBtoA, Direction::BtoA),
        ] {
            self.enter(state, progress)?;
            if !options.directions.includes(direction) {
                continue;
            }
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                summary.note(format!("Run cancelled before the {direction} pass"));
                continue;
            }
            for snapshot in &snapshots {
                if self
                    .run_pass(direction, snapshot, &mut store, options, progress, summary)
                    .await?
                {
                    completed_passes += 1;
                }
            }
        }

        for side in [Side::A, Side::B] {
            if let Some(reason) = self.auth_gate(side).failure() {
                summary.note(format!(
                    "Stopped creating on {} after an authentication failure: {reason}",
                    self.platform(side).name()
                ));
            }
        }

        self.enter(RunState::Persisting, progress)?;
        if options.dry_run {
            log::info!("Dry run; mapping store left untouched");
        } else if completed_passes > 0 {
            store.set_last_sync(Utc::now());
            if let Err(e) = store.save(self.store_path) {
                if summary.created() > 0 {
                    summary.note(format!(
                        "{} new mirrors were created but their mappings were not saved; \
                         the next run will create them again",
                        summary.created()
                    ));
                }
                return Err(e);
            }
        } else {
            summary.note("No pass completed; mapping store not written");
        }

        self.enter(RunState::Done, progress)?;
        Ok(())
    }

    /// List every selected category on both platforms once. A category
    /// neither platform supports is noted and dropped; both platforms failing
    /// outright ends the run.
    async fn snapshot(
        &self,
        options: &SyncOptions,
        summary: &mut RunSummary,
    ) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        let mut reachable = false;
        let mut last_error = None;

        for category in options.categories.categories() {
            let mut snapshot = Snapshot {
                category,
                a: None,
                b: None,
            };
            let mut unsupported = 0;

            for side in [Side::A, Side::B] {
                let platform = self.platform(side);
                match platform.list_items(category, None).await {
                    Ok(items) => {
                        reachable = true;
                        log::info!("{} has {} {category}", platform.name(), items.len());
                        match side {
                            Side::A => snapshot.a = Some(items),
                            Side::B => snapshot.b = Some(items),
                        }
                    }
                    Err(Error::NotSupported { .. }) => unsupported += 1,
                    Err(e) => {
                        log::error!("Could not list {} {category}: {e}", platform.name());
                        summary.record_failure(ItemFailure {
                            category: Some(category),
                            ..ItemFailure::from_error(&e)
                        });
                        last_error = Some(e);
                    }
                }
            }

            if unsupported > 0 {
                summary.note(format!("{category} sync is not supported yet; skipped"));
                continue;
            }
            snapshots.push(snapshot);
        }

        if !reachable {
            if let Some(e) = last_error {
                return Err(Error::unavailable(
                    "both platforms",
                    format!("no platform could be reached (last error: {e})"),
                ));
            }
        }
        Ok(snapshots)
    }

    /// Run one direction for one category and merge its new entries into the
    /// store. Returns whether the pass ran.
    async fn run_pass(
        &self,
        direction: Direction,
        snapshot: &Snapshot,
        store: &mut MappingStore,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let source = self.platform(direction.source());
        let target = self.platform(direction.target());
        let Some(source_items) = snapshot.items(direction.source()) else {
            summary.note(format!(
                "Skipped {direction} {}: {} could not be listed",
                snapshot.category,
                source.name()
            ));
            return Ok(false);
        };

        let mut pending: Vec<MappingEntry> = Vec::new();
        let report = reconciler::reconcile(
            PassContext {
                direction,
                category: snapshot.category,
                source,
                source_items,
                target_items: snapshot.items(direction.target()),
                target,
                target_auth: self.auth_gate(direction.target()),
                store,
                options,
                resolver: self.resolver,
                cancel: &self.cancel,
                progress,
            },
            &mut pending,
        )
        .await;

        for entry in pending {
            let key = entry.composite_key();
            if let Err(e) = store.insert(snapshot.category, entry) {
                // The remote item exists but cannot be linked without breaking
                // key uniqueness; surface it instead of repointing.
                log::error!("Could not record mapping {key}: {e}");
                summary.record_failure(ItemFailure {
                    direction: Some(direction),
                    category: Some(snapshot.category),
                    item_id: Some(key),
                    ..ItemFailure::from_error(&e)
                });
            }
        }
        if report.cancelled {
            summary.cancelled = true;
        }
        for outcome in report.outcomes {
            summary.record(outcome);
        }
        Ok(true)
    }
}
