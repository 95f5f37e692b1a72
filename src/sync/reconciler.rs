//! One direction of a sync pass: decide, per source item, whether it is
//! already mirrored, drifted, or new, and mirror new items onto the target.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use futures::stream::{self, StreamExt};

use crate::error::Error;
use crate::platform::{Category, Platform, RemoteItem, Side};
use crate::store::{MappingEntry, MappingStore};
use crate::sync::conflict::{self, ConflictResolver, DriftState};
use crate::sync::provenance::mirror_payload;
use crate::sync::report::{ConflictRecord, DriftRecord, ItemFailure, ItemOutcome, PlannedAction};
use crate::sync::{CancelFlag, Direction, SyncOptions, SyncProgress};

/// Closed by the first authentication failure against a platform. Once
/// closed, no further creates toward that platform start.
#[derive(Debug, Default)]
pub struct AuthGate {
    failure: Mutex<Option<String>>,
}

impl AuthGate {
    pub fn close(&self, reason: String) {
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        if failure.is_none() {
            *failure = Some(reason);
        }
    }

    /// The failure that closed the gate, if any.
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Everything a pass reads. The store is a read view; new entries go to the
/// caller-owned pending buffer.
pub struct PassContext<'a> {
    pub direction: Direction,
    pub category: Category,
    /// Platform the source items came from; asked for item details before
    /// mirroring.
    pub source: &'a dyn Platform,
    pub source_items: &'a [RemoteItem],
    /// Snapshot of the target platform, used to spot pairs edited on both sides.
    pub target_items: Option<&'a [RemoteItem]>,
    pub target: &'a dyn Platform,
    /// Gate for the target platform, shared across the passes of one run.
    pub target_auth: &'a AuthGate,
    pub store: &'a MappingStore,
    pub options: &'a SyncOptions,
    pub resolver: &'a dyn ConflictResolver,
    pub cancel: &'a CancelFlag,
    pub progress: &'a dyn SyncProgress,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub direction: Direction,
    pub category: Category,
    pub outcomes: Vec<ItemOutcome>,
    pub cancelled: bool,
}

enum Step<'a> {
    Decided(ItemOutcome),
    Create(&'a RemoteItem),
}

/// Run one directional pass. Items are handled in the order given; creates
/// may overlap up to `options.concurrency`, but results (and pending entries)
/// are collected in input order.
pub async fn reconcile(ctx: PassContext<'_>, pending: &mut Vec<MappingEntry>) -> PassReport {
    let ctx = &ctx;
    ctx.progress
        .on_pass_start(ctx.direction, ctx.category, ctx.source_items.len());
    log::info!(
        "{} {}: {} source items",
        ctx.direction,
        ctx.category,
        ctx.source_items.len()
    );

    let steps = plan(ctx);
    let concurrency = ctx.options.concurrency.max(1);

    let mut results = stream::iter(steps)
        .map(|step| async move {
            match step {
                Step::Decided(outcome) => (outcome, None),
                Step::Create(item) => create_one(ctx, item).await,
            }
        })
        .buffered(concurrency);

    let mut outcomes = Vec::with_capacity(ctx.source_items.len());
    while let Some((outcome, entry)) = results.next().await {
        ctx.progress.on_item(&outcome);
        if let Some(entry) = entry {
            pending.push(entry);
        }
        outcomes.push(outcome);
    }

    let cancelled = outcomes
        .iter()
        .any(|o| matches!(o, ItemOutcome::NotAttempted { .. }));
    PassReport {
        direction: ctx.direction,
        category: ctx.category,
        outcomes,
        cancelled,
    }
}

/// Classify every source item without touching any platform.
fn plan<'a>(ctx: &PassContext<'a>) -> Vec<Step<'a>> {
    let source_side = ctx.direction.source();
    let target_side = ctx.direction.target();
    let targets: HashMap<&str, &RemoteItem> = ctx
        .target_items
        .unwrap_or_default()
        .iter()
        .map(|i| (i.id.as_str(), i))
        .collect();

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(ctx.source_items.len());
    for item in ctx.source_items {
        if !seen.insert(item.id.as_str()) {
            log::warn!(
                "{} listed {} twice; ignoring the repeat",
                ctx.source.name(),
                item.id
            );
            continue;
        }

        let Some(entry) = ctx.store.find_by_key(ctx.category, source_side, &item.id) else {
            steps.push(Step::Create(item));
            continue;
        };

        let skipped = ItemOutcome::Skipped {
            direction: ctx.direction,
            source_id: item.id.clone(),
        };
        if !ctx.options.detect_drift {
            steps.push(Step::Decided(skipped));
            continue;
        }

        let counterpart = targets.get(entry.key_on(target_side)).copied();
        let outcome = match conflict::classify(entry, source_side, item, counterpart) {
            DriftState::InSync | DriftState::TargetChanged => skipped,
            DriftState::SourceChanged => {
                log::info!(
                    "{} {} changed since last sync; update pending",
                    ctx.source.name(),
                    item.id
                );
                ItemOutcome::DriftDetected(DriftRecord {
                    direction: ctx.direction,
                    category: ctx.category,
                    changed_side: source_side,
                    key_a: entry.key_a().to_string(),
                    key_b: entry.key_b().to_string(),
                    title: item.title.clone(),
                })
            }
            DriftState::BothChanged => {
                let (a, b) = match source_side {
                    Side::A => (Some(item), counterpart),
                    Side::B => (counterpart, Some(item)),
                };
                let resolution = ctx.resolver.resolve(entry, a, b);
                log::warn!(
                    "{} {} changed on both sides since last sync ({resolution:?})",
                    ctx.category,
                    entry.composite_key()
                );
                ItemOutcome::Conflict(ConflictRecord {
                    category: ctx.category,
                    key_a: entry.key_a().to_string(),
                    key_b: entry.key_b().to_string(),
                    title: item.title.clone(),
                    resolution,
                })
            }
        };
        steps.push(Step::Decided(outcome));
    }
    steps
}

async fn create_one(
    ctx: &PassContext<'_>,
    item: &RemoteItem,
) -> (ItemOutcome, Option<MappingEntry>) {
    if ctx.cancel.is_cancelled() {
        return (
            ItemOutcome::NotAttempted {
                direction: ctx.direction,
                source_id: item.id.clone(),
            },
            None,
        );
    }

    if ctx.options.dry_run {
        return (
            ItemOutcome::WouldCreate(PlannedAction {
                direction: ctx.direction,
                category: ctx.category,
                source_id: item.id.clone(),
                title: item.title.clone(),
            }),
            None,
        );
    }

    let failed = |e: &Error| -> (ItemOutcome, Option<MappingEntry>) {
        (
            ItemOutcome::Failed(ItemFailure::for_item(
                ctx.direction,
                ctx.category,
                &item.id,
                &item.title,
                e,
            )),
            None,
        )
    };

    if let Some(reason) = ctx.target_auth.failure() {
        let e = Error::auth(
            ctx.target.name(),
            format!("not attempted after an earlier authentication failure ({reason})"),
        );
        return failed(&e);
    }

    let source_name = ctx.source.name();
    let key = format!("{source_name} {}", item.id);
    let detailed = ctx
        .options
        .retry
        .run(&key, || ctx.source.fetch_details(ctx.category, item))
        .await;
    let detailed = match detailed {
        Ok(detailed) => detailed,
        Err(e) => {
            log::error!("Could not read {source_name} {}: {e}", item.id);
            return failed(&e);
        }
    };

    let payload = mirror_payload(source_name, &detailed, ctx.direction.target());
    let created = ctx
        .options
        .retry
        .run(&key, || ctx.target.create_item(ctx.category, &payload))
        .await;

    match created {
        Ok(created) => {
            log::info!(
                "Mirrored {source_name} {} to {} {}",
                item.id,
                ctx.target.name(),
                created.id
            );
            let (key_a, key_b) = match ctx.direction {
                Direction::AtoB => (item.id.clone(), created.id.clone()),
                Direction::BtoA => (created.id.clone(), item.id.clone()),
            };
            let mut entry = MappingEntry::new(key_a, key_b, &item.title, ctx.direction.source());
            entry.source_updated_at = item.updated_at;
            entry.target_updated_at = created.updated_at;
            (
                ItemOutcome::Created {
                    direction: ctx.direction,
                    category: ctx.category,
                    source_id: item.id.clone(),
                    target_id: created.id,
                    title: item.title.clone(),
                },
                Some(entry),
            )
        }
        Err(e) => {
            log::error!(
                "Failed to mirror {source_name} {} to {}: {e}",
                item.id,
                ctx.target.name()
            );
            if !e.is_per_item() {
                log::error!(
                    "Not attempting further creates on {} this run",
                    ctx.target.name()
                );
                ctx.target_auth.close(e.to_string());
            }
            failed(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryPlatform;
    use crate::sync::conflict::DeferResolver;
    use crate::sync::NoopProgress;
    use chrono::{Duration, Utc};

    fn items(ids: &[&str]) -> Vec<RemoteItem> {
        ids.iter()
            .map(|id| RemoteItem::new(*id, format!("issue {id}")))
            .collect()
    }

    async fn run_pass(
        source: &[RemoteItem],
        target: &MemoryPlatform,
        store: &MappingStore,
        options: &SyncOptions,
        cancel: &CancelFlag,
    ) -> (PassReport, Vec<MappingEntry>) {
        let platform = MemoryPlatform::new(Side::A, "radicle").with_items(source.to_vec());
        run_pass_from(&platform, target, store, options, cancel).await
    }

    async fn run_pass_from(
        source: &MemoryPlatform,
        target: &MemoryPlatform,
        store: &MappingStore,
        options: &SyncOptions,
        cancel: &CancelFlag,
    ) -> (PassReport, Vec<MappingEntry>) {
        let source_items = source.list_items(Category::Issues, None).await.unwrap();
        let auth = AuthGate::default();
        let mut pending = Vec::new();
        let report = reconcile(
            PassContext {
                direction: Direction::AtoB,
                category: Category::Issues,
                source,
                source_items: &source_items,
                target_items: None,
                target,
                target_auth: &auth,
                store,
                options,
                resolver: &DeferResolver,
                cancel,
                progress: &NoopProgress,
            },
            &mut pending,
        )
        .await;
        (report, pending)
    }

    #[tokio::test]
    async fn test_creates_unmapped_items_in_order() {
        let target = MemoryPlatform::new(Side::B, "github");
        let source = items(&["a1", "a2", "a3"]);
        let (report, pending) = run_pass(
            &source,
            &target,
            &MappingStore::new(),
            &SyncOptions::default(),
            &CancelFlag::new(),
        )
        .await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(pending.len(), 3);
        let keys: Vec<&str> = pending.iter().map(|e| e.key_a()).collect();
        assert_eq!(keys, vec!["a1", "a2", "a3"]);
        assert!(pending.iter().all(|e| e.origin == Side::A));
        assert_eq!(target.items().len(), 3);
    }

    #[tokio::test]
    async fn test_mapped_items_are_skipped() {
        let target = MemoryPlatform::new(Side::B, "github");
        let mut store = MappingStore::new();
        store
            .insert(Category::Issues, MappingEntry::new("a1", "1", "issue a1", Side::A))
            .unwrap();

        let (report, pending) = run_pass(
            &items(&["a1", "a2"]),
            &target,
            &store,
            &SyncOptions::default(),
            &CancelFlag::new(),
        )
        .await;

        assert!(matches!(report.outcomes[0], ItemOutcome::Skipped { .. }));
        assert!(matches!(report.outcomes[1], ItemOutcome::Created { .. }));
        assert_eq!(pending.len(), 1);
        assert_eq!(target.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let target = MemoryPlatform::new(Side::B, "github");
        target.fail_creates_titled("issue a2");
        let (report, pending) = run_pass(
            &items(&["a1", "a2", "a3"]),
            &target,
            &MappingStore::new(),
            &SyncOptions {
                concurrency: 3,
                ..SyncOptions::default()
            },
            &CancelFlag::new(),
        )
        .await;

        let failed: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Failed(_)))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.key_a() != "a2"));
    }

    #[tokio::test]
    async fn test_dry_run_calls_nothing() {
        let target = MemoryPlatform::new(Side::B, "github");
        let (report, pending) = run_pass(
            &items(&["a1", "a2"]),
            &target,
            &MappingStore::new(),
            &SyncOptions {
                dry_run: true,
                ..SyncOptions::default()
            },
            &CancelFlag::new(),
        )
        .await;

        assert!(pending.is_empty());
        assert_eq!(target.create_calls(), 0);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, ItemOutcome::WouldCreate(_))));
    }

    #[tokio::test]
    async fn test_cancelled_pass_starts_nothing() {
        let target = MemoryPlatform::new(Side::B, "github");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let (report, pending) = run_pass(
            &items(&["a1"]),
            &target,
            &MappingStore::new(),
            &SyncOptions::default(),
            &cancel,
        )
        .await;
        assert!(report.cancelled);
        assert!(pending.is_empty());
        assert_eq!(target.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_source_id_created_once() {
        let target = MemoryPlatform::new(Side::B, "github");
        let (_, pending) = run_pass(
            &items(&["a1", "a1"]),
            &target,
            &MappingStore::new(),
            &SyncOptions::default(),
            &CancelFlag::new(),
        )
        .await;
        assert_eq!(pending.len(), 1);
        assert_eq!(target.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_drift_is_reported_without_mutation() {
        let target = MemoryPlatform::new(Side::B, "github");
        let synced = Utc::now() - Duration::hours(1);
        let mut entry = MappingEntry::new("a1", "1", "issue a1", Side::A);
        entry.source_updated_at = Some(synced);
        let mut store = MappingStore::new();
        store.insert(Category::Issues, entry).unwrap();

        let mut source = items(&["a1"]);
        source[0].updated_at = Some(Utc::now());

        let (report, pending) = run_pass(
            &source,
            &target,
            &store,
            &SyncOptions::default(),
            &CancelFlag::new(),
        )
        .await;
        assert!(matches!(report.outcomes[0], ItemOutcome::DriftDetected(_)));
        assert!(pending.is_empty());
        assert_eq!(target.create_calls(), 0);

        let (report, _) = run_pass(
            &source,
            &target,
            &store,
            &SyncOptions {
                detect_drift: false,
                ..SyncOptions::default()
            },
            &CancelFlag::new(),
        )
        .await;
        assert!(matches!(report.outcomes[0], ItemOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_auth_failure_stops_creates_toward_target() {
        let target = MemoryPlatform::new(Side::B, "github");
        target.reject_credentials();
        let (report, pending) = run_pass(
            &items(&["a1", "a2", "a3", "a4", "a5"]),
            &target,
            &MappingStore::new(),
            &SyncOptions::default(),
            &CancelFlag::new(),
        )
        .await;

        assert_eq!(target.create_calls(), 1);
        assert!(pending.is_empty());
        assert_eq!(report.outcomes.len(), 5);
        for outcome in &report.outcomes {
            let ItemOutcome::Failed(failure) = outcome else {
                panic!("expected a failure, got {outcome:?}");
            };
            assert_eq!(failure.kind, "auth");
        }
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_mirror_carries_details_missing_from_listing() {
        let mut original = RemoteItem::new("4b7ad1f", "Flux capacitor");
        original.body = "It stopped fluxing.".to_string();
        original.author = "alice".to_string();
        original.created_at = Some(Utc::now() - Duration::days(2));
        original.url = Some("rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5/issues/4b7ad1f".to_string());
        let source = MemoryPlatform::new(Side::A, "radicle")
            .with_items(vec![original])
            .with_bare_listing();
        let target = MemoryPlatform::new(Side::B, "github");

        let (_, pending) = run_pass_from(
            &source,
            &target,
            &MappingStore::new(),
            &SyncOptions::default(),
            &CancelFlag::new(),
        )
        .await;

        assert_eq!(pending.len(), 1);
        assert_eq!(source.detail_calls(), 1);
        let body = &target.items()[0].body;
        assert!(body.contains("It stopped fluxing."));
        assert!(body.contains("Author: alice"));
        assert!(body.contains("Created: "));
        assert!(body.contains("Source: rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5/issues/4b7ad1f"));
    }

    #[tokio::test]
    async fn test_dry_run_reads_no_details() {
        let source = MemoryPlatform::new(Side::A, "radicle")
            .with_items(items(&["a1"]))
            .with_bare_listing();
        let target = MemoryPlatform::new(Side::B, "github");
        run_pass_from(
            &source,
            &target,
            &MappingStore::new(),
            &SyncOptions {
                dry_run: true,
                ..SyncOptions::default()
            },
            &CancelFlag::new(),
        )
        .await;
        assert_eq!(source.detail_calls(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_creates_keep_input_order() {
        let target = MemoryPlatform::new(Side::B, "github");
        // Earlier items finish last.
        target.delay_creates_titled("issue a1", std::time::Duration::from_millis(60));
        target.delay_creates_titled("issue a2", std::time::Duration::from_millis(30));
        target.delay_creates_titled("issue a3", std::time::Duration::from_millis(5));

        let (report, pending) = run_pass(
            &items(&["a1", "a2", "a3", "a4"]),
            &target,
            &MappingStore::new(),
            &SyncOptions {
                concurrency: 3,
                ..SyncOptions::default()
            },
            &CancelFlag::new(),
        )
        .await;

        assert!(target.max_in_flight() > 1);
        let keys: Vec<&str> = pending.iter().map(|e| e.key_a()).collect();
        assert_eq!(keys, vec!["a1", "a2", "a3", "a4"]);
        let sources: Vec<&str> = report
            .outcomes
            .iter()
            .map(|o| match o {
                ItemOutcome::Created { source_id, .. } => source_id.as_str(),
                other => panic!("expected a create, got {other:?}"),
            })
            .collect();
        assert_eq!(sources, vec!["a1", "a2", "a3", "a4"]);

        // Every mapping points at the item created from its own source.
        let created = target.items();
        for entry in &pending {
            let mirror = created.iter().find(|i| i.id == entry.key_b()).unwrap();
            assert_eq!(mirror.title, format!("issue {}", entry.key_a()));
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_pass_keeps_completed_creates() {
        let target = MemoryPlatform::new(Side::B, "github");
        let cancel = CancelFlag::new();
        target.cancel_during_create(2, cancel.clone());

        let (report, pending) = run_pass(
            &items(&["a1", "a2", "a3", "a4"]),
            &target,
            &MappingStore::new(),
            &SyncOptions::default(),
            &cancel,
        )
        .await;

        assert!(report.cancelled);
        assert_eq!(target.create_calls(), 2);
        let keys: Vec<&str> = pending.iter().map(|e| e.key_a()).collect();
        assert_eq!(keys, vec!["a1", "a2"]);
        assert!(matches!(report.outcomes[1], ItemOutcome::Created { .. }));
        assert!(matches!(report.outcomes[2], ItemOutcome::NotAttempted { .. }));
        assert!(matches!(report.outcomes[3], ItemOutcome::NotAttempted { .. }));
    }
}
