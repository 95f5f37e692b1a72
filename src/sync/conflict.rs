//! Drift classification for already-mapped items, and the hook where a
//! future update-propagation policy plugs in.

use serde::Serialize;

use crate::platform::{RemoteItem, Side};
use crate::store::MappingEntry;

/// How a mapped pair has moved since it was last reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    InSync,
    SourceChanged,
    TargetChanged,
    BothChanged,
}

/// Compare an item's current timestamp against the stored one for `side`.
/// Without both timestamps there is no baseline and nothing counts as changed.
fn changed_since(entry: &MappingEntry, side: Side, item: Option<&RemoteItem>) -> bool {
    match (item.and_then(|i| i.updated_at), entry.updated_at_on(side)) {
        (Some(current), Some(stored)) => current > stored,
        _ => false,
    }
}

pub fn classify(
    entry: &MappingEntry,
    source_side: Side,
    source: &RemoteItem,
    target: Option<&RemoteItem>,
) -> DriftState {
    let source_changed = changed_since(entry, source_side, Some(source));
    let target_changed = changed_since(entry, source_side.other(), target);
    match (source_changed, target_changed) {
        (false, false) => DriftState::InSync,
        (true, false) => DriftState::SourceChanged,
        (false, true) => DriftState::TargetChanged,
        (true, true) => DriftState::BothChanged,
    }
}

/// What to do with a pair edited on both sides since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Leave both sides alone and report the conflict.
    Defer,
    /// Treat this side as authoritative once update propagation exists.
    Prefer(Side),
}

/// Strategy consulted only for pairs in [`DriftState::BothChanged`].
pub trait ConflictResolver: Send + Sync {
    fn resolve(
        &self,
        entry: &MappingEntry,
        a: Option<&RemoteItem>,
        b: Option<&RemoteItem>,
    ) -> Resolution;
}

/// Default strategy: never pick a winner.
#[derive(Debug, Default)]
pub struct DeferResolver;

impl ConflictResolver for DeferResolver {
    fn resolve(
        &self,
        _entry: &MappingEntry,
        _a: Option<&RemoteItem>,
        _b: Option<&RemoteItem>,
    ) -> Resolution {
        Resolution::Defer
    }
}

/// Prefer whichever side was edited most recently; ties defer.
#[derive(Debug, Default)]
pub struct LatestWinsResolver;

impl ConflictResolver for LatestWinsResolver {
    fn resolve(
        &self,
        _entry: &MappingEntry,
        a: Option<&RemoteItem>,
        b: Option<&RemoteItem>,
    ) -> Resolution {
        match (a.and_then(|i| i.updated_at), b.and_then(|i| i.updated_at)) {
            (Some(ta), Some(tb)) if ta > tb => Resolution::Prefer(Side::A),
            (Some(ta), Some(tb)) if tb > ta => Resolution::Prefer(Side::B),
            _ => Resolution::Defer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn item(id: &str, updated: Option<chrono::DateTime<Utc>>) -> RemoteItem {
        let mut item = RemoteItem::new(id, "t");
        item.updated_at = updated;
        item
    }

    fn entry_at(t: chrono::DateTime<Utc>) -> MappingEntry {
        // origin B: source_updated_at is B's time, target_updated_at is A's.
        let mut e = MappingEntry::new("a1", "1", "t", Side::B);
        e.source_updated_at = Some(t);
        e.target_updated_at = Some(t);
        e
    }

    #[test]
    fn test_classify_states() {
        let t = Utc::now();
        let later = t + Duration::minutes(5);
        let e = entry_at(t);

        let state = |b: chrono::DateTime<Utc>, a: chrono::DateTime<Utc>| {
            classify(&e, Side::B, &item("1", Some(b)), Some(&item("a1", Some(a))))
        };
        assert_eq!(state(t, t), DriftState::InSync);
        assert_eq!(state(later, t), DriftState::SourceChanged);
        assert_eq!(state(t, later), DriftState::TargetChanged);
        assert_eq!(state(later, later), DriftState::BothChanged);
    }

    #[test]
    fn test_missing_timestamps_never_drift() {
        let e = MappingEntry::new("a1", "1", "t", Side::A);
        let later = Utc::now();
        assert_eq!(classify(&e, Side::A, &item("a1", Some(later)), None), DriftState::InSync);
    }

    #[test]
    fn test_latest_wins() {
        let t = Utc::now();
        let e = entry_at(t);
        let a = item("a1", Some(t + Duration::minutes(2)));
        let b = item("1", Some(t + Duration::minutes(1)));
        assert_eq!(LatestWinsResolver.resolve(&e, Some(&a), Some(&b)), Resolution::Prefer(Side::A));
        assert_eq!(DeferResolver.resolve(&e, Some(&a), Some(&b)), Resolution::Defer);
        assert_eq!(LatestWinsResolver.resolve(&e, Some(&a), None), Resolution::Defer);
    }
}
