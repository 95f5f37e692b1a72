pub mod conflict;
pub mod orchestrator;
pub mod provenance;
pub mod reconciler;
pub mod report;
pub mod retry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::platform::{Category, Side};

pub use orchestrator::RunState;
pub use report::{ItemFailure, ItemOutcome, RunSummary, SyncStatus};
pub use retry::RetryPolicy;

/// One direction of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    #[serde(rename = "a_to_b")]
    AtoB,
    #[serde(rename = "b_to_a")]
    BtoA,
}

impl Direction {
    pub fn source(self) -> Side {
        match self {
            Direction::AtoB => Side::A,
            Direction::BtoA => Side::B,
        }
    }

    pub fn target(self) -> Side {
        self.source().other()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AtoB => f.write_str("A→B"),
            Direction::BtoA => f.write_str("B→A"),
        }
    }
}

/// Which directions a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionFilter {
    #[default]
    Both,
    AtoBOnly,
    BtoAOnly,
}

impl DirectionFilter {
    pub fn includes(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (DirectionFilter::Both, _)
                | (DirectionFilter::AtoBOnly, Direction::AtoB)
                | (DirectionFilter::BtoAOnly, Direction::BtoA)
        )
    }
}

/// Which item categories a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    IssuesOnly,
    PatchesOnly,
}

impl CategoryFilter {
    pub fn categories(self) -> Vec<Category> {
        match self {
            CategoryFilter::All => Category::ALL.to_vec(),
            CategoryFilter::IssuesOnly => vec![Category::Issues],
            CategoryFilter::PatchesOnly => vec![Category::Patches],
        }
    }
}

/// Options controlling a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub directions: DirectionFilter,
    pub categories: CategoryFilter,
    /// Compare timestamps of already-mapped items and report drift.
    pub detect_drift: bool,
    /// Upper bound on concurrent create calls toward one target platform.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            directions: DirectionFilter::Both,
            categories: CategoryFilter::All,
            detect_drift: true,
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative cancellation shared between the caller and a running sync.
/// Checked before each item; in-flight calls are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callbacks for reporting progress during a run.
pub trait SyncProgress: Send + Sync {
    fn on_state(&self, _state: RunState) {}
    fn on_pass_start(&self, _direction: Direction, _category: Category, _items: usize) {}
    fn on_item(&self, _outcome: &ItemOutcome) {}
    fn on_complete(&self, _summary: &RunSummary) {}
}

/// No-op progress reporter.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::AtoB.source(), Side::A);
        assert_eq!(Direction::AtoB.target(), Side::B);
        assert_eq!(Direction::BtoA.source(), Side::B);
    }

    #[test]
    fn test_direction_filter() {
        assert!(DirectionFilter::Both.includes(Direction::BtoA));
        assert!(DirectionFilter::AtoBOnly.includes(Direction::AtoB));
        assert!(!DirectionFilter::AtoBOnly.includes(Direction::BtoA));
    }

    #[test]
    fn test_category_filter() {
        assert_eq!(CategoryFilter::IssuesOnly.categories(), vec![Category::Issues]);
        assert_eq!(CategoryFilter::All.categories().len(), 2);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
