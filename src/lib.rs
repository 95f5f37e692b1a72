pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ident;
pub mod platform;
pub mod store;
pub mod sync;
pub mod tools;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use config::Settings;
pub use diagnostics::{PlatformProbe, ProbeReport};
pub use error::{Error, Result};
pub use ident::{parse_github_repo, parse_rid, GithubRepo};
pub use platform::{Category, Platform, RemoteItem, Side};
pub use store::{MappingEntry, MappingStore};
pub use sync::{
    CancelFlag, CategoryFilter, Direction, DirectionFilter, NoopProgress, RetryPolicy, RunState,
    RunSummary, SyncOptions, SyncProgress, SyncStatus,
};

use sync::conflict::{ConflictResolver, DeferResolver};
use sync::orchestrator::Orchestrator;

/// Main entry point: one Radicle repository (side A) paired with one GitHub
/// repository (side B) and the mapping store that links them.
pub struct RadSync {
    a: Box<dyn Platform>,
    b: Box<dyn Platform>,
    store_path: PathBuf,
    resolver: Box<dyn ConflictResolver>,
    cancel: CancelFlag,
}

/// Snapshot of the mapping store, as shown by `radsync status`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub store_path: PathBuf,
    pub exists: bool,
    pub platform_a: Option<String>,
    pub platform_b: Option<String>,
    pub issues: usize,
    pub patches: usize,
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
}

impl StoreStatus {
    /// Read the store at `path` without locking it.
    pub fn read(path: &Path) -> Result<Self> {
        let store = MappingStore::load(path)?;
        Ok(Self {
            store_path: path.to_path_buf(),
            exists: path.exists(),
            platform_a: store.platform_identifier(Side::A).map(String::from),
            platform_b: store.platform_identifier(Side::B).map(String::from),
            issues: store.len(Category::Issues),
            patches: store.len(Category::Patches),
            last_sync: store.last_sync(),
        })
    }
}

impl RadSync {
    pub fn new(a: Box<dyn Platform>, b: Box<dyn Platform>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            a,
            b,
            store_path: store_path.into(),
            resolver: Box::new(DeferResolver),
            cancel: CancelFlag::new(),
        }
    }

    /// Build the Radicle and GitHub adapters from resolved settings. Without
    /// an explicit RID this asks `rad` which repository the checkout is.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let b = settings.github_client()?;
        let a = settings.radicle_client().await?;
        Ok(Self::new(Box::new(a), Box::new(b), settings.store_path()?))
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Flag observed by running syncs; set it to stop before the next item.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Probe both platforms without touching the store.
    pub async fn test_connection(&self, limit: usize) -> ProbeReport {
        diagnostics::probe(self.a.as_ref(), self.b.as_ref(), limit).await
    }

    /// Run a full reconciliation with the given options.
    pub async fn sync(&self, options: &SyncOptions, progress: &dyn SyncProgress) -> RunSummary {
        log::info!(
            "Syncing {} <-> {} (store {})",
            self.a.identifier(),
            self.b.identifier(),
            self.store_path.display()
        );
        let mut orchestrator = Orchestrator::new(
            self.a.as_ref(),
            self.b.as_ref(),
            &self.store_path,
            self.resolver.as_ref(),
            self.cancel.clone(),
        );
        orchestrator.run(options, progress).await
    }

    /// Reconcile issues only, in both directions.
    pub async fn sync_issues(&self, dry_run: bool, progress: &dyn SyncProgress) -> RunSummary {
        let options = SyncOptions {
            dry_run,
            categories: CategoryFilter::IssuesOnly,
            ..SyncOptions::default()
        };
        self.sync(&options, progress).await
    }

    pub fn status(&self) -> Result<StoreStatus> {
        StoreStatus::read(&self.store_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryPlatform;
    use tempfile::TempDir;

    fn radsync(dir: &TempDir) -> RadSync {
        let a = MemoryPlatform::new(Side::A, "radicle")
            .with_items(vec![RemoteItem::new("a1", "Radicle one")]);
        let b = MemoryPlatform::new(Side::B, "github")
            .with_items(vec![RemoteItem::new("1", "GitHub one")]);
        RadSync::new(Box::new(a), Box::new(b), dir.path().join("store.json"))
    }

    #[tokio::test]
    async fn test_status_before_and_after_sync() {
        let dir = TempDir::new().unwrap();
        let rs = radsync(&dir);

        let before = rs.status().unwrap();
        assert!(!before.exists);
        assert_eq!(before.issues, 0);

        let summary = rs.sync_issues(false, &NoopProgress).await;
        assert_eq!(summary.status, SyncStatus::Synced);

        let after = rs.status().unwrap();
        assert!(after.exists);
        assert_eq!(after.issues, 2);
        assert_eq!(after.platform_b.as_deref(), Some("memory:github"));
        assert!(after.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_cancel_flag_reaches_run() {
        let dir = TempDir::new().unwrap();
        let rs = radsync(&dir);
        rs.cancel_flag().cancel();
        let summary = rs.sync(&SyncOptions::default(), &NoopProgress).await;
        assert!(summary.cancelled);
        assert_eq!(summary.created(), 0);
    }
}
