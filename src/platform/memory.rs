//! In-memory platform used to exercise the reconciler without a network.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::platform::{Category, CreatedItem, NewItem, Platform, RemoteItem, Side};
use crate::sync::CancelFlag;

#[derive(Default)]
struct State {
    issues: Vec<RemoteItem>,
    next_id: u64,
    create_calls: usize,
    detail_calls: usize,
    fail_titles: HashSet<String>,
    unavailable: bool,
    reject_credentials: bool,
    bare_listing: bool,
    create_delays: HashMap<String, Duration>,
    in_flight: usize,
    max_in_flight: usize,
    cancel_after: Option<(usize, CancelFlag)>,
    created: usize,
}

/// A platform whose items live in a vector. Creates append to it, so a
/// second listing observes earlier creates the way a real platform would.
pub struct MemoryPlatform {
    side: Side,
    name: String,
    identifier: String,
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new(side: Side, name: &str) -> Self {
        Self {
            side,
            name: name.to_string(),
            identifier: format!("memory:{name}"),
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    pub fn with_items(self, items: Vec<RemoteItem>) -> Self {
        {
            let mut state = self.lock();
            state.next_id += items.len() as u64;
            state.issues = items;
        }
        self
    }

    /// Add an item as if someone opened it on the platform.
    pub fn push_item(&self, item: RemoteItem) {
        self.lock().issues.push(item);
    }

    /// Make every create whose title equals `title` fail with a validation error.
    pub fn fail_creates_titled(&self, title: &str) {
        self.lock().fail_titles.insert(title.to_string());
    }

    /// Make every call fail as if the platform were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make every create fail the way a read-only token does.
    pub fn reject_credentials(&self) {
        self.lock().reject_credentials = true;
    }

    /// List items with no body or link, leaving `fetch_details` to fill them
    /// in, the way `rad issue list` does.
    pub fn with_bare_listing(self) -> Self {
        self.lock().bare_listing = true;
        self
    }

    /// Hold creates of `title` for `delay` before they complete.
    pub fn delay_creates_titled(&self, title: &str, delay: Duration) {
        self.lock().create_delays.insert(title.to_string(), delay);
    }

    /// Cancel `cancel` while the `n`th successful create is in progress.
    pub fn cancel_during_create(&self, n: usize, cancel: CancelFlag) {
        self.lock().cancel_after = Some((n, cancel));
    }

    /// Largest number of creates that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn detail_calls(&self) -> usize {
        self.lock().detail_calls
    }

    /// Number of `create_item` calls that reached this platform, successful or not.
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn items(&self) -> Vec<RemoteItem> {
        self.lock().issues.clone()
    }

    /// Touch an item's `updated_at`, simulating an edit on the platform.
    pub fn touch(&self, id: &str, at: chrono::DateTime<Utc>) {
        let mut state = self.lock();
        if let Some(item) = state.issues.iter_mut().find(|i| i.id == id) {
            item.updated_at = Some(at);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mint_id(&self, n: u64) -> String {
        match self.side {
            Side::A => format!("{n:040x}"),
            Side::B => n.to_string(),
        }
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    fn side(&self) -> Side {
        self.side
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    async fn list_items(
        &self,
        category: Category,
        limit: Option<usize>,
    ) -> Result<Vec<RemoteItem>> {
        let state = self.lock();
        if state.unavailable {
            return Err(Error::unavailable(&self.name, "connection refused"));
        }
        if category == Category::Patches {
            return Err(Error::not_supported(&self.name, "patch listing"));
        }
        let bare = state.bare_listing;
        let items = state
            .issues
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .map(|mut item| {
                if bare {
                    item.body.clear();
                    item.url = None;
                }
                item
            })
            .collect();
        Ok(items)
    }

    async fn fetch_details(&self, _category: Category, item: &RemoteItem) -> Result<RemoteItem> {
        let mut state = self.lock();
        state.detail_calls += 1;
        if state.unavailable {
            return Err(Error::unavailable(&self.name, "connection refused"));
        }
        Ok(state
            .issues
            .iter()
            .find(|i| i.id == item.id)
            .cloned()
            .unwrap_or_else(|| item.clone()))
    }

    async fn create_item(&self, category: Category, item: &NewItem) -> Result<CreatedItem> {
        let delay = {
            let mut state = self.lock();
            state.create_calls += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.create_delays.get(&item.title).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.in_flight -= 1;
        if state.reject_credentials {
            return Err(Error::auth(
                &self.name,
                "HTTP 403: Resource not accessible by personal access token",
            ));
        }
        if state.unavailable {
            return Err(Error::unavailable(&self.name, "connection refused"));
        }
        if category == Category::Patches {
            return Err(Error::not_supported(&self.name, "patch creation"));
        }
        if state.fail_titles.contains(&item.title) {
            return Err(Error::validation(
                &self.name,
                format!("rejected title {:?}", item.title),
            ));
        }

        let id = self.mint_id(state.next_id);
        state.next_id += 1;
        let now = Utc::now();
        state.issues.push(RemoteItem {
            id: id.clone(),
            title: item.title.clone(),
            body: item.body.clone(),
            author: "radsync".to_string(),
            created_at: Some(now),
            updated_at: Some(now),
            url: None,
            labels: item.labels.clone(),
        });
        state.created += 1;
        if let Some((n, cancel)) = &state.cancel_after {
            if state.created == *n {
                cancel.cancel();
            }
        }
        Ok(CreatedItem {
            id,
            url: None,
            updated_at: Some(now),
        })
    }
}
