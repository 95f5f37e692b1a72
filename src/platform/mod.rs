pub mod github;
pub mod memory;
pub mod radicle;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the two platforms being reconciled. `A` is the peer-to-peer side
/// (Radicle), `B` the hosted issue tracker (GitHub).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// Kind of collaboration item being mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Issues,
    Patches,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Issues, Category::Patches];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Issues => "issues",
            Category::Patches => "patches",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized view of an item on either platform.
///
/// Adapters build these from their native output and call [`RemoteItem::validate`]
/// before handing them to the reconciler, so required fields are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl RemoteItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            author: String::new(),
            created_at: None,
            updated_at: None,
            url: None,
            labels: Vec::new(),
        }
    }

    /// Reject partially-shaped items at the adapter boundary.
    pub fn validate(self, platform: &str) -> Result<Self> {
        if self.id.trim().is_empty() {
            return Err(Error::validation(
                platform,
                format!("item without an id (title: {:?})", self.title),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(Error::validation(
                platform,
                format!("item {} has an empty title", self.id),
            ));
        }
        Ok(self)
    }
}

/// Where a mirrored item came from, carried into the provenance footer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMetadata {
    pub platform: String,
    pub id: String,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

/// Payload for creating a mirrored item on a target platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewItem {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub source: SourceMetadata,
}

/// What a platform hands back after a successful create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedItem {
    pub id: String,
    pub url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields an update would change. Reserved for update propagation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub labels: Option<Vec<String>>,
}

/// Capability interface over one collaboration platform.
///
/// Implementations perform no deduplication: every `create_item` call creates
/// a real, externally visible item. Callers guard it with the mapping store.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Which side of the reconciliation this adapter serves.
    fn side(&self) -> Side;

    /// Short platform name used in logs and errors ("radicle", "github").
    fn name(&self) -> &str;

    /// Repository identifier recorded in the mapping store.
    fn identifier(&self) -> String;

    /// List items in the platform's natural order. `limit` bounds the result
    /// for connectivity probes.
    async fn list_items(&self, category: Category, limit: Option<usize>) -> Result<Vec<RemoteItem>>;

    /// Complete an item from a listing before it is mirrored. Listings that
    /// already carry the body and timestamps need not override this.
    async fn fetch_details(&self, category: Category, item: &RemoteItem) -> Result<RemoteItem> {
        let _ = category;
        Ok(item.clone())
    }

    async fn create_item(&self, category: Category, item: &NewItem) -> Result<CreatedItem>;

    /// Update propagation is not implemented by any adapter yet.
    async fn update_item(&self, category: Category, id: &str, update: &ItemUpdate) -> Result<()> {
        let _ = (category, id, update);
        Err(Error::not_supported(self.name(), "update_item"))
    }
}
