pub mod lock;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::{Category, Side};

pub use lock::StoreLock;

const STORE_VERSION: u32 = 1;

/// The durable link between one item on each platform.
///
/// The key pair is fixed at construction; nothing in the crate exposes a way
/// to repoint an existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    key_a: String,
    key_b: String,
    /// Title at last sync. Diagnostics only; never used for matching.
    pub title: String,
    /// Side the item was first mirrored from.
    pub origin: Side,
    pub last_synced_at: DateTime<Utc>,
    /// Last-known modification time on the origin side.
    #[serde(default)]
    pub source_updated_at: Option<DateTime<Utc>>,
    /// Last-known modification time on the mirrored side.
    #[serde(default)]
    pub target_updated_at: Option<DateTime<Utc>>,
}

impl MappingEntry {
    pub fn new(
        key_a: impl Into<String>,
        key_b: impl Into<String>,
        title: impl Into<String>,
        origin: Side,
    ) -> Self {
        Self {
            key_a: key_a.into(),
            key_b: key_b.into(),
            title: title.into(),
            origin,
            last_synced_at: Utc::now(),
            source_updated_at: None,
            target_updated_at: None,
        }
    }

    pub fn key_a(&self) -> &str {
        &self.key_a
    }

    pub fn key_b(&self) -> &str {
        &self.key_b
    }

    pub fn key_on(&self, side: Side) -> &str {
        match side {
            Side::A => &self.key_a,
            Side::B => &self.key_b,
        }
    }

    pub fn composite_key(&self) -> String {
        composite_key(&self.key_a, &self.key_b)
    }

    /// Stored modification time for the given side.
    pub fn updated_at_on(&self, side: Side) -> Option<DateTime<Utc>> {
        if side == self.origin {
            self.source_updated_at
        } else {
            self.target_updated_at
        }
    }
}

pub fn composite_key(key_a: &str, key_b: &str) -> String {
    format!("{key_a}~{key_b}")
}

/// On-disk layout. Unknown fields are ignored so newer files stay readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    issues: BTreeMap<String, MappingEntry>,
    #[serde(default)]
    patches: BTreeMap<String, MappingEntry>,
    #[serde(default)]
    last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    platform_a: Option<String>,
    #[serde(default)]
    platform_b: Option<String>,
}

/// All mapping entries, keyed by category and composite key.
#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    doc: StoreDocument,
}

impl MappingStore {
    pub fn new() -> Self {
        Self {
            doc: StoreDocument {
                version: STORE_VERSION,
                ..StoreDocument::default()
            },
        }
    }

    /// Read the store from `path`. A missing file yields an empty store; a
    /// file that cannot be parsed is `StoreCorrupt`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No mapping store at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(Error::StoreCorrupt {
                    path: path.to_path_buf(),
                    message: format!("unreadable: {e}"),
                })
            }
        };

        let doc: StoreDocument = serde_json::from_str(&raw).map_err(|e| Error::StoreCorrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if doc.version > STORE_VERSION {
            log::warn!(
                "Mapping store {} has format version {}; this build writes version {}",
                path.display(),
                doc.version,
                STORE_VERSION
            );
        }

        let store = Self { doc };
        store.check_unique().map_err(|e| Error::StoreCorrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        log::debug!(
            "Loaded {} issue and {} patch mappings from {}",
            store.doc.issues.len(),
            store.doc.patches.len(),
            path.display()
        );
        Ok(store)
    }

    /// Write the whole store atomically: temp file in the same directory,
    /// fsync, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        let json = serde_json::to_vec_pretty(&self.doc)?;

        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
        log::debug!("Persisted mapping store to {}", path.display());
        Ok(())
    }

    fn map(&self, category: Category) -> &BTreeMap<String, MappingEntry> {
        match category {
            Category::Issues => &self.doc.issues,
            Category::Patches => &self.doc.patches,
        }
    }

    fn map_mut(&mut self, category: Category) -> &mut BTreeMap<String, MappingEntry> {
        match category {
            Category::Issues => &mut self.doc.issues,
            Category::Patches => &mut self.doc.patches,
        }
    }

    pub fn entries(&self, category: Category) -> impl Iterator<Item = &MappingEntry> {
        self.map(category).values()
    }

    pub fn len(&self, category: Category) -> usize {
        self.map(category).len()
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.map(*c).is_empty())
    }

    /// Find the entry whose key on `side` is `key`.
    pub fn find_by_key(&self, category: Category, side: Side, key: &str) -> Option<&MappingEntry> {
        self.map(category).values().find(|e| e.key_on(side) == key)
    }

    /// Add a new entry. Fails if either key is already mapped, so a link is
    /// never silently repointed.
    pub fn insert(&mut self, category: Category, entry: MappingEntry) -> Result<()> {
        if let Some(existing) = self
            .map(category)
            .values()
            .find(|e| e.key_a == entry.key_a || e.key_b == entry.key_b)
        {
            return Err(Error::DuplicateMapping(format!(
                "{category} {} conflicts with existing {}",
                entry.composite_key(),
                existing.composite_key()
            )));
        }
        let key = entry.composite_key();
        self.map_mut(category).insert(key, entry);
        Ok(())
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.doc.last_sync
    }

    pub fn set_last_sync(&mut self, at: DateTime<Utc>) {
        self.doc.last_sync = Some(at);
    }

    pub fn platform_identifier(&self, side: Side) -> Option<&str> {
        match side {
            Side::A => self.doc.platform_a.as_deref(),
            Side::B => self.doc.platform_b.as_deref(),
        }
    }

    /// Record which repositories this store belongs to. A store already bound
    /// to different repositories is rejected rather than reused.
    pub fn bind_platforms(&mut self, platform_a: &str, platform_b: &str) -> Result<()> {
        for (side, wanted) in [(Side::A, platform_a), (Side::B, platform_b)] {
            if let Some(current) = self.platform_identifier(side) {
                if current != wanted {
                    return Err(Error::Config(format!(
                        "mapping store belongs to platform {side} repository {current}, not {wanted}"
                    )));
                }
            }
        }
        self.doc.platform_a = Some(platform_a.to_string());
        self.doc.platform_b = Some(platform_b.to_string());
        Ok(())
    }

    fn check_unique(&self) -> Result<()> {
        for category in Category::ALL {
            let mut seen_a = std::collections::HashSet::new();
            let mut seen_b = std::collections::HashSet::new();
            for entry in self.map(category).values() {
                if !seen_a.insert(entry.key_a.as_str()) || !seen_b.insert(entry.key_b.as_str()) {
                    return Err(Error::DuplicateMapping(format!(
                        "{category} key reused by {}",
                        entry.composite_key()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

/// Default store location: `~/.radsync/<owner>-<repo>.json`.
pub fn default_store_path(slug: &str) -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
        .join(".radsync");
    Ok(dir.join(format!("{slug}.json")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(a: &str, b: &str) -> MappingEntry {
        MappingEntry::new(a, b, format!("title {a}"), Side::A)
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::load(&dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
        assert!(store.last_sync().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let mut store = MappingStore::new();
        store.bind_platforms("rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5", "o/r").unwrap();
        store.insert(Category::Issues, entry("4b7ad1f", "12")).unwrap();
        store.set_last_sync(Utc::now());
        store.save(&path).unwrap();

        let loaded = MappingStore::load(&path).unwrap();
        assert_eq!(loaded.len(Category::Issues), 1);
        assert_eq!(loaded.platform_identifier(Side::B), Some("o/r"));
        let found = loaded.find_by_key(Category::Issues, Side::B, "12").unwrap();
        assert_eq!(found.key_a(), "4b7ad1f");
        assert!(loaded.last_sync().is_some());

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();
        let err = MappingStore::load(&path).unwrap_err();
        assert_eq!(err.kind(), "store_corrupt");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "issues": {
                    "abc1234~7": {
                        "key_a": "abc1234", "key_b": "7", "title": "t", "origin": "B",
                        "last_synced_at": "2024-01-01T00:00:00Z",
                        "comment_cursor": "future field"
                    }
                },
                "future_top_level": {"x": 1}
            }"#,
        )
        .unwrap();
        let store = MappingStore::load(&path).unwrap();
        let e = store.find_by_key(Category::Issues, Side::A, "abc1234").unwrap();
        assert_eq!(e.origin, Side::B);
        assert!(e.source_updated_at.is_none());
        assert_eq!(store.len(Category::Patches), 0);
    }

    #[test]
    fn test_duplicate_keys_on_disk_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(
            &path,
            r#"{"issues": {
                "a1~1": {"key_a": "a1", "key_b": "1", "title": "x", "origin": "A", "last_synced_at": "2024-01-01T00:00:00Z"},
                "a1~2": {"key_a": "a1", "key_b": "2", "title": "y", "origin": "A", "last_synced_at": "2024-01-01T00:00:00Z"}
            }}"#,
        )
        .unwrap();
        assert_eq!(MappingStore::load(&path).unwrap_err().kind(), "store_corrupt");
    }

    #[test]
    fn test_insert_rejects_reused_keys() {
        let mut store = MappingStore::new();
        store.insert(Category::Issues, entry("a1", "1")).unwrap();
        assert!(store.insert(Category::Issues, entry("a1", "2")).is_err());
        assert!(store.insert(Category::Issues, entry("a2", "1")).is_err());
        // Same keys are fine in a different category.
        store.insert(Category::Patches, entry("a1", "1")).unwrap();
        assert_eq!(store.len(Category::Issues), 1);
    }

    #[test]
    fn test_bind_platforms_rejects_other_repository() {
        let mut store = MappingStore::new();
        store.bind_platforms("rad:zA", "o/r").unwrap();
        store.bind_platforms("rad:zA", "o/r").unwrap();
        let err = store.bind_platforms("rad:zA", "o/other").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_updated_at_on_follows_origin() {
        let mut e = MappingEntry::new("a", "1", "t", Side::B);
        let t1 = Utc::now();
        e.source_updated_at = Some(t1);
        assert_eq!(e.updated_at_on(Side::B), Some(t1));
        assert_eq!(e.updated_at_on(Side::A), None);
    }
}
