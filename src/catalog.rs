use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::launch::LaunchProfile;

/// A game (or other app) the user can be credited playtime for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    /// Platform tag, e.g. `psn` or `xbox`.
    pub platform: String,
    /// The platform's own identifier for the title, when known.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub playtime_minutes: u64,
    #[serde(default)]
    pub last_active: Option<SystemTime>,
    #[serde(default)]
    pub launch: LaunchProfile,
}

/// Fields for an entry the catalog has not seen yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub name: String,
    pub platform: String,
    pub external_id: Option<String>,
    pub launch: LaunchProfile,
    pub last_active: Option<SystemTime>,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog entry not found: {0}")]
    NotFound(String),

    #[error("failed to write catalog {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode catalog: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The game catalog as seen by the supervisor.
///
/// Lookups compare case-insensitively and are scoped to one platform.
/// All calls happen on the supervisor task, so implementations must not
/// block for long.
pub trait CatalogStore: Send + Sync {
    fn get(&self, id: &str) -> Option<CatalogEntry>;
    fn find_by_external_id(&self, platform: &str, external_id: &str) -> Option<CatalogEntry>;
    fn find_by_name(&self, platform: &str, name: &str) -> Option<CatalogEntry>;
    fn create(&self, entry: NewEntry) -> Result<CatalogEntry, CatalogError>;
    fn update(&self, entry: &CatalogEntry) -> Result<(), CatalogError>;
    fn persist(&self) -> Result<(), CatalogError>;
    /// Tell whoever renders the catalog that the entry list changed.
    fn notify_changed(&self) {}
}

/// Credit `minutes` to entry `id` and persist. Failures are logged only.
pub fn credit_playtime(catalog: &dyn CatalogStore, id: &str, minutes: u64, at: SystemTime) {
    let Some(mut entry) = catalog.get(id) else {
        tracing::debug!(id, minutes, "playtime target not in catalog");
        return;
    };
    entry.playtime_minutes += minutes;
    entry.last_active = Some(at);
    if let Err(e) = catalog.update(&entry).and_then(|_| catalog.persist()) {
        tracing::warn!(id, minutes, error = %e, "failed to record playtime");
        return;
    }
    tracing::info!(id, minutes, total = entry.playtime_minutes, "credited playtime");
}

/// In-process catalog, optionally snapshotted to a JSON file on `persist`.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
    path: Option<PathBuf>,
    revision: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            ..Self::default()
        }
    }

    /// Load from a JSON snapshot. A missing file yields an empty catalog
    /// that will be written to `path` on the first persist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| CatalogError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
            revision: AtomicU64::new(0),
        })
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.entries.read().clone()
    }

    /// Bumped every time the catalog announces a structural change.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn find(&self, pred: impl Fn(&CatalogEntry) -> bool) -> Option<CatalogEntry> {
        self.entries.read().iter().find(|e| pred(e)).cloned()
    }
}

impl CatalogStore for MemoryCatalog {
    fn get(&self, id: &str) -> Option<CatalogEntry> {
        self.find(|e| e.id == id)
    }

    fn find_by_external_id(&self, platform: &str, external_id: &str) -> Option<CatalogEntry> {
        self.find(|e| {
            e.platform == platform
                && e.external_id
                    .as_deref()
                    .is_some_and(|x| !x.is_empty() && x.eq_ignore_ascii_case(external_id))
        })
    }

    fn find_by_name(&self, platform: &str, name: &str) -> Option<CatalogEntry> {
        let wanted = name.to_lowercase();
        self.find(|e| e.platform == platform && !e.name.is_empty() && e.name.to_lowercase() == wanted)
    }

    fn create(&self, entry: NewEntry) -> Result<CatalogEntry, CatalogError> {
        let created = CatalogEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: entry.name,
            platform: entry.platform,
            external_id: entry.external_id,
            playtime_minutes: 0,
            last_active: entry.last_active,
            launch: entry.launch,
        };
        self.entries.write().push(created.clone());
        Ok(created)
    }

    fn update(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        let mut entries = self.entries.write();
        let slot = entries
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| CatalogError::NotFound(entry.id.clone()))?;
        *slot = entry.clone();
        Ok(())
    }

    fn persist(&self) -> Result<(), CatalogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&*self.entries.read())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CatalogError::Write {
                path: path.clone(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| CatalogError::Write {
            path: path.clone(),
            source,
        })
    }

    fn notify_changed(&self) {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(revision, "catalog changed");
    }
}
