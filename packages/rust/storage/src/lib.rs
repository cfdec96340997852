//! Persistent ingredient→category cache.
//!
//! The cache is a flat JSON mapping file from normalized ingredient name
//! to category label. It is the only mutable state shared across pipeline
//! runs, with an explicit lifecycle: load at resolver start, append-only
//! inserts during the run, atomic persist at resolver end.
//!
//! **Access rules:**
//! - Entries are never overwritten — the first category assigned to an
//!   ingredient wins for the lifetime of the cache file.
//! - Persisting writes the full mapping to a temp file, then renames.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use foodprint_shared::{FoodprintError, Result};
use tracing::{debug, info};

/// Durable mapping from normalized ingredient name to category label.
#[derive(Debug)]
pub struct CategoryCache {
    path: PathBuf,
    /// BTreeMap keeps the persisted file deterministically ordered.
    entries: BTreeMap<String, String>,
    /// Entries added since load (for run summaries).
    added: usize,
}

impl CategoryCache {
    /// Load the cache from `path`. A missing file yields an empty cache;
    /// a present-but-unparseable file is a hard error (the alternative
    /// silently discards accumulated classifications).
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| FoodprintError::io(path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                FoodprintError::Cache(format!("invalid cache file {}: {e}", path.display()))
            })?
        } else {
            debug!(path = %path.display(), "cache file not found, starting empty");
            BTreeMap::new()
        };

        info!(path = %path.display(), entries = entries.len(), "category cache loaded");

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            added: 0,
        })
    }

    /// Look up the category for a normalized ingredient name.
    pub fn get(&self, ingredient: &str) -> Option<&str> {
        self.entries.get(ingredient).map(String::as_str)
    }

    pub fn contains(&self, ingredient: &str) -> bool {
        self.entries.contains_key(ingredient)
    }

    /// Insert a mapping only if the key is unseen. Returns whether the
    /// entry was added — existing entries are never overwritten, even if
    /// a later classification disagrees.
    pub fn insert_if_absent(&mut self, ingredient: String, category: String) -> bool {
        if self.entries.contains_key(&ingredient) {
            return false;
        }
        self.entries.insert(ingredient, category);
        self.added += 1;
        true
    }

    /// Merge a batch of resolved mappings, idempotent union semantics.
    /// Returns the number of entries actually added.
    pub fn merge(&mut self, resolved: impl IntoIterator<Item = (String, String)>) -> usize {
        let before = self.added;
        for (ingredient, category) in resolved {
            self.insert_if_absent(ingredient, category);
        }
        self.added - before
    }

    /// Write the full mapping back to disk atomically (temp file + rename),
    /// so a crash mid-write never corrupts the accumulated cache.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| FoodprintError::io(parent, e))?;
            }
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| FoodprintError::Cache(format!("serialize cache: {e}")))?;

        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json).map_err(|e| FoodprintError::io(&temp, e))?;
        std::fs::rename(&temp, &self.path).map_err(|e| FoodprintError::io(&self.path, e))?;

        info!(
            path = %self.path.display(),
            entries = self.entries.len(),
            added = self.added,
            "category cache persisted"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries added since this cache was loaded.
    pub fn added(&self) -> usize {
        self.added
    }
}
