//! Persistent metadata for mods.
//!
//! [`MetadataStore`] is the in-memory view of `mods.json`: one [`ModRecord`]
//! per mod name, in insertion order. It is constructed once at startup and
//! handed around as a [`SharedStore`]; there is no global instance.

pub mod profiles;

pub use profiles::{ProfilePlan, ProfileStore};

use crate::models::{ModCategory, ModRecord, normalize_tags};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Mod name -> metadata, backed by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    path: Option<Utf8PathBuf>,
    records: IndexMap<String, ModRecord>,
}

impl MetadataStore {
    /// A store that is never written to disk. Used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from `path`; a missing or empty file yields an empty store.
    pub fn load<P: AsRef<Utf8Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            tracing::info!("No mod store at {}, starting empty", path);
            return Ok(Self {
                path: Some(path),
                records: IndexMap::new(),
            });
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read mod store: {}", path))?;

        let mut records: IndexMap<String, ModRecord> = if raw.trim().is_empty() {
            IndexMap::new()
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse mod store: {}", path))?
        };

        for (name, record) in records.iter_mut() {
            record.name = name.clone();
        }

        tracing::info!("Loaded {} mod records from {}", records.len(), path);
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    /// Write the store back to its file. In-memory stores are a no-op.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let raw = serde_json::to_string_pretty(&self.records)
            .context("Failed to serialize mod store")?;

        fs::write(path, raw).with_context(|| format!("Failed to write mod store: {}", path))?;

        tracing::info!("Saved {} mod records to {}", self.records.len(), path);
        Ok(())
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &ModRecord> {
        self.records.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ModRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModRecord> {
        self.records.get_mut(name)
    }

    /// Insert a record, replacing any previous record with the same name.
    pub fn insert(&mut self, record: ModRecord) {
        self.records.insert(record.name.clone(), record);
    }

    /// Register mods under `category`.
    ///
    /// Creates records for unknown names; every named record ends up with the
    /// given category and `enabled = true`.
    pub fn register<I, S>(&mut self, names: I, category: ModCategory)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            let record = self.records.entry(name.to_string()).or_insert_with(|| {
                tracing::info!("Adding new mod to the store: {}", name);
                ModRecord::new(name, Some(category))
            });
            record.category = Some(category);
            record.enabled = true;
        }
    }

    /// Remove mods from the store, returning the records that existed.
    pub fn remove<I, S>(&mut self, names: I) -> Vec<ModRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| {
                let removed = self.records.shift_remove(name.as_ref());
                if removed.is_some() {
                    tracing::info!("Removed mod from the store: {}", name.as_ref());
                }
                removed
            })
            .collect()
    }

    /// Purge every record.
    pub fn clear(&mut self) {
        tracing::warn!("Clearing all {} mod records", self.records.len());
        self.records.clear();
    }

    pub fn category(&self, name: &str) -> Option<ModCategory> {
        self.get(name).and_then(|record| record.category)
    }

    pub fn set_category(&mut self, name: &str, category: ModCategory) -> bool {
        self.update(name, |record| record.category = Some(category))
    }

    /// Unknown mods read as enabled.
    pub fn enabled(&self, name: &str) -> bool {
        self.get(name).is_none_or(|record| record.enabled)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        self.update(name, |record| record.enabled = enabled)
    }

    /// Unknown mods read as not ignored.
    pub fn ignored(&self, name: &str) -> bool {
        self.get(name).is_some_and(|record| record.ignored)
    }

    pub fn set_ignored(&mut self, name: &str, ignored: bool) -> bool {
        self.update(name, |record| record.ignored = ignored)
    }

    /// Names of all ignored mods, in store order.
    pub fn ignored_mods(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|record| record.ignored)
            .map(|record| record.name.clone())
            .collect()
    }

    pub fn workshop_asset_id(&self, name: &str) -> &str {
        self.get(name)
            .map(|record| record.workshop_asset_id.as_str())
            .unwrap_or_default()
    }

    pub fn set_workshop_asset_id(&mut self, name: &str, id: impl Into<String>) -> bool {
        let id = id.into();
        self.update(name, |record| record.workshop_asset_id = id)
    }

    pub fn tags(&self, name: &str) -> BTreeSet<String> {
        self.get(name)
            .map(|record| record.tags.clone())
            .unwrap_or_default()
    }

    /// Every tag used by any mod, sorted and unique.
    pub fn all_tags(&self) -> BTreeSet<String> {
        self.records
            .values()
            .flat_map(|record| record.tags.iter().cloned())
            .collect()
    }

    /// Union `tags` into each named mod's tag set. Unknown mods are skipped.
    pub fn add_tags<T, N>(&mut self, tags: &[T], names: &[N])
    where
        T: AsRef<str>,
        N: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return;
        }

        for name in names {
            let name = name.as_ref();
            if let Some(record) = self.records.get_mut(name) {
                let before = record.tags.len();
                record.tags.extend(tags.iter().cloned());
                tracing::info!(
                    "Tags of {}: {} -> {} entries",
                    name,
                    before,
                    record.tags.len()
                );
            }
        }
    }

    /// Remove `tags` from each named mod.
    pub fn remove_tags<T, N>(&mut self, tags: &[T], names: &[N])
    where
        T: AsRef<str>,
        N: AsRef<str>,
    {
        let tags = normalize_tags(tags);

        for name in names {
            if let Some(record) = self.records.get_mut(name.as_ref()) {
                record.tags.retain(|tag| !tags.contains(tag));
            }
        }
    }

    /// Replace each named mod's tags with exactly `tags`.
    pub fn replace_tags<T, N>(&mut self, tags: &[T], names: &[N])
    where
        T: AsRef<str>,
        N: AsRef<str>,
    {
        let tags = normalize_tags(tags);

        for name in names {
            if let Some(record) = self.records.get_mut(name.as_ref()) {
                record.tags = tags.clone();
            }
        }
    }

    /// Empty the tag set of every mod.
    pub fn clear_all_tags(&mut self) {
        tracing::warn!("Clearing all tags");
        for record in self.records.values_mut() {
            record.tags.clear();
        }
    }

    fn update<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut ModRecord),
    {
        match self.records.get_mut(name) {
            Some(record) => {
                f(record);
                true
            }
            None => {
                tracing::debug!("No record for {}, update ignored", name);
                false
            }
        }
    }
}

/// Process-wide handle to the one [`MetadataStore`].
///
/// The caller thread owns logical write access; task workers only read,
/// except for the Delete task which removes records before trashing them.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<MetadataStore>>,
}

impl SharedStore {
    pub fn new(store: MetadataStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Execute a function with read access to the store.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&MetadataStore) -> R,
    {
        f(&self.read_guard())
    }

    /// Execute a function with write access to the store.
    pub fn write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut MetadataStore) -> R,
    {
        f(&mut self.write_guard())
    }

    /// Clone of the current contents.
    pub fn snapshot(&self) -> MetadataStore {
        self.read_guard().clone()
    }

    pub fn save(&self) -> Result<()> {
        self.read_guard().save()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, MetadataStore> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, MetadataStore> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
