use super::paths::PathResolver;
use super::modinfo::ModInfoReader;
use crate::models::ModCategory;
use crate::store::MetadataStore;
use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fs;

/// One row of the authoritative mod list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModEntry {
    pub name: String,
    pub category: ModCategory,
    pub enabled: bool,
    /// Where the mod currently lives on disk.
    pub path: Utf8PathBuf,
    /// `None` when the mod declares no version.
    pub version: Option<String>,
    pub workshop_asset_id: String,
    pub tags: BTreeSet<String>,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Visible mods, in scan order (overrides, mods, maps).
    pub mods: Vec<ModEntry>,
    /// Disabled-directory entries that were left out because nothing was known about them.
    pub unknown_disabled: Vec<String>,
    /// Known mods hidden by their ignore flag.
    pub ignored: Vec<String>,
}

impl Reconciliation {
    pub fn names(&self) -> BTreeSet<&str> {
        self.mods.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModEntry> {
        self.mods.iter().find(|entry| entry.name == name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    category: ModCategory,
    enabled: bool,
}

/// Merges what is on disk with what the store remembers.
#[derive(Debug, Clone)]
pub struct Reconciler {
    paths: PathResolver,
    info: ModInfoReader,
}

impl Reconciler {
    pub fn new(paths: PathResolver) -> Self {
        Self {
            paths,
            info: ModInfoReader::new(),
        }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    /// Scan the category and disabled directories, update `store` and persist it.
    pub fn reconcile(&self, store: &mut MetadataStore) -> Result<Reconciliation> {
        let mut candidates: IndexMap<String, Candidate> = IndexMap::new();

        for category in ModCategory::ALL {
            let dir = self.paths.category_dir(category);
            for name in list_subdirs(&dir) {
                if PathResolver::is_reserved(category, &name) {
                    continue;
                }
                if let Some(existing) = candidates.get(&name) {
                    tracing::warn!(
                        "{} exists in both {} and {}, keeping {}",
                        name,
                        existing.category,
                        category,
                        existing.category
                    );
                    continue;
                }
                candidates.insert(
                    name,
                    Candidate {
                        category,
                        enabled: true,
                    },
                );
            }
        }

        let mut unknown_disabled = Vec::new();
        for name in list_subdirs(self.paths.disabled_dir()) {
            let Some(record) = store.get(&name) else {
                tracing::warn!(
                    "{} is in the disabled directory but has no metadata, ignoring it",
                    name
                );
                unknown_disabled.push(name);
                continue;
            };
            let Some(category) = record.category else {
                tracing::warn!("{} is disabled but has no category, ignoring it", name);
                unknown_disabled.push(name);
                continue;
            };

            if let Some(existing) = candidates.get(&name).filter(|c| c.enabled) {
                tracing::warn!(
                    "{} is both in {} and the disabled directory, treating it as disabled",
                    name,
                    existing.category
                );
            }
            candidates.insert(
                name,
                Candidate {
                    category,
                    enabled: false,
                },
            );
        }

        for (name, candidate) in &candidates {
            if candidate.enabled {
                store.register([name], candidate.category);
            }
        }

        let mut result = Reconciliation {
            unknown_disabled,
            ..Reconciliation::default()
        };

        for (name, candidate) in candidates {
            if store.ignored(&name) {
                result.ignored.push(name);
                continue;
            }

            let path = if candidate.enabled {
                self.paths.mod_path(candidate.category, &name)
            } else {
                self.paths.disabled_path(&name)
            };

            let version = self.info.version(&path);
            if store.workshop_asset_id(&name).is_empty() {
                if let Some(id) = self.info.workshop_asset_id(&path) {
                    tracing::info!("Found workshop asset id {} for {}", id, name);
                    store.set_workshop_asset_id(&name, id);
                }
            }
            store.set_enabled(&name, candidate.enabled);

            tracing::debug!(
                "Reconciled {} ({}, enabled={}, version={:?})",
                name,
                candidate.category,
                candidate.enabled,
                version
            );

            result.mods.push(ModEntry {
                workshop_asset_id: store.workshop_asset_id(&name).to_string(),
                tags: store.tags(&name),
                name,
                category: candidate.category,
                enabled: candidate.enabled,
                path,
                version,
            });
        }

        store.save()?;

        tracing::info!(
            "Reconciled {} mods ({} ignored, {} unknown in disabled directory)",
            result.mods.len(),
            result.ignored.len(),
            result.unknown_disabled.len()
        );
        Ok(result)
    }
}

/// Names of the immediate subdirectories of `dir`, sorted. A missing directory is logged and empty.
fn list_subdirs(dir: &Utf8Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Cannot list {}: {}, skipping", dir, e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| match entry.file_name().into_string() {
            Ok(name) => Some(name),
            Err(raw) => {
                tracing::warn!("Skipping non UTF-8 directory name {:?} in {}", raw, dir);
                None
            }
        })
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathResolver) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let paths = PathResolver::new(root.join("game"), root.join("disabled"));
        paths.ensure_category_dirs().unwrap();
        (temp_dir, paths)
    }

    fn add_dir(path: Utf8PathBuf) {
        fs::create_dir_all(path).unwrap();
    }

    #[test]
    fn test_reserved_mods_folders_are_skipped() {
        let (_guard, paths) = setup();
        add_dir(paths.mod_path(ModCategory::Mods, "base"));
        add_dir(paths.mod_path(ModCategory::Mods, "saves"));
        add_dir(paths.mod_path(ModCategory::Mods, "real mod"));
        fs::write(paths.category_dir(ModCategory::Mods).join("loose.txt"), "").unwrap();

        let mut store = MetadataStore::in_memory();
        let result = Reconciler::new(paths).reconcile(&mut store).unwrap();

        assert_eq!(result.names(), BTreeSet::from(["real mod"]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_enabled_category_follows_directory() {
        let (_guard, paths) = setup();
        add_dir(paths.mod_path(ModCategory::ModsOverride, "skins"));

        let mut store = MetadataStore::in_memory();
        store.register(["skins"], ModCategory::Maps);
        store.set_enabled("skins", false);

        let result = Reconciler::new(paths).reconcile(&mut store).unwrap();

        let entry = result.get("skins").unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.category, ModCategory::ModsOverride);
        assert_eq!(store.category("skins"), Some(ModCategory::ModsOverride));
        assert!(store.enabled("skins"));
    }

    #[test]
    fn test_ignored_mods_are_hidden_but_kept() {
        let (_guard, paths) = setup();
        add_dir(paths.mod_path(ModCategory::Maps, "hidden map"));

        let mut store = MetadataStore::in_memory();
        store.register(["hidden map"], ModCategory::Maps);
        store.set_ignored("hidden map", true);

        let result = Reconciler::new(paths).reconcile(&mut store).unwrap();

        assert!(result.mods.is_empty());
        assert_eq!(result.ignored, vec!["hidden map"]);
        assert!(store.contains("hidden map"));
    }

    #[test]
    fn test_definitions_fill_missing_asset_id_only() {
        let (_guard, paths) = setup();
        let fresh = paths.mod_path(ModCategory::Maps, "fresh");
        let known = paths.mod_path(ModCategory::Maps, "known");
        add_dir(fresh.clone());
        add_dir(known.clone());
        let xml = r#"<table name="m" version="3.0"><AssetUpdates id="777"/></table>"#;
        fs::write(fresh.join("main.xml"), xml).unwrap();
        fs::write(known.join("main.xml"), xml).unwrap();

        let mut store = MetadataStore::in_memory();
        store.register(["known"], ModCategory::Maps);
        store.set_workshop_asset_id("known", "1");

        let result = Reconciler::new(paths).reconcile(&mut store).unwrap();

        assert_eq!(store.workshop_asset_id("fresh"), "777");
        assert_eq!(store.workshop_asset_id("known"), "1");
        assert_eq!(result.get("fresh").unwrap().version.as_deref(), Some("3.0"));
    }

    #[test]
    fn test_missing_category_dir_is_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let paths = PathResolver::new(root.join("nowhere"), root.join("also nowhere"));

        let mut store = MetadataStore::in_memory();
        let result = Reconciler::new(paths).reconcile(&mut store).unwrap();

        assert!(result.mods.is_empty());
    }
}
