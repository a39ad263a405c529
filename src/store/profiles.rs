use super::MetadataStore;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;

/// Named sets of mods, persisted in `profiles.json` as `{ profile: [mod, ...] }`.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    path: Option<Utf8PathBuf>,
    profiles: IndexMap<String, Vec<String>>,
}

/// What applying a profile would change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePlan {
    /// Profile members that are installed but currently disabled.
    pub enable: Vec<String>,
    /// Installed, enabled mods that are not in the profile.
    pub disable: Vec<String>,
    /// Profile members with no record in the store.
    pub not_installed: Vec<String>,
}

impl ProfilePlan {
    pub fn is_noop(&self) -> bool {
        self.enable.is_empty() && self.disable.is_empty()
    }
}

impl ProfileStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load profiles from `path`; a missing or empty file yields no profiles.
    pub fn load<P: AsRef<Utf8Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let profiles = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read profiles: {}", path))?;
            if raw.trim().is_empty() {
                IndexMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse profiles: {}", path))?
            }
        } else {
            IndexMap::new()
        };

        Ok(Self {
            path: Some(path),
            profiles,
        })
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let raw = serde_json::to_string_pretty(&self.profiles)
            .context("Failed to serialize profiles")?;
        fs::write(path, raw).with_context(|| format!("Failed to write profiles: {}", path))?;

        tracing::info!("Saved {} profiles to {}", self.profiles.len(), path);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn mods(&self, profile: &str) -> Option<&[String]> {
        self.profiles.get(profile).map(Vec::as_slice)
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    /// Create an empty profile. Fails if the name is blank or taken.
    pub fn add_profile(&mut self, profile: &str) -> Result<()> {
        let profile = profile.trim();
        if profile.is_empty() {
            bail!("Profile name cannot be empty");
        }
        if self.profiles.contains_key(profile) {
            bail!("Profile already exists: {}", profile);
        }

        tracing::info!("Adding profile {}", profile);
        self.profiles.insert(profile.to_string(), Vec::new());
        Ok(())
    }

    pub fn remove_profile(&mut self, profile: &str) -> bool {
        let removed = self.profiles.shift_remove(profile).is_some();
        if removed {
            tracing::info!("Removed profile {}", profile);
        }
        removed
    }

    /// Rename a profile in place, keeping its position and members.
    pub fn rename_profile(&mut self, old: &str, new: &str) -> Result<()> {
        let new = new.trim();
        if new.is_empty() {
            bail!("Profile name cannot be empty");
        }
        if old == new {
            return Ok(());
        }
        if self.profiles.contains_key(new) {
            bail!("Profile already exists: {}", new);
        }
        let Some(index) = self.profiles.get_index_of(old) else {
            bail!("No such profile: {}", old);
        };

        let mods = self.profiles.shift_remove(old).unwrap_or_default();
        self.profiles.shift_insert(index, new.to_string(), mods);
        tracing::info!("Renamed profile {} to {}", old, new);
        Ok(())
    }

    /// Append mods to a profile, skipping duplicates. Returns how many were added.
    pub fn add_mods<S: AsRef<str>>(&mut self, profile: &str, mods: &[S]) -> Result<usize> {
        let Some(members) = self.profiles.get_mut(profile) else {
            bail!("No such profile: {}", profile);
        };

        let mut added = 0;
        for name in mods {
            let name = name.as_ref();
            if members.iter().any(|member| member == name) {
                tracing::warn!("{} is already in profile {}, not adding", name, profile);
                continue;
            }
            members.push(name.to_string());
            added += 1;
        }
        Ok(added)
    }

    pub fn remove_mod(&mut self, profile: &str, name: &str) -> bool {
        match self.profiles.get_mut(profile) {
            Some(members) => {
                let before = members.len();
                members.retain(|member| member != name);
                before != members.len()
            }
            None => false,
        }
    }

    /// Work out which moves would make the enabled set equal the profile.
    pub fn plan_apply(&self, profile: &str, store: &MetadataStore) -> Result<ProfilePlan> {
        let Some(members) = self.profiles.get(profile) else {
            bail!("No such profile: {}", profile);
        };

        let mut plan = ProfilePlan::default();

        for name in members {
            if !store.contains(name) {
                plan.not_installed.push(name.clone());
            } else if !store.enabled(name) {
                plan.enable.push(name.clone());
            }
        }

        plan.disable = store
            .records()
            .filter(|record| record.enabled && !members.contains(&record.name))
            .map(|record| record.name.clone())
            .collect();

        tracing::info!(
            "Profile {}: enable {:?}, disable {:?}, not installed {:?}",
            profile,
            plan.enable,
            plan.disable,
            plan.not_installed
        );
        Ok(plan)
    }
}
