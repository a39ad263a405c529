//! Caller-side orchestration.
//!
//! [`ModManager`] owns the loaded options, the shared metadata store and the
//! profiles. It submits tasks, waits for their terminal signal, applies the
//! record updates that belong to the caller, and reconciles afterwards.

use crate::config::ConfigManager;
use crate::metrics::Metrics;
use crate::models::{ModCategory, Options};
use crate::services::archive::{self, SourceKind};
use crate::services::{Mover, PathResolver, Reconciler, Reconciliation};
use crate::state::ProgressManager;
use crate::store::{MetadataStore, ProfilePlan, ProfileStore, SharedStore};
use crate::tasks::{
    CancelToken, CategoryChange, Task, TaskContext, TaskHandle, TaskKind, TaskReport, TaskRunner,
    UnpackItem,
};
use anyhow::{Context, Result, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, Mutex};

/// Outcome of [`ModManager::apply_profile`].
#[derive(Debug, Clone)]
pub struct ProfileApplication {
    pub plan: ProfilePlan,
    /// One report per task that ran, enable first.
    pub reports: Vec<TaskReport>,
}

impl ProfileApplication {
    pub fn succeeded(&self) -> bool {
        self.reports.iter().all(TaskReport::succeeded)
    }
}

/// Cancels whichever task the manager is currently running.
///
/// Cloneable so a signal handler can hold one while the manager blocks on a task.
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    current: Arc<Mutex<Option<CancelToken>>>,
}

impl Interrupter {
    /// Returns false when no task is running.
    pub fn interrupt(&self) -> bool {
        match self.slot().as_ref() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn track(&self, cancel: Option<CancelToken>) {
        *self.slot() = cancel;
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ModManager {
    config: ConfigManager,
    options: Options,
    store: SharedStore,
    profiles: ProfileStore,
    progress: Arc<ProgressManager>,
    metrics: Arc<Metrics>,
    mover: Mover,
    interrupter: Interrupter,
}

impl ModManager {
    /// Load options, the mod store and profiles from the data directory.
    pub fn open(config: ConfigManager) -> Result<Self> {
        let options = config.load_options()?;
        let store = MetadataStore::load(config.store_path())?;
        let profiles = ProfileStore::load(config.profiles_path())?;

        Ok(Self {
            config,
            options,
            store: SharedStore::new(store),
            profiles,
            progress: Arc::new(ProgressManager::new()),
            metrics: Arc::new(Metrics::new()),
            mover: Mover::new(),
            interrupter: Interrupter::default(),
        })
    }

    /// Replace the mover, e.g. to inject filesystem failures in tests.
    pub fn with_mover(mut self, mover: Mover) -> Self {
        self.mover = mover;
        self
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn save_options(&self) -> Result<()> {
        self.config.save_options(&self.options)
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileStore {
        &mut self.profiles
    }

    pub fn save_profiles(&self) -> Result<()> {
        self.profiles.save()
    }

    pub fn progress(&self) -> Arc<ProgressManager> {
        self.progress.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Resolver for the configured game root.
    pub fn paths(&self) -> Result<PathResolver> {
        PathResolver::from_options(&self.options, self.config.config_dir())
            .ok_or_else(|| anyhow!("No game path configured"))
    }

    /// Create any missing category directories and the disabled directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        let paths = self.paths()?;
        paths
            .ensure_category_dirs()
            .with_context(|| format!("Failed to create mod directories under {}", paths.game_root()))
    }

    /// Rebuild the authoritative mod list and persist the store.
    pub fn reconcile(&self) -> Result<Reconciliation> {
        let reconciler = Reconciler::new(self.paths()?);
        self.store.write(|store| reconciler.reconcile(store))
    }

    /// Start a task on its own worker thread, reporting into [`Self::progress`].
    pub fn submit(&self, kind: TaskKind) -> Result<TaskHandle> {
        let ctx = TaskContext::new(self.paths()?, self.store.clone(), self.config.trash_dir())
            .with_mover(self.mover.clone())
            .with_metrics(self.metrics.clone());

        self.progress.begin(kind.name());
        let handle = TaskRunner::spawn(Task::new(kind, ctx), self.progress.clone())?;
        self.interrupter.track(Some(handle.cancel_token()));
        Ok(handle)
    }

    /// Record what a finished task changed, then reconcile.
    pub fn finish(&mut self, kind: &TaskKind, report: &TaskReport) -> Result<Reconciliation> {
        self.interrupter.track(None);

        match kind {
            TaskKind::ChangeCategory(items) if !report.processed.is_empty() => {
                self.store.write(|store| {
                    for item in items {
                        let Some(name) = item.name() else { continue };
                        let moved = report.processed.iter().any(|done| done == name);
                        let undone = report.rolled_back.iter().any(|back| back == name);
                        if moved && !undone {
                            store.register([name], item.category);
                        }
                    }
                });
            }
            TaskKind::RelocateDisabled { to } if report.succeeded() => {
                self.options.set_disabled_path(to.as_str());
                self.save_options()?;
            }
            _ => {}
        }

        self.reconcile()
    }

    /// Submit, wait for the terminal signal, and apply the caller-side updates.
    pub fn run(&mut self, kind: TaskKind) -> Result<TaskReport> {
        let handle = self.submit(kind.clone())?;
        let report = handle.wait();
        self.finish(&kind, &report)?;
        Ok(report)
    }

    pub fn disable<S: AsRef<str>>(&mut self, names: &[S]) -> Result<TaskReport> {
        self.run(TaskKind::MoveToDisabled(to_owned(names)))
    }

    pub fn enable<S: AsRef<str>>(&mut self, names: &[S]) -> Result<TaskReport> {
        self.run(TaskKind::MoveToEnabled(to_owned(names)))
    }

    pub fn delete<S: AsRef<str>>(&mut self, names: &[S]) -> Result<TaskReport> {
        self.run(TaskKind::Delete(to_owned(names)))
    }

    /// Move installed mods into another category.
    ///
    /// Disabled mods only get their record updated; they move into the new
    /// category when they are next enabled.
    pub fn change_category<S: AsRef<str>>(
        &mut self,
        names: &[S],
        category: ModCategory,
    ) -> Result<TaskReport> {
        let paths = self.paths()?;
        let mut changes = Vec::new();

        self.store.write(|store| {
            for name in names {
                let name = name.as_ref();
                match store.category(name) {
                    None => tracing::warn!("{} is unknown or unclassified, skipping", name),
                    Some(current) if !store.enabled(name) => {
                        tracing::info!("{} is disabled, recategorizing {} -> {} in place", name, current, category);
                        store.set_category(name, category);
                    }
                    Some(current) => {
                        changes.push(CategoryChange::new(paths.mod_path(current, name), category));
                    }
                }
            }
        });

        self.run(TaskKind::ChangeCategory(changes))
    }

    /// Install folders and archives into `category`.
    ///
    /// Folders are moved in one task, then archives are unpacked in another.
    /// Unsupported sources are skipped with a warning. Stops at the first
    /// task that does not succeed.
    pub fn install(&mut self, sources: &[Utf8PathBuf], category: ModCategory) -> Result<Vec<TaskReport>> {
        let mut folders = Vec::new();
        let mut archives = Vec::new();

        for source in sources {
            match archive::classify(source) {
                SourceKind::Directory => folders.push(CategoryChange::new(source.clone(), category)),
                SourceKind::Archive(_) => archives.push(UnpackItem::new(source.clone(), category)),
                SourceKind::Unsupported => tracing::warn!("{} is not a folder or a known archive, skipping", source),
            }
        }

        let mut kinds = Vec::new();
        if !folders.is_empty() {
            kinds.push(TaskKind::ChangeCategory(folders));
        }
        if !archives.is_empty() {
            kinds.push(TaskKind::Unpack(archives));
        }

        let mut reports = Vec::new();
        for kind in kinds {
            let report = self.run(kind)?;
            let succeeded = report.succeeded();
            reports.push(report);
            if !succeeded {
                break;
            }
        }

        Ok(reports)
    }

    /// Move every disabled mod to `new_dir` and remember it as the disabled directory.
    pub fn relocate_disabled(&mut self, new_dir: &Utf8Path) -> Result<TaskReport> {
        self.run(TaskKind::RelocateDisabled {
            to: new_dir.to_path_buf(),
        })
    }

    /// Make the enabled set match `profile`: enable its disabled members, then
    /// disable every enabled mod outside it.
    pub fn apply_profile(&mut self, profile: &str) -> Result<ProfileApplication> {
        self.reconcile()?;
        let plan = self
            .store
            .read(|store| self.profiles.plan_apply(profile, store))?;

        if !plan.not_installed.is_empty() {
            tracing::warn!(
                "Not applied because they are not installed: {}",
                plan.not_installed.join(", ")
            );
        }

        let mut application = ProfileApplication {
            plan: plan.clone(),
            reports: Vec::new(),
        };

        if !plan.enable.is_empty() {
            let report = self.run(TaskKind::MoveToEnabled(plan.enable))?;
            let succeeded = report.succeeded();
            application.reports.push(report);
            if !succeeded {
                tracing::warn!("Applying profile {} stopped while enabling mods", profile);
                return Ok(application);
            }
        }

        if !plan.disable.is_empty() {
            let report = self.run(TaskKind::MoveToDisabled(plan.disable))?;
            if !report.succeeded() {
                tracing::warn!("Applying profile {} stopped while disabling mods", profile);
            }
            application.reports.push(report);
        }

        Ok(application)
    }

    /// Persist the store outside of a reconcile, e.g. after tag edits.
    pub fn save_store(&self) -> Result<()> {
        self.store.save()
    }

    /// Drop every record. Files on disk are left alone.
    pub fn purge_store(&self) -> Result<()> {
        if self.store.read(|store| store.path().is_none()) {
            bail!("Refusing to purge a store that is not backed by a file");
        }
        self.store.write(MetadataStore::clear);
        self.store.save()
    }
}

fn to_owned<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names.iter().map(|name| name.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, ModManager) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let config = ConfigManager::new(root.join("data")).unwrap();
        let mut manager = ModManager::open(config).unwrap();
        manager.options_mut().set_game_path(root.join("game").as_str());
        manager.ensure_dirs().unwrap();
        (temp_dir, manager)
    }

    #[test]
    fn test_paths_require_game_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ModManager::open(ConfigManager::new(&root).unwrap()).unwrap();

        assert!(manager.paths().is_err());
        assert!(manager.reconcile().is_err());
    }

    #[test]
    fn test_change_category_of_disabled_mod_updates_record_only() {
        let (_guard, mut manager) = manager();
        let paths = manager.paths().unwrap();
        std::fs::create_dir_all(paths.mod_path(ModCategory::Mods, "m")).unwrap();
        manager.reconcile().unwrap();
        manager.disable(&["m"]).unwrap();

        let report = manager.change_category(&["m"], ModCategory::Maps).unwrap();

        assert!(report.succeeded());
        assert!(report.processed.is_empty());
        assert_eq!(
            manager.store().read(|store| store.category("m")),
            Some(ModCategory::Maps)
        );
        assert!(paths.disabled_path("m").is_dir());
    }

    /// Cancels the run on its first progress event.
    struct CancelOnFirstProgress(CancelToken);

    impl crate::tasks::ProgressSink for CancelOnFirstProgress {
        fn set_total(&self, _total: usize) {}
        fn add_total(&self, _delta: usize) {}
        fn set_current(&self, _delta: usize, _label: &str) {
            self.0.cancel();
        }
        fn succeeded(&self) {}
        fn failed(&self, _message: &str) {}
        fn done_canceling(&self) {}
    }

    #[test]
    fn test_canceled_install_leaves_no_record() {
        let (guard, mut manager) = manager();
        let download = Utf8PathBuf::try_from(guard.path().join("downloads").join("new mod")).unwrap();
        std::fs::create_dir_all(&download).unwrap();
        std::fs::write(download.join("mod.txt"), "{}").unwrap();

        let kind = TaskKind::ChangeCategory(vec![CategoryChange::new(download.clone(), ModCategory::Mods)]);
        let ctx = TaskContext::new(
            manager.paths().unwrap(),
            manager.store().clone(),
            manager.config().trash_dir(),
        );
        let cancel = CancelToken::new();
        let report = Task::new(kind.clone(), ctx).run(&CancelOnFirstProgress(cancel.clone()), &cancel);

        assert_eq!(report.state, crate::tasks::TaskState::Canceled);
        assert_eq!(report.rolled_back, vec!["new mod"]);

        let reconciliation = manager.finish(&kind, &report).unwrap();

        assert!(reconciliation.get("new mod").is_none());
        assert!(!manager.store().read(|store| store.contains("new mod")));
        assert!(download.join("mod.txt").is_file());
    }

    #[test]
    fn test_purge_store() {
        let (_guard, manager) = manager();
        manager
            .store()
            .write(|store| store.register(["x"], ModCategory::Mods));

        manager.purge_store().unwrap();

        let reloaded = MetadataStore::load(manager.config().store_path()).unwrap();
        assert!(reloaded.is_empty());
    }
}
