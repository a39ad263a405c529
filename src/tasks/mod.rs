//! Task engine - cancelable, progress-reporting batch operations with rollback.
//!
//! A [`Task`] owns a fixed list of work items described by its [`TaskKind`].
//! Running it walks the items in order; for each item it reports progress,
//! performs the forward operation, records what it takes to undo it, and then
//! checks the [`CancelToken`]. Cancellation rolls back exactly the items that
//! were completed, in the order they were completed.
//!
//! Every run ends with exactly one terminal signal on the [`ProgressSink`]
//! (`succeeded`, `failed` or `done_canceling`), after all progress signals,
//! and returns a [`TaskReport`].
//!
//! # Error policy
//!
//! - Permission failures the mover cannot repair: the item is abandoned, the batch continues.
//! - Missing paths: the item is skipped, the batch continues.
//! - Archive errors and any other I/O error: the task fails and stops. Completed
//!   items stay where they are; the report's ledger lists them.
//!
//! Tasks only read the [`crate::store::MetadataStore`]. The one exception is
//! [`TaskKind::Delete`], which removes each record right before trashing the mod.

pub mod cancel;
pub mod runner;
pub mod sink;

pub use cancel::CancelToken;
pub use runner::{TaskHandle, TaskRunner};
pub use sink::{ChannelSink, NullSink, ProgressSink, TaskEvent, TerminalGuard};

use crate::metrics::Metrics;
use crate::models::ModCategory;
use crate::services::archive::{self, ArchiveError};
use crate::services::{MoveError, MoveOutcome, Mover, PathResolver};
use crate::store::SharedStore;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Lifecycle of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Succeeded,
    Canceled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Canceled | TaskState::Failed
        )
    }
}

/// Move an existing mod folder into a category, e.g. to install or recategorize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryChange {
    pub source: Utf8PathBuf,
    pub category: ModCategory,
}

impl CategoryChange {
    pub fn new(source: impl Into<Utf8PathBuf>, category: ModCategory) -> Self {
        Self {
            source: source.into(),
            category,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.source.file_name()
    }
}

/// Extract an archive into a category directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackItem {
    pub archive: Utf8PathBuf,
    pub category: ModCategory,
}

impl UnpackItem {
    pub fn new(archive: impl Into<Utf8PathBuf>, category: ModCategory) -> Self {
        Self {
            archive: archive.into(),
            category,
        }
    }
}

/// The concrete operations the engine knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Category directory -> disabled directory. Mods already disabled are skipped.
    MoveToDisabled(Vec<String>),
    /// Disabled directory -> category directory. Mods not in the disabled directory are skipped.
    MoveToEnabled(Vec<String>),
    /// Any folder -> category directory.
    ChangeCategory(Vec<CategoryChange>),
    /// Remove metadata, then send the folder to the trash. Not reversible.
    Delete(Vec<String>),
    /// Extract archives into category directories. Not reversible.
    Unpack(Vec<UnpackItem>),
    /// Move every child of the current disabled directory into `to`.
    RelocateDisabled { to: Utf8PathBuf },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::MoveToDisabled(_) => "move_to_disabled",
            TaskKind::MoveToEnabled(_) => "move_to_enabled",
            TaskKind::ChangeCategory(_) => "change_category",
            TaskKind::Delete(_) => "delete",
            TaskKind::Unpack(_) => "unpack",
            TaskKind::RelocateDisabled { .. } => "relocate_disabled",
        }
    }

    /// Whether cancellation moves completed items back.
    pub fn is_reversible(&self) -> bool {
        !matches!(self, TaskKind::Delete(_) | TaskKind::Unpack(_))
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::MoveToDisabled(mods)
            | TaskKind::MoveToEnabled(mods)
            | TaskKind::Delete(mods) => write!(f, "{} ({} mods)", self.name(), mods.len()),
            TaskKind::ChangeCategory(items) => write!(f, "{} ({} mods)", self.name(), items.len()),
            TaskKind::Unpack(items) => write!(f, "{} ({} archives)", self.name(), items.len()),
            TaskKind::RelocateDisabled { to } => write!(f, "{} (to {})", self.name(), to),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Move(#[from] MoveError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("I/O error on {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start task worker")]
    Spawn(#[source] io::Error),
}

impl TaskError {
    /// Fatal errors stop the batch; the rest only cost the current item.
    pub fn is_fatal(&self) -> bool {
        match self {
            TaskError::Move(e) => !e.is_recoverable(),
            _ => true,
        }
    }

    fn io(path: &Utf8Path, source: io::Error) -> Self {
        TaskError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Render an error and its sources on one line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// One forward move, enough to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMove {
    pub name: String,
    pub src: Utf8PathBuf,
    pub dest: Utf8PathBuf,
}

/// What happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub kind: &'static str,
    pub state: TaskState,
    /// Rollback ledger: reversible moves that completed, in order.
    pub completed: Vec<CompletedMove>,
    /// Items whose forward operation went through.
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    /// Items given up on after a permission repair.
    pub abandoned: Vec<String>,
    /// Items moved back by a rollback.
    pub rolled_back: Vec<String>,
    /// Set when the task failed.
    pub error: Option<String>,
}

impl TaskReport {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: TaskState::Running,
            completed: Vec::new(),
            processed: Vec::new(),
            skipped: Vec::new(),
            abandoned: Vec::new(),
            rolled_back: Vec::new(),
            error: None,
        }
    }

    pub fn failed(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            error: Some(message.into()),
            ..Self::new(kind)
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Everything a task needs besides its items.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub paths: PathResolver,
    pub store: SharedStore,
    pub mover: Mover,
    /// Destination of deleted mods.
    pub trash_dir: Utf8PathBuf,
    pub metrics: Arc<Metrics>,
}

impl TaskContext {
    pub fn new(paths: PathResolver, store: SharedStore, trash_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            paths,
            store,
            mover: Mover::new(),
            trash_dir: trash_dir.into(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_mover(mut self, mover: Mover) -> Self {
        self.mover = mover;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// A single work item, resolved from the task kind.
#[derive(Debug, Clone)]
enum Step {
    Disable(String),
    Enable(String),
    Recategorize(CategoryChange),
    Delete(String),
    Unpack(UnpackItem),
    Relocate {
        name: String,
        from: Utf8PathBuf,
        to: Utf8PathBuf,
    },
}

impl Step {
    fn name(&self) -> &str {
        match self {
            Step::Disable(name) | Step::Enable(name) | Step::Delete(name) => name,
            Step::Recategorize(change) => change.name().unwrap_or(change.source.as_str()),
            Step::Unpack(item) => item.archive.file_name().unwrap_or(item.archive.as_str()),
            Step::Relocate { name, .. } => name,
        }
    }

    fn label(&self) -> String {
        let verb = match self {
            Step::Disable(_) => "Disabling",
            Step::Enable(_) => "Enabling",
            Step::Recategorize(_) => "Installing",
            Step::Delete(_) => "Deleting",
            Step::Unpack(_) => "Unpacking",
            Step::Relocate { .. } => "Moving",
        };
        format!("{} {}", verb, self.name())
    }
}

enum ItemOutcome {
    /// Reversible move, goes on the ledger.
    Moved(CompletedMove),
    /// Irreversible operation went through.
    Applied,
    Skipped,
}

enum Flow {
    Finished,
    Canceled,
}

/// One batch operation. Consumed by [`Task::run`], so it can only run once.
#[derive(Debug, Clone)]
pub struct Task {
    kind: TaskKind,
    ctx: TaskContext,
}

impl Task {
    pub fn new(kind: TaskKind, ctx: TaskContext) -> Self {
        Self { kind, ctx }
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Run the task to completion on the current thread.
    pub fn run(self, sink: &dyn ProgressSink, cancel: &CancelToken) -> TaskReport {
        let started = Instant::now();
        let sink = TerminalGuard::new(sink);
        let mut report = TaskReport::new(self.kind.name());

        tracing::info!("Starting task {}", self.kind);

        match self.execute(&sink, cancel, &mut report) {
            Ok(Flow::Finished) => {
                report.state = TaskState::Succeeded;
                self.ctx.metrics.record_task_succeeded();
                tracing::info!(
                    "Task {} succeeded: {} processed, {} skipped, {} abandoned",
                    self.kind.name(),
                    report.processed.len(),
                    report.skipped.len(),
                    report.abandoned.len()
                );
                sink.succeeded();
            }
            Ok(Flow::Canceled) => {
                tracing::info!("Task {} was canceled", self.kind.name());
                self.rollback(&sink, &mut report);
                report.state = TaskState::Canceled;
                self.ctx.metrics.record_task_canceled();
                sink.done_canceling();
            }
            Err(e) => {
                let message = error_chain(&e);
                tracing::error!("Task {} failed: {}", self.kind.name(), message);
                for done in &report.completed {
                    tracing::error!("Left in place: {} -> {}", done.src, done.dest);
                }
                report.state = TaskState::Failed;
                report.error = Some(message.clone());
                self.ctx.metrics.record_task_failed();
                sink.failed(&message);
            }
        }

        self.ctx.metrics.record_task_time(started.elapsed());
        report
    }

    fn execute(
        &self,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
        report: &mut TaskReport,
    ) -> Result<Flow, TaskError> {
        let steps = self.steps()?;
        sink.set_total(steps.len());

        if cancel.is_canceled() {
            return Ok(Flow::Canceled);
        }

        for step in &steps {
            sink.set_current(1, &step.label());

            match self.forward(step, sink, cancel) {
                Ok(ItemOutcome::Moved(done)) => {
                    self.ctx.metrics.record_moved();
                    report.processed.push(done.name.clone());
                    report.completed.push(done);
                }
                Ok(ItemOutcome::Applied) => {
                    report.processed.push(step.name().to_string());
                }
                Ok(ItemOutcome::Skipped) => {
                    self.ctx.metrics.record_skipped();
                    report.skipped.push(step.name().to_string());
                }
                Err(TaskError::Move(MoveError::Canceled(path))) => {
                    tracing::info!("Permission repair of {} interrupted by cancel", path);
                    return Ok(Flow::Canceled);
                }
                Err(e) if !e.is_fatal() => {
                    tracing::error!("Abandoning {}: {}", step.name(), error_chain(&e));
                    self.ctx.metrics.record_abandoned();
                    report.abandoned.push(step.name().to_string());
                }
                Err(e) => return Err(e),
            }

            if cancel.is_canceled() {
                return Ok(Flow::Canceled);
            }
        }

        Ok(Flow::Finished)
    }

    fn steps(&self) -> Result<Vec<Step>, TaskError> {
        let paths = &self.ctx.paths;

        let steps = match &self.kind {
            TaskKind::MoveToDisabled(mods) => {
                create_dir(paths.disabled_dir())?;
                mods.iter().cloned().map(Step::Disable).collect()
            }
            TaskKind::MoveToEnabled(mods) => mods.iter().cloned().map(Step::Enable).collect(),
            TaskKind::ChangeCategory(items) => items.iter().cloned().map(Step::Recategorize).collect(),
            TaskKind::Delete(mods) => mods.iter().cloned().map(Step::Delete).collect(),
            TaskKind::Unpack(items) => items.iter().cloned().map(Step::Unpack).collect(),
            TaskKind::RelocateDisabled { to } => {
                let from = paths.disabled_dir();
                if from == to {
                    Vec::new()
                } else {
                    create_dir(to)?;
                    list_children(from)?
                        .into_iter()
                        .map(|name| Step::Relocate {
                            name,
                            from: from.to_path_buf(),
                            to: to.clone(),
                        })
                        .collect()
                }
            }
        };

        Ok(steps)
    }

    fn forward(
        &self,
        step: &Step,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ItemOutcome, TaskError> {
        let paths = &self.ctx.paths;

        match step {
            Step::Disable(name) => {
                let dest = paths.disabled_path(name);
                if dest.is_dir() {
                    tracing::info!("{} is already in the disabled directory", name);
                    return Ok(ItemOutcome::Skipped);
                }
                let Some(category) = self.category_of(name) else {
                    return Ok(ItemOutcome::Skipped);
                };
                let src = paths.mod_path(category, name);
                self.move_item(name, &src, &dest, sink, cancel)
            }

            Step::Enable(name) => {
                let src = paths.disabled_path(name);
                if !src.is_dir() {
                    tracing::warn!("{} was not found in {}, ignoring", name, paths.disabled_dir());
                    return Ok(ItemOutcome::Skipped);
                }
                let Some(category) = self.category_of(name) else {
                    return Ok(ItemOutcome::Skipped);
                };
                create_dir(&paths.category_dir(category))?;
                let dest = paths.mod_path(category, name);
                self.move_item(name, &src, &dest, sink, cancel)
            }

            Step::Recategorize(change) => {
                let Some(name) = change.name() else {
                    tracing::warn!("{} has no folder name, skipping", change.source);
                    return Ok(ItemOutcome::Skipped);
                };
                let dest = paths.mod_path(change.category, name);
                if dest == change.source {
                    tracing::info!("{} is already in {}", name, change.category);
                    return Ok(ItemOutcome::Skipped);
                }
                create_dir(&paths.category_dir(change.category))?;
                self.move_item(name, &change.source, &dest, sink, cancel)
            }

            Step::Delete(name) => self.delete(name, sink, cancel),

            Step::Unpack(item) => {
                if !item.archive.is_file() {
                    tracing::warn!("{} does not exist, skipping", item.archive);
                    return Ok(ItemOutcome::Skipped);
                }
                archive::unpack(&item.archive, &paths.category_dir(item.category))?;
                self.ctx.metrics.record_unpacked();
                Ok(ItemOutcome::Applied)
            }

            Step::Relocate { name, from, to } => {
                let src = from.join(name);
                if !src.is_dir() {
                    tracing::warn!("{} is not a folder, leaving it in {}", name, from);
                    return Ok(ItemOutcome::Skipped);
                }
                self.move_item(name, &src, &to.join(name), sink, cancel)
            }
        }
    }

    fn delete(
        &self,
        name: &str,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ItemOutcome, TaskError> {
        let paths = &self.ctx.paths;
        let (enabled, category) = self
            .ctx
            .store
            .read(|store| (store.enabled(name), store.category(name)));

        let installed = category.map(|category| paths.mod_path(category, name));
        let disabled = Some(paths.disabled_path(name));
        let candidates = if enabled {
            [installed, disabled]
        } else {
            [disabled, installed]
        };
        let location = candidates.into_iter().flatten().find(|path| path.is_dir());

        // Metadata goes first, whatever happens on disk
        let removed = self.ctx.store.write(|store| store.remove([name]));
        if removed.is_empty() {
            tracing::debug!("{} had no metadata", name);
        }

        let Some(path) = location else {
            tracing::error!("{} does not exist on disk, nothing to delete", name);
            return Ok(ItemOutcome::Skipped);
        };

        create_dir(&self.ctx.trash_dir)?;
        let dest = unique_trash_path(&self.ctx.trash_dir, name);
        match self.ctx.mover.move_dir(&path, &dest, sink, cancel) {
            Ok(outcome) => {
                self.record_outcome(outcome);
                tracing::info!("Sent {} to {}", path, dest);
                Ok(ItemOutcome::Applied)
            }
            Err(e) => {
                tracing::error!("{} is orphaned: metadata removed but {} is still on disk", name, path);
                Err(e.into())
            }
        }
    }

    fn move_item(
        &self,
        name: &str,
        src: &Utf8Path,
        dest: &Utf8Path,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ItemOutcome, TaskError> {
        match self.ctx.mover.move_dir(src, dest, sink, cancel) {
            Ok(outcome) => {
                self.record_outcome(outcome);
                Ok(ItemOutcome::Moved(CompletedMove {
                    name: name.to_string(),
                    src: src.to_path_buf(),
                    dest: dest.to_path_buf(),
                }))
            }
            Err(MoveError::MissingSource(path)) => {
                tracing::warn!("{} does not exist, skipping {}", path, name);
                Ok(ItemOutcome::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record_outcome(&self, outcome: MoveOutcome) {
        if let MoveOutcome::MovedAfterRepair { repaired } = outcome {
            self.ctx.metrics.record_repaired(repaired);
        }
    }

    fn category_of(&self, name: &str) -> Option<ModCategory> {
        let category = self.ctx.store.read(|store| store.category(name));
        if category.is_none() {
            tracing::warn!("{} has no known category, skipping", name);
        }
        category
    }

    /// Move completed items back, in completion order. Rollback is not cancelable.
    fn rollback(&self, sink: &dyn ProgressSink, report: &mut TaskReport) {
        if !self.kind.is_reversible() || report.completed.is_empty() {
            return;
        }

        tracing::info!("Rolling back {} completed items", report.completed.len());
        sink.set_total(report.completed.len());

        let uncancelable = CancelToken::new();
        for done in &report.completed {
            sink.set_current(1, &format!("Restoring {}", done.name));
            match self
                .ctx
                .mover
                .move_dir(&done.dest, &done.src, sink, &uncancelable)
            {
                Ok(outcome) => {
                    self.record_outcome(outcome);
                    self.ctx.metrics.record_rolled_back();
                    report.rolled_back.push(done.name.clone());
                }
                Err(e) => {
                    tracing::error!(
                        "Could not move {} back to {}: {}",
                        done.dest,
                        done.src,
                        error_chain(&e)
                    );
                }
            }
        }
    }
}

fn create_dir(dir: &Utf8Path) -> Result<(), TaskError> {
    fs::create_dir_all(dir).map_err(|e| TaskError::io(dir, e))
}

fn list_children(dir: &Utf8Path) -> Result<Vec<String>, TaskError> {
    if !dir.exists() {
        tracing::warn!("{} does not exist, nothing to move", dir);
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TaskError::io(dir, e))? {
        let entry = entry.map_err(|e| TaskError::io(dir, e))?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!("Skipping non UTF-8 name {:?} in {}", raw, dir),
        }
    }
    names.sort();
    Ok(names)
}

/// `trash/<name>`, or `trash/<name> (n)` when that is taken.
fn unique_trash_path(trash_dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    let first = trash_dir.join(name);
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| trash_dir.join(format!("{} ({})", name, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetadataStore;
    use tempfile::TempDir;

    struct Fixture {
        _guard: TempDir,
        ctx: TaskContext,
    }

    fn fixture(mods: &[(&str, ModCategory)]) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let paths = PathResolver::new(root.join("game"), root.join("disabled"));
        paths.ensure_category_dirs().unwrap();

        let mut store = MetadataStore::in_memory();
        for (name, category) in mods {
            fs::create_dir_all(paths.mod_path(*category, name)).unwrap();
            fs::write(paths.mod_path(*category, name).join("mod.txt"), "{}").unwrap();
            store.register([*name], *category);
        }

        let ctx = TaskContext::new(paths, SharedStore::new(store), root.join("trash"));
        Fixture {
            _guard: temp_dir,
            ctx,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_disable_then_enable_round_trip() {
        let f = fixture(&[("a", ModCategory::Mods), ("b", ModCategory::Maps)]);
        let paths = f.ctx.paths.clone();

        let report = Task::new(TaskKind::MoveToDisabled(names(&["a", "b"])), f.ctx.clone())
            .run(&NullSink, &CancelToken::new());
        assert!(report.succeeded());
        assert!(paths.disabled_path("a").is_dir());
        assert!(!paths.mod_path(ModCategory::Maps, "b").exists());

        f.ctx.store.write(|store| {
            store.set_enabled("a", false);
            store.set_enabled("b", false);
        });

        let report = Task::new(TaskKind::MoveToEnabled(names(&["a", "b"])), f.ctx.clone())
            .run(&NullSink, &CancelToken::new());
        assert!(report.succeeded());
        assert!(paths.mod_path(ModCategory::Mods, "a").join("mod.txt").is_file());
        assert!(paths.mod_path(ModCategory::Maps, "b").is_dir());
        assert!(!paths.disabled_path("a").exists());
    }

    #[test]
    fn test_unknown_category_is_skipped() {
        let f = fixture(&[]);
        let report = Task::new(TaskKind::MoveToDisabled(names(&["ghost"])), f.ctx.clone())
            .run(&NullSink, &CancelToken::new());

        assert!(report.succeeded());
        assert_eq!(report.skipped, vec!["ghost"]);
    }

    #[test]
    fn test_cancel_before_start_touches_nothing() {
        let f = fixture(&[("a", ModCategory::Mods)]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = Task::new(TaskKind::MoveToDisabled(names(&["a"])), f.ctx.clone())
            .run(&NullSink, &cancel);

        assert_eq!(report.state, TaskState::Canceled);
        assert!(report.completed.is_empty());
        assert!(f.ctx.paths.mod_path(ModCategory::Mods, "a").is_dir());
    }

    #[test]
    fn test_change_category() {
        let f = fixture(&[("skin", ModCategory::Mods)]);
        let paths = f.ctx.paths.clone();
        let change = CategoryChange::new(paths.mod_path(ModCategory::Mods, "skin"), ModCategory::ModsOverride);
        let same = CategoryChange::new(paths.mod_path(ModCategory::ModsOverride, "skin"), ModCategory::ModsOverride);

        let report = Task::new(TaskKind::ChangeCategory(vec![change, same]), f.ctx.clone())
            .run(&NullSink, &CancelToken::new());

        assert!(report.succeeded());
        assert_eq!(report.processed, vec!["skin"]);
        assert_eq!(report.skipped, vec!["skin"]);
        assert!(paths.mod_path(ModCategory::ModsOverride, "skin").is_dir());
    }

    #[test]
    fn test_delete_removes_metadata_and_trashes() {
        let f = fixture(&[("old", ModCategory::Maps), ("gone", ModCategory::Mods)]);
        fs::remove_dir_all(f.ctx.paths.mod_path(ModCategory::Mods, "gone")).unwrap();

        let report = Task::new(TaskKind::Delete(names(&["old", "gone"])), f.ctx.clone())
            .run(&NullSink, &CancelToken::new());

        assert!(report.succeeded());
        assert_eq!(report.processed, vec!["old"]);
        assert_eq!(report.skipped, vec!["gone"]);
        assert!(f.ctx.store.read(|store| store.is_empty()));
        assert!(f.ctx.trash_dir.join("old").join("mod.txt").is_file());
        assert!(!f.ctx.paths.mod_path(ModCategory::Maps, "old").exists());
    }

    #[test]
    fn test_unique_trash_path() {
        let temp_dir = TempDir::new().unwrap();
        let trash = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        fs::create_dir(trash.join("m")).unwrap();
        fs::create_dir(trash.join("m (1)")).unwrap();

        assert_eq!(unique_trash_path(&trash, "m"), trash.join("m (2)"));
        assert_eq!(unique_trash_path(&trash, "n"), trash.join("n"));
    }

    #[test]
    fn test_unpack_failure_aborts_batch() {
        let f = fixture(&[]);
        let root = f.ctx.trash_dir.parent().unwrap().to_path_buf();
        let bad = root.join("bad.zip");
        let never = root.join("never.zip");
        fs::write(&bad, "not a zip").unwrap();
        fs::write(&never, "not reached").unwrap();

        let (sink, mut rx) = ChannelSink::new();
        let report = Task::new(
            TaskKind::Unpack(vec![
                UnpackItem::new(bad, ModCategory::Mods),
                UnpackItem::new(never, ModCategory::Mods),
            ]),
            f.ctx.clone(),
        )
        .run(&sink, &CancelToken::new());

        assert_eq!(report.state, TaskState::Failed);
        assert!(report.error.as_deref().unwrap().contains("bad.zip"));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let progress = events
            .iter()
            .filter(|e| matches!(e, TaskEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 1);
        assert!(matches!(events.last(), Some(TaskEvent::Failed(_))));
    }

    #[test]
    fn test_relocate_disabled() {
        let f = fixture(&[]);
        let old = f.ctx.paths.disabled_dir().to_path_buf();
        fs::create_dir_all(old.join("x")).unwrap();
        fs::create_dir_all(old.join("y")).unwrap();
        fs::write(old.join("notes.txt"), "").unwrap();
        let new = old.parent().unwrap().join("new disabled");

        let report = Task::new(TaskKind::RelocateDisabled { to: new.clone() }, f.ctx.clone())
            .run(&NullSink, &CancelToken::new());

        assert!(report.succeeded());
        assert_eq!(report.processed, vec!["x", "y"]);
        assert_eq!(report.skipped, vec!["notes.txt"]);
        assert!(new.join("x").is_dir());
        assert!(old.join("notes.txt").is_file());
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = TaskError::io(Utf8Path::new("/x"), io::Error::other("inner"));
        assert_eq!(error_chain(&err), "I/O error on /x: inner");
        assert!(err.is_fatal());
    }
}
