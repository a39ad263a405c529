// Progress state module
//
// This module provides the ProgressManager, a ProgressSink that keeps the progress of the
// running task behind Arc<RwLock<T>> and emits change events for any front end.

use crate::tasks::{ProgressSink, TaskState};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Change events emitted when progress is modified
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressChange {
    /// A task run has started
    Started { task: String },

    /// The total number of units changed
    TotalChanged { total: usize },

    /// Progress advanced
    Advanced {
        current: usize,
        total: usize,
        label: String,
    },

    /// The task reached a terminal state
    Finished {
        outcome: TaskState,
        message: Option<String>,
    },

    /// State has been reset
    Reset,
}

/// Snapshot of the current task's progress.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressState {
    pub task: Option<String>,
    pub total: usize,
    pub current: usize,
    pub label: String,
    pub running: bool,
    pub outcome: Option<TaskState>,
    pub message: Option<String>,
}

impl ProgressState {
    /// Completion ratio in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Thread-safe progress tracker with event emission
///
/// Pass it (behind an `Arc`) as the sink of a [`crate::tasks::TaskRunner`]; the
/// worker thread updates it and subscribers receive [`ProgressChange`] events.
pub struct ProgressManager {
    state: Arc<RwLock<ProgressState>>,

    /// Multiple subscribers can listen for changes
    state_tx: broadcast::Sender<ProgressChange>,
}

impl ProgressManager {
    /// Create a new ProgressManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(ProgressState::default())),
            state_tx,
        }
    }

    pub fn snapshot(&self) -> ProgressState {
        self.read_guard().clone()
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ProgressState) -> R,
    {
        f(&self.read_guard())
    }

    /// Update the state and emit change events
    ///
    /// # Returns
    /// The events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<ProgressChange>
    where
        F: FnOnce(&mut ProgressState),
    {
        let changes = {
            let mut state = self.write_guard();
            let old_state = state.clone();
            update_fn(&mut state);
            detect_changes(&old_state, &state)
        };

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to progress change events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressChange> {
        self.state_tx.subscribe()
    }

    /// Clear the previous run and mark `task` as running.
    pub fn begin(&self, task: &str) -> Vec<ProgressChange> {
        self.update(|state| {
            *state = ProgressState {
                task: Some(task.to_string()),
                running: true,
                ..ProgressState::default()
            };
        })
    }

    pub fn reset(&self) -> Vec<ProgressChange> {
        let mut changes = self.update(|state| *state = ProgressState::default());

        let _ = self.state_tx.send(ProgressChange::Reset);
        changes.push(ProgressChange::Reset);
        changes
    }

    fn finish(&self, outcome: TaskState, message: Option<String>) {
        self.update(|state| {
            state.running = false;
            state.outcome = Some(outcome);
            state.message = message;
        });
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ProgressState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, ProgressState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Detect what changed between two states and generate events
fn detect_changes(old: &ProgressState, new: &ProgressState) -> Vec<ProgressChange> {
    let mut changes = Vec::new();

    if new.running && (!old.running || old.task != new.task) {
        changes.push(ProgressChange::Started {
            task: new.task.clone().unwrap_or_default(),
        });
    }

    if old.total != new.total {
        changes.push(ProgressChange::TotalChanged { total: new.total });
    }

    if old.current != new.current || old.label != new.label {
        changes.push(ProgressChange::Advanced {
            current: new.current,
            total: new.total,
            label: new.label.clone(),
        });
    }

    if old.outcome != new.outcome {
        if let Some(outcome) = new.outcome {
            changes.push(ProgressChange::Finished {
                outcome,
                message: new.message.clone(),
            });
        }
    }

    changes
}

impl ProgressSink for ProgressManager {
    fn set_total(&self, total: usize) {
        self.update(|state| {
            state.total = total;
            state.current = 0;
            state.running = true;
            state.outcome = None;
        });
    }

    fn add_total(&self, delta: usize) {
        self.update(|state| state.total += delta);
    }

    fn set_current(&self, delta: usize, label: &str) {
        self.update(|state| {
            state.current += delta;
            state.label = label.to_string();
        });
    }

    fn succeeded(&self) {
        self.finish(TaskState::Succeeded, None);
    }

    fn failed(&self, message: &str) {
        self.finish(TaskState::Failed, Some(message.to_string()));
    }

    fn done_canceling(&self) {
        self.finish(TaskState::Canceled, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_accumulates() {
        let manager = ProgressManager::new();
        manager.begin("move_to_disabled");

        manager.set_total(2);
        manager.add_total(3);
        manager.set_current(1, "Disabling a");
        manager.set_current(2, "Checking file permissions of x");

        let state = manager.snapshot();
        assert_eq!(state.total, 5);
        assert_eq!(state.current, 3);
        assert_eq!(state.label, "Checking file permissions of x");
        assert!(state.running);
        assert!((state.fraction() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_terminal_signal_records_outcome() {
        let manager = ProgressManager::new();
        manager.set_total(1);
        manager.failed("disk full");

        let state = manager.snapshot();
        assert!(!state.running);
        assert_eq!(state.outcome, Some(TaskState::Failed));
        assert_eq!(state.message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_update_reports_changes() {
        let manager = ProgressManager::new();
        let changes = manager.begin("delete");
        assert_eq!(
            changes,
            vec![ProgressChange::Started {
                task: "delete".to_string()
            }]
        );

        let changes = manager.update(|state| state.label = "Deleting a".to_string());
        assert!(matches!(changes[0], ProgressChange::Advanced { .. }));

        let changes = manager.update(|_| {});
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let manager = ProgressManager::new();
        manager.begin("move_to_enabled");
        let mut rx = manager.subscribe();

        manager.set_total(1);
        manager.set_current(1, "Enabling b");
        manager.succeeded();

        assert_eq!(rx.recv().await.unwrap(), ProgressChange::TotalChanged { total: 1 });
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressChange::Advanced { current: 1, .. }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressChange::Finished {
                outcome: TaskState::Succeeded,
                message: None
            }
        );
    }

    #[test]
    fn test_reset() {
        let manager = ProgressManager::new();
        manager.set_total(4);
        let changes = manager.reset();

        assert_eq!(changes.last(), Some(&ProgressChange::Reset));
        assert_eq!(manager.snapshot(), ProgressState::default());
    }
}
