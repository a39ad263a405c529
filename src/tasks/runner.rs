use super::{CancelToken, ProgressSink, Task, TaskError, TaskReport, TaskState, TerminalGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::watch;

/// Starts tasks on dedicated worker threads.
pub struct TaskRunner;

impl TaskRunner {
    /// Start `task` on its own thread, relaying its events to `sink`.
    ///
    /// If the thread cannot be created the sink still receives `failed`.
    pub fn spawn(task: Task, sink: Arc<dyn ProgressSink>) -> Result<TaskHandle, TaskError> {
        let kind = task.kind().name();
        let cancel = CancelToken::new();
        let (state_tx, state_rx) = watch::channel(TaskState::Idle);

        let worker_cancel = cancel.clone();
        let worker_sink = sink.clone();
        let spawned = thread::Builder::new()
            .name(format!("modwarden-{}", kind))
            .spawn(move || {
                state_tx.send_replace(TaskState::Running);

                let guard = TerminalGuard::new(worker_sink.as_ref());
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| task.run(&guard, &worker_cancel)));

                let report = match result {
                    Ok(report) => report,
                    Err(payload) => {
                        let message = format!("task worker panicked: {}", panic_message(&*payload));
                        tracing::error!("{} {}", kind, message);
                        guard.failed(&message);
                        TaskReport::failed(kind, message)
                    }
                };

                state_tx.send_replace(report.state);
                report
            });

        match spawned {
            Ok(join) => {
                tracing::debug!("Spawned worker thread for {}", kind);
                Ok(TaskHandle {
                    kind,
                    cancel,
                    state: state_rx,
                    join: Some(join),
                })
            }
            Err(e) => {
                tracing::error!("Failed to spawn worker for {}: {}", kind, e);
                sink.failed(&format!("failed to start task worker: {}", e));
                Err(TaskError::Spawn(e))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Caller-side handle of a running task.
///
/// Dropping the handle detaches the worker; it still runs to its terminal signal.
pub struct TaskHandle {
    kind: &'static str,
    cancel: CancelToken,
    state: watch::Receiver<TaskState>,
    join: Option<thread::JoinHandle<TaskReport>>,
}

impl TaskHandle {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        tracing::info!("Canceling {}", self.kind);
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Wait asynchronously until the task reaches a terminal state.
    pub async fn finished(&mut self) -> TaskState {
        match self.state.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // Sender dropped without a terminal state: the worker died
            Err(_) => TaskState::Failed,
        }
    }

    /// Block until the worker exits and return its report.
    pub fn wait(mut self) -> TaskReport {
        let Some(join) = self.join.take() else {
            return TaskReport::failed(self.kind, "task already joined");
        };

        match join.join() {
            Ok(report) => report,
            Err(payload) => {
                TaskReport::failed(
                    self.kind,
                    format!("task worker panicked: {}", panic_message(&*payload)),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModCategory;
    use crate::services::PathResolver;
    use crate::store::{MetadataStore, SharedStore};
    use crate::tasks::{ChannelSink, TaskContext, TaskEvent, TaskKind};
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn context() -> (TempDir, TaskContext) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let paths = PathResolver::new(root.join("game"), root.join("disabled"));
        paths.ensure_category_dirs().unwrap();

        let mut store = MetadataStore::in_memory();
        for name in ["one", "two"] {
            fs::create_dir_all(paths.mod_path(ModCategory::Mods, name)).unwrap();
            store.register([name], ModCategory::Mods);
        }
        let ctx = TaskContext::new(paths, SharedStore::new(store), root.join("trash"));
        (temp_dir, ctx)
    }

    #[test]
    fn test_runs_on_worker_thread_and_reports() {
        let (_guard, ctx) = context();
        let (sink, mut rx) = ChannelSink::new();
        let task = Task::new(
            TaskKind::MoveToDisabled(vec!["one".into(), "two".into()]),
            ctx.clone(),
        );

        let handle = TaskRunner::spawn(task, Arc::new(sink)).unwrap();
        let report = handle.wait();

        assert_eq!(report.state, TaskState::Succeeded);
        assert_eq!(report.completed.len(), 2);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&TaskEvent::SetTotal(2)));
        assert_eq!(events.last(), Some(&TaskEvent::Succeeded));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_finished_resolves_with_terminal_state() {
        let (_guard, ctx) = context();
        let task = Task::new(TaskKind::MoveToEnabled(vec!["missing".into()]), ctx);

        let mut handle = TaskRunner::spawn(task, Arc::new(crate::tasks::NullSink)).unwrap();
        let state = handle.finished().await;

        assert_eq!(state, TaskState::Succeeded);
        assert!(handle.is_finished());
        assert_eq!(handle.wait().skipped, vec!["missing"]);
    }

    #[test]
    fn test_panic_message_variants() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(&*static_str), "boom");
        assert_eq!(panic_message(&*owned), "bang");
        assert_eq!(panic_message(&*other), "unknown panic");
    }
}
