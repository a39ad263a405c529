use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Receiver of task progress and the terminal result.
///
/// Implementations are called from the task's worker thread. For one run,
/// exactly one of [`succeeded`](Self::succeeded), [`failed`](Self::failed) or
/// [`done_canceling`](Self::done_canceling) is called, after every
/// [`set_current`](Self::set_current).
pub trait ProgressSink: Send + Sync {
    /// Replace the total number of progress units.
    fn set_total(&self, total: usize);

    /// Grow the total, e.g. when a permission repair discovers more work.
    fn add_total(&self, delta: usize);

    /// Advance by `delta` units and describe what is happening now.
    fn set_current(&self, delta: usize, label: &str);

    fn succeeded(&self);

    fn failed(&self, message: &str);

    fn done_canceling(&self);
}

/// One call on a [`ProgressSink`], as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    SetTotal(usize),
    AddTotal(usize),
    Progress { delta: usize, label: String },
    Succeeded,
    Failed(String),
    DoneCanceling,
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Succeeded | TaskEvent::Failed(_) | TaskEvent::DoneCanceling
        )
    }

    fn deliver(self, sink: &dyn ProgressSink) {
        match self {
            TaskEvent::SetTotal(total) => sink.set_total(total),
            TaskEvent::AddTotal(delta) => sink.add_total(delta),
            TaskEvent::Progress { delta, label } => sink.set_current(delta, &label),
            TaskEvent::Succeeded => sink.succeeded(),
            TaskEvent::Failed(message) => sink.failed(&message),
            TaskEvent::DoneCanceling => sink.done_canceling(),
        }
    }
}

/// Forwards every call as a [`TaskEvent`] over an unbounded channel.
///
/// Sending never blocks the worker; a dropped receiver just discards events.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Task event receiver dropped");
        }
    }
}

impl ProgressSink for ChannelSink {
    fn set_total(&self, total: usize) {
        self.send(TaskEvent::SetTotal(total));
    }

    fn add_total(&self, delta: usize) {
        self.send(TaskEvent::AddTotal(delta));
    }

    fn set_current(&self, delta: usize, label: &str) {
        self.send(TaskEvent::Progress {
            delta,
            label: label.to_string(),
        });
    }

    fn succeeded(&self) {
        self.send(TaskEvent::Succeeded);
    }

    fn failed(&self, message: &str) {
        self.send(TaskEvent::Failed(message.to_string()));
    }

    fn done_canceling(&self) {
        self.send(TaskEvent::DoneCanceling);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn set_total(&self, _total: usize) {}
    fn add_total(&self, _delta: usize) {}
    fn set_current(&self, _delta: usize, _label: &str) {}
    fn succeeded(&self) {}
    fn failed(&self, _message: &str) {}
    fn done_canceling(&self) {}
}

/// Wraps a sink and enforces the terminal-signal contract.
///
/// The first terminal call is forwarded; everything after it is dropped and
/// logged. Calls from the worker are serialized through a mutex so a
/// terminal signal can never interleave with progress.
pub struct TerminalGuard<'a> {
    inner: &'a dyn ProgressSink,
    finished: AtomicBool,
    order: Mutex<()>,
}

impl<'a> TerminalGuard<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            finished: AtomicBool::new(false),
            order: Mutex::new(()),
        }
    }

    /// Whether a terminal signal has already been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn emit(&self, event: TaskEvent) {
        let _order = self.order.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.is_finished() {
            tracing::warn!("Dropping task event after terminal signal: {:?}", event);
            return;
        }
        if event.is_terminal() {
            self.finished.store(true, Ordering::Release);
        }
        event.deliver(self.inner);
    }
}

impl ProgressSink for TerminalGuard<'_> {
    fn set_total(&self, total: usize) {
        self.emit(TaskEvent::SetTotal(total));
    }

    fn add_total(&self, delta: usize) {
        self.emit(TaskEvent::AddTotal(delta));
    }

    fn set_current(&self, delta: usize, label: &str) {
        self.emit(TaskEvent::Progress {
            delta,
            label: label.to_string(),
        });
    }

    fn succeeded(&self) {
        self.emit(TaskEvent::Succeeded);
    }

    fn failed(&self, message: &str) {
        self.emit(TaskEvent::Failed(message.to_string()));
    }

    fn done_canceling(&self) {
        self.emit(TaskEvent::DoneCanceling);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();

        sink.set_total(2);
        sink.add_total(3);
        sink.set_current(1, "Disabling a");
        sink.succeeded();

        assert_eq!(
            drain(&mut rx),
            vec![
                TaskEvent::SetTotal(2),
                TaskEvent::AddTotal(3),
                TaskEvent::Progress {
                    delta: 1,
                    label: "Disabling a".to_string()
                },
                TaskEvent::Succeeded,
            ]
        );
    }

    #[test]
    fn test_terminal_guard_drops_late_events() {
        let (sink, mut rx) = ChannelSink::new();
        let guard = TerminalGuard::new(&sink);

        guard.set_current(1, "first");
        guard.failed("boom");
        guard.set_current(1, "late");
        guard.succeeded();

        assert!(guard.is_finished());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], TaskEvent::Failed("boom".to_string()));
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.set_total(1);
        sink.done_canceling();
    }
}
