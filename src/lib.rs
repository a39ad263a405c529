// Modwarden - mod folder manager for PAYDAY 2
//
// This is the library crate containing the task engine, the filesystem services and the
// metadata stores. The binary crate (main.rs) provides a headless command-line entry point.

pub mod config;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod tasks;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use manager::{ModManager, ProfileApplication};
pub use metrics::Metrics;
pub use models::{ModCategory, ModRecord, Options};
pub use services::{Mover, PathResolver, Reconciler, Reconciliation};
pub use state::{ProgressChange, ProgressManager, ProgressState};
pub use store::{MetadataStore, ProfileStore, SharedStore};
pub use tasks::{CancelToken, ProgressSink, Task, TaskKind, TaskReport, TaskRunner, TaskState};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
