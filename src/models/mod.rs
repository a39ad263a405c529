//! Data models for modwarden.
//!
//! - [`ModRecord`]: persisted per-mod metadata (category, enabled cache, ignore flag, asset id, tags)
//! - [`ModCategory`]: the fixed three-way taxonomy of install locations
//! - [`Options`]: global settings loaded from `options.yaml`
//!
//! Records are owned by [`crate::store::MetadataStore`]; options by
//! [`crate::config::ConfigManager`]. Both are plain serde structs so the
//! on-disk formats stay readable and hand-editable.

pub mod mod_record;
pub mod options;

pub use mod_record::{ModCategory, ModRecord, UnknownCategory, normalize_tags};
pub use options::{DISABLED_MODS_DIR, Options};
