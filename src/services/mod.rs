//! Services module - filesystem-facing building blocks of mod management.
//!
//! Nothing here knows about tasks, threads or the caller; each service is a
//! plain value that can be used and tested on its own.
//!
//! # Components
//!
//! - [`PathResolver`]: maps `(category, name)` to a directory under the game root.
//!   Pure, apart from [`PathResolver::ensure_category_dirs`].
//! - [`Mover`]: relocates a directory tree, overwriting the destination. On a
//!   permission error it runs a repair pass over the source tree and retries once.
//! - [`ModInfoReader`]: reads `mod.txt` / `main.xml` for a version and a modworkshop asset id.
//! - [`archive`]: classifies install sources and unpacks zip and 7z archives.
//! - [`Reconciler`]: merges a scan of the category and disabled directories with the
//!   [`crate::store::MetadataStore`] into the authoritative mod list.
//!
//! # Directory layout
//!
//! ```text
//! <game root>/mods/                   ModCategory::Mods (minus base, logs, saves, downloads)
//! <game root>/assets/mod_overrides/   ModCategory::ModsOverride
//! <game root>/Maps/                   ModCategory::Maps
//! <disabled dir>/                     every disabled mod, whatever its category
//! ```

pub mod archive;
pub mod mover;
pub mod paths;
pub mod modinfo;
pub mod reconcile;

pub use archive::{ArchiveError, ArchiveFormat, SourceKind};
pub use mover::{FileOps, MoveError, MoveOutcome, Mover, StdFileOps, repair_permissions};
pub use paths::{MODS_IGNORE, PathResolver};
pub use modinfo::ModInfoReader;
pub use reconcile::{ModEntry, Reconciler, Reconciliation};
