//! Directory relocation with overwrite and permission repair.
//!
//! The mover knows nothing about mods; it moves one directory tree to a new
//! path. When the move is refused for lack of permissions it walks the source
//! tree, makes every object writable, clears any partial copy left at the
//! destination and tries once more.

use crate::tasks::{CancelToken, ProgressSink};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[cfg(test)]
use mockall::automock;

/// Errors from a single [`Mover::move_dir`] call.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("source does not exist: {0}")]
    MissingSource(Utf8PathBuf),

    #[error("permission denied moving {src} to {dest} (repair did not help)")]
    PermissionDenied {
        src: Utf8PathBuf,
        dest: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to clear existing destination {path}")]
    ClearDestination {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to move {src} to {dest}")]
    Io {
        src: Utf8PathBuf,
        dest: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("canceled during permission repair of {0}")]
    Canceled(Utf8PathBuf),
}

impl MoveError {
    /// Permission and missing-path failures cost one item; the rest stop the batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MoveError::MissingSource(_) | MoveError::PermissionDenied { .. }
        )
    }
}

/// How a successful move went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Succeeded on the second attempt after checking this many objects.
    MovedAfterRepair { repaired: usize },
}

/// Low-level filesystem calls used by the mover.
#[cfg_attr(test, automock)]
pub trait FileOps: Send + Sync {
    /// Move `src` to `dest`, where `dest` does not exist.
    fn rename(&self, src: &Utf8Path, dest: &Utf8Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Utf8Path) -> io::Result<()>;
}

/// [`FileOps`] on the real filesystem.
///
/// `rename` falls back to copy-then-delete when source and destination are on
/// different devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn rename(&self, src: &Utf8Path, dest: &Utf8Path) -> io::Result<()> {
        match fs::rename(src, dest) {
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                tracing::debug!("{} and {} are on different devices, copying", src, dest);
                move_across_devices(src, dest, |path| fs::remove_dir_all(path))
            }
            other => other,
        }
    }

    fn remove_dir_all(&self, path: &Utf8Path) -> io::Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}

/// Copy `src` to `dest`, then delete `src` with `remove_source`.
///
/// Only a failed copy is an error, and then the partial copy is removed. Once
/// `dest` is complete it is the surviving copy: a source that cannot be
/// removed, even after making it writable, is left behind and logged.
fn move_across_devices<F>(src: &Utf8Path, dest: &Utf8Path, remove_source: F) -> io::Result<()>
where
    F: Fn(&Utf8Path) -> io::Result<()>,
{
    if let Err(e) = copy_tree(src, dest) {
        if dest.exists() {
            make_tree_writable(dest);
            if let Err(cleanup) = fs::remove_dir_all(dest) {
                tracing::error!("Could not remove partial copy at {}: {}", dest, cleanup);
            }
        }
        return Err(e);
    }

    let first = match remove_source(src) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    tracing::warn!("Copied {} but could not remove it: {}, repairing", src, first);
    make_tree_writable(src);

    if let Err(e) = remove_source(src) {
        tracing::error!(
            "{} was copied to {} but is left behind: {}",
            src,
            dest,
            e
        );
    }
    Ok(())
}

fn copy_tree(src: &Utf8Path, dest: &Utf8Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dest.as_std_path().join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Moves directory trees, repairing permissions when needed.
#[derive(Clone)]
pub struct Mover {
    ops: Arc<dyn FileOps>,
}

impl std::fmt::Debug for Mover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mover").finish_non_exhaustive()
    }
}

impl Default for Mover {
    fn default() -> Self {
        Self::new()
    }
}

impl Mover {
    pub fn new() -> Self {
        Self::with_ops(Arc::new(StdFileOps))
    }

    pub fn with_ops(ops: Arc<dyn FileOps>) -> Self {
        Self { ops }
    }

    /// Move `src` to `dest`, replacing whatever is at `dest`.
    ///
    /// On a permission error the repair pass reports its work through
    /// `progress` (one unit per object checked, announced via `add_total`)
    /// and polls `cancel` between objects.
    pub fn move_dir(
        &self,
        src: &Utf8Path,
        dest: &Utf8Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<MoveOutcome, MoveError> {
        if !src.exists() {
            return Err(MoveError::MissingSource(src.to_path_buf()));
        }

        if dest.exists() {
            tracing::info!("Overwriting existing {}", dest);
            self.clear_destination(dest)?;
        }

        match self.ops.rename(src, dest) {
            Ok(()) => {
                tracing::info!("Moved {} to {}", src, dest);
                Ok(MoveOutcome::Moved)
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                tracing::warn!("Permission denied moving {}: {}", src, e);
                self.repair_and_retry(src, dest, progress, cancel)
            }
            Err(source) => Err(MoveError::Io {
                src: src.to_path_buf(),
                dest: dest.to_path_buf(),
                source,
            }),
        }
    }

    fn repair_and_retry(
        &self,
        src: &Utf8Path,
        dest: &Utf8Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<MoveOutcome, MoveError> {
        let repaired = match repair_permissions(src, progress, cancel) {
            Ok(count) => count,
            Err(e) => {
                self.remove_partial(dest);
                return Err(e);
            }
        };

        let name = src.file_name().unwrap_or(src.as_str());
        progress.set_current(1, &format!("Fixing install for {}", name));
        self.remove_partial(dest);

        match self.ops.rename(src, dest) {
            Ok(()) => {
                tracing::info!("Moved {} to {} after repairing {} objects", src, dest, repaired);
                Ok(MoveOutcome::MovedAfterRepair { repaired })
            }
            Err(source) => {
                self.remove_partial(dest);
                if source.kind() == io::ErrorKind::PermissionDenied {
                    Err(MoveError::PermissionDenied {
                        src: src.to_path_buf(),
                        dest: dest.to_path_buf(),
                        source,
                    })
                } else {
                    Err(MoveError::Io {
                        src: src.to_path_buf(),
                        dest: dest.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    fn clear_destination(&self, dest: &Utf8Path) -> Result<(), MoveError> {
        let first = match self.ops.remove_dir_all(dest) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if first.kind() != io::ErrorKind::PermissionDenied {
            return Err(MoveError::ClearDestination {
                path: dest.to_path_buf(),
                source: first,
            });
        }

        tracing::warn!("Permission denied clearing {}, repairing", dest);
        make_tree_writable(dest);
        self.ops
            .remove_dir_all(dest)
            .map_err(|source| MoveError::ClearDestination {
                path: dest.to_path_buf(),
                source,
            })
    }

    /// Remove a partial copy at `dest`, if any. Failures are only logged.
    fn remove_partial(&self, dest: &Utf8Path) {
        if !dest.exists() {
            return;
        }
        tracing::warn!("Removing partial copy at {}", dest);
        make_tree_writable(dest);
        if let Err(e) = self.ops.remove_dir_all(dest) {
            tracing::error!("Could not remove partial copy at {}: {}", dest, e);
        }
    }
}

/// Walk `root` and make every object under it, then `root` itself, writable.
///
/// Announces the number of objects through `add_total` before starting and
/// emits one progress unit per object. Returns the number of objects checked.
pub fn repair_permissions(
    root: &Utf8Path,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<usize, MoveError> {
    let entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", root, e);
                None
            }
        })
        .collect();

    // Every entry, the root, and the final "fixing install" step
    progress.add_total(entries.len() + 2);

    let mut checked = 0;
    for entry in &entries {
        if cancel.is_canceled() {
            return Err(MoveError::Canceled(root.to_path_buf()));
        }

        let kind = if entry.file_type().is_dir() { "folder" } else { "file" };
        let name = entry.file_name().to_string_lossy();
        progress.set_current(1, &format!("Checking {} permissions of {}", kind, name));
        check_permissions(entry.path());
        checked += 1;
    }

    if cancel.is_canceled() {
        return Err(MoveError::Canceled(root.to_path_buf()));
    }
    progress.set_current(1, &format!("Checking folder permissions of {}", root));
    check_permissions(root.as_std_path());

    Ok(checked + 1)
}

/// Best-effort variant of [`repair_permissions`] without progress or cancellation.
fn make_tree_writable(root: &Utf8Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        check_permissions(entry.path());
    }
}

/// Make one object writable by its owner. Returns whether it had to change.
fn check_permissions(path: &std::path::Path) -> bool {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!("Cannot read permissions of {}: {}", path.display(), e);
            return false;
        }
    };

    if metadata.file_type().is_symlink() || !metadata.permissions().readonly() {
        tracing::debug!("Permissions of {} are fine", path.display());
        return false;
    }

    let permissions = writable(metadata.permissions(), metadata.is_dir());
    match fs::set_permissions(path, permissions) {
        Ok(()) => {
            tracing::debug!("Made {} writable", path.display());
            true
        }
        Err(e) => {
            tracing::warn!("Failed to fix permissions of {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(unix)]
fn writable(permissions: fs::Permissions, is_dir: bool) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;

    let owner_bits = if is_dir { 0o700 } else { 0o600 };
    fs::Permissions::from_mode(permissions.mode() | owner_bits)
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn writable(mut permissions: fs::Permissions, _is_dir: bool) -> fs::Permissions {
    permissions.set_readonly(false);
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{ChannelSink, NullSink, TaskEvent};
    use mockall::Sequence;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    fn make_mod(dir: &Utf8Path, files: &[&str]) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        for file in files {
            fs::write(dir.join(file), "data").unwrap();
        }
    }

    #[cfg(unix)]
    fn set_readonly(path: &Utf8Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o444)).unwrap();
    }

    #[cfg(not(unix))]
    fn set_readonly(path: &Utf8Path) {
        let mut permissions = fs::metadata(path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(path, permissions).unwrap();
    }

    fn permission_denied() -> io::Error {
        io::Error::from(io::ErrorKind::PermissionDenied)
    }

    #[test]
    fn test_move_plain() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        let dest = root.join("dest_mod");
        make_mod(&src, &["a.txt"]);

        let outcome = Mover::new()
            .move_dir(&src, &dest, &NullSink, &CancelToken::new())
            .unwrap();

        assert_eq!(outcome, MoveOutcome::Moved);
        assert!(!src.exists());
        assert!(dest.join("a.txt").is_file());
    }

    #[test]
    fn test_move_overwrites_destination() {
        let (_guard, root) = temp_root();
        let src = root.join("new");
        let dest = root.join("old");
        make_mod(&src, &["fresh.txt"]);
        make_mod(&dest, &["stale.txt"]);

        Mover::new()
            .move_dir(&src, &dest, &NullSink, &CancelToken::new())
            .unwrap();

        assert!(dest.join("fresh.txt").exists());
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn test_missing_source() {
        let (_guard, root) = temp_root();
        let err = Mover::new()
            .move_dir(&root.join("nope"), &root.join("dest"), &NullSink, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, MoveError::MissingSource(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_repair_pass_makes_tree_writable() {
        let (_guard, root) = temp_root();
        let src = root.join("locked");
        make_mod(&src, &["a.txt", "b.txt"]);
        set_readonly(&src.join("a.txt"));
        set_readonly(&src.join("b.txt"));

        let (sink, mut rx) = ChannelSink::new();
        let checked = repair_permissions(&src, &sink, &CancelToken::new()).unwrap();

        // a.txt, b.txt, sub/ and the root
        assert_eq!(checked, 4);
        assert!(!fs::metadata(src.join("a.txt")).unwrap().permissions().readonly());
        assert!(!fs::metadata(src.join("b.txt")).unwrap().permissions().readonly());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events[0], TaskEvent::AddTotal(5));
        let progress = events
            .iter()
            .filter(|e| matches!(e, TaskEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 4);
    }

    #[test]
    fn test_repair_pass_stops_on_cancel() {
        let (_guard, root) = temp_root();
        let src = root.join("mod");
        make_mod(&src, &["a.txt"]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = repair_permissions(&src, &NullSink, &cancel).unwrap_err();

        assert!(matches!(err, MoveError::Canceled(_)));
    }

    #[test]
    fn test_permission_denied_then_repaired_clears_partial_copy() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        let dest = root.join("dest_mod");
        make_mod(&src, &["a.txt"]);
        set_readonly(&src.join("a.txt"));

        let mut ops = MockFileOps::new();
        let mut seq = Sequence::new();
        ops.expect_rename()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, dest| {
                // Leave a partial copy behind, like an interrupted cross-device move
                fs::create_dir_all(dest).unwrap();
                fs::write(dest.join("partial.bin"), "half").unwrap();
                Err(permission_denied())
            });
        ops.expect_remove_dir_all()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|path| fs::remove_dir_all(path));
        ops.expect_rename()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|src, dest| fs::rename(src, dest));

        let mover = Mover::with_ops(Arc::new(ops));
        let outcome = mover
            .move_dir(&src, &dest, &NullSink, &CancelToken::new())
            .unwrap();

        assert!(matches!(outcome, MoveOutcome::MovedAfterRepair { repaired: 3 }));
        assert!(!src.exists());
        assert!(dest.join("a.txt").is_file());
        assert!(!dest.join("partial.bin").exists());
        assert!(!fs::metadata(dest.join("a.txt")).unwrap().permissions().readonly());
    }

    #[test]
    fn test_permission_denied_twice_is_recoverable() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        let dest = root.join("dest_mod");
        make_mod(&src, &[]);

        let mut ops = MockFileOps::new();
        ops.expect_rename()
            .times(2)
            .returning(|_, _| Err(permission_denied()));
        ops.expect_remove_dir_all().never();

        let err = Mover::with_ops(Arc::new(ops))
            .move_dir(&src, &dest, &NullSink, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, MoveError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(src.is_dir());
    }

    #[test]
    fn test_cross_device_keeps_copy_when_source_removal_fails() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        let dest = root.join("dest_mod");
        make_mod(&src, &["a.txt", "b.txt"]);

        // Removal deletes one file, then gives up like a locked entry would
        move_across_devices(&src, &dest, |path| {
            let _ = fs::remove_file(path.join("a.txt"));
            Err(permission_denied())
        })
        .unwrap();

        assert!(dest.join("a.txt").is_file());
        assert!(dest.join("b.txt").is_file());
        assert!(dest.join("sub").is_dir());
        assert!(src.join("b.txt").is_file());
    }

    #[test]
    fn test_cross_device_retries_source_removal_after_repair() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        let dest = root.join("dest_mod");
        make_mod(&src, &["a.txt"]);

        let attempts = std::cell::Cell::new(0);
        move_across_devices(&src, &dest, |path| {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(permission_denied())
            } else {
                fs::remove_dir_all(path)
            }
        })
        .unwrap();

        assert_eq!(attempts.get(), 2);
        assert!(!src.exists());
        assert!(dest.join("a.txt").is_file());
    }

    #[test]
    fn test_cross_device_failed_copy_removes_partial_copy() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        let dest = root.join("dest_mod");
        make_mod(&src, &["a.txt"]);
        // A file where a copied folder must go makes the copy fail midway
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("sub"), "in the way").unwrap();

        let err = move_across_devices(&src, &dest, |_| panic!("source must be kept")).unwrap_err();

        assert_ne!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dest.exists());
        assert!(src.join("a.txt").is_file());
    }

    #[test]
    fn test_other_io_error_is_fatal() {
        let (_guard, root) = temp_root();
        let src = root.join("src_mod");
        make_mod(&src, &[]);

        let mut ops = MockFileOps::new();
        ops.expect_rename()
            .times(1)
            .returning(|_, _| Err(io::Error::other("disk on fire")));

        let err = Mover::with_ops(Arc::new(ops))
            .move_dir(&src, &root.join("dest"), &NullSink, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, MoveError::Io { .. }));
        assert!(!err.is_recoverable());
    }
}
