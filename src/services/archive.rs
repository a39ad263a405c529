use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Archive formats recognised as mod packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZ,
    Rar,
}

impl ArchiveFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "zip" => Some(ArchiveFormat::Zip),
            "7z" => Some(ArchiveFormat::SevenZ),
            "rar" => Some(ArchiveFormat::Rar),
            _ => None,
        }
    }
}

/// What an install source turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// An unpacked mod folder, installed by moving it.
    Directory,
    Archive(ArchiveFormat),
    Unsupported,
}

/// Classify an install source by looking at the filesystem and its extension.
pub fn classify(path: &Utf8Path) -> SourceKind {
    if path.is_dir() {
        return SourceKind::Directory;
    }

    path.extension()
        .and_then(ArchiveFormat::from_extension)
        .map_or(SourceKind::Unsupported, SourceKind::Archive)
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{0} is not a supported archive")]
    NotAnArchive(Utf8PathBuf),

    #[error("failed to unpack RAR archive {path}")]
    Rar {
        path: Utf8PathBuf,
        #[source]
        source: unrar::error::UnrarError,
    },

    #[error("failed to read zip archive {path}")]
    Zip {
        path: Utf8PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to unpack 7z archive {path}")]
    SevenZ {
        path: Utf8PathBuf,
        #[source]
        source: sevenz_rust::Error,
    },

    #[error("I/O error while unpacking into {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Extract `archive` into `dest_dir`, creating it if needed.
///
/// Entries whose names would escape `dest_dir` are skipped.
pub fn unpack(archive: &Utf8Path, dest_dir: &Utf8Path) -> Result<(), ArchiveError> {
    let format = match classify(archive) {
        SourceKind::Archive(format) => format,
        _ => return Err(ArchiveError::NotAnArchive(archive.to_path_buf())),
    };

    fs::create_dir_all(dest_dir).map_err(|source| ArchiveError::Io {
        path: dest_dir.to_path_buf(),
        source,
    })?;

    tracing::info!("Unpacking {} into {}", archive, dest_dir);
    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest_dir),
        ArchiveFormat::SevenZ => sevenz_rust::decompress_file(archive, dest_dir).map_err(|source| {
            ArchiveError::SevenZ {
                path: archive.to_path_buf(),
                source,
            }
        }),
        ArchiveFormat::Rar => extract_rar(archive, dest_dir),
    }
}

fn extract_rar(archive: &Utf8Path, dest_dir: &Utf8Path) -> Result<(), ArchiveError> {
    let rar_err = |source| ArchiveError::Rar {
        path: archive.to_path_buf(),
        source,
    };
    let io_err = |source| ArchiveError::Io {
        path: dest_dir.to_path_buf(),
        source,
    };

    let mut rar = unrar::Archive::new(archive.as_std_path())
        .open_for_processing()
        .map_err(rar_err)?;

    while let Some(header) = rar.read_header().map_err(rar_err)? {
        let entry = header.entry();
        let Some(relative) = enclosed(&entry.filename) else {
            tracing::warn!("Skipping unsafe entry {} in {}", entry.filename.display(), archive);
            rar = header.skip().map_err(rar_err)?;
            continue;
        };

        let out_path = dest_dir.as_std_path().join(relative);
        if entry.is_directory() {
            fs::create_dir_all(&out_path).map_err(io_err)?;
            rar = header.skip().map_err(rar_err)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        rar = header.extract_to(&out_path).map_err(rar_err)?;
    }

    Ok(())
}

/// `name` as a path that stays inside the extraction directory, if it does.
fn enclosed(name: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

fn extract_zip(archive: &Utf8Path, dest_dir: &Utf8Path) -> Result<(), ArchiveError> {
    let zip_err = |source| ArchiveError::Zip {
        path: archive.to_path_buf(),
        source,
    };

    let file = fs::File::open(archive).map_err(|source| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe entry {} in {}", entry.name(), archive);
            continue;
        };

        let out_path = dest_dir.as_std_path().join(relative);
        let io_err = |source| ArchiveError::Io {
            path: dest_dir.to_path_buf(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_err)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out_file = fs::File::create(&out_path).map_err(io_err)?;
        io::copy(&mut entry, &mut out_file).map_err(io_err)?;
    }

    Ok(())
}
