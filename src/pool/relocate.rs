//! Moves a finished download from its staging path to its final path.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

/// Error relocating a staged file.
#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    /// The final path's parent directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Copying across filesystems failed; the staging file is intact.
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        /// Staging path.
        from: PathBuf,
        /// Final path.
        to: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The copy succeeded but the staging file could not be removed.
    #[error("copied to final path but failed to remove staging file {path}: {source}")]
    RemoveStaging {
        /// Staging path left behind.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// How the file reached its final path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationMethod {
    /// Same filesystem; renamed in place.
    Renamed,
    /// Different filesystem; copied, then the staging file was removed.
    Copied,
}

/// Moves `staging` to `target`, creating `target`'s parent directories.
///
/// A rename is tried first. When it fails (typically because the paths are on
/// different filesystems) the bytes are copied and the staging file is
/// removed only after the copy completed. A copy that fails while writing
/// removes whatever it wrote to `target`; one that cannot read `staging` leaves
/// `target` alone. `staging` is never touched on failure.
///
/// # Errors
///
/// Returns a [`RelocateError`] naming the step that failed.
pub async fn relocate(staging: &Path, target: &Path) -> Result<RelocationMethod, RelocateError> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| RelocateError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    match fs::rename(staging, target).await {
        Ok(()) => {
            debug!(from = %staging.display(), to = %target.display(), "renamed");
            return Ok(RelocationMethod::Renamed);
        }
        Err(e) => debug!(error = %e, "rename failed, copying instead"),
    }

    // An unreadable staging file must not cost an existing target.
    if let Err(source) = fs::File::open(staging).await {
        return Err(RelocateError::Copy {
            from: staging.to_path_buf(),
            to: target.to_path_buf(),
            source,
        });
    }

    if let Err(source) = fs::copy(staging, target).await {
        if let Err(e) = fs::remove_file(target).await
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %target.display(), error = %e, "failed to remove partial copy");
        }
        return Err(RelocateError::Copy {
            from: staging.to_path_buf(),
            to: target.to_path_buf(),
            source,
        });
    }

    fs::remove_file(staging)
        .await
        .map_err(|source| RelocateError::RemoveStaging {
            path: staging.to_path_buf(),
            source,
        })?;
    Ok(RelocationMethod::Copied)
}
