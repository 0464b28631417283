//! Runtime working directory.
//!
//! The working directory holds the generated record configuration, the
//! bridge log and any scratch files the model adapter writes.
//!
//! | Variant | Created by | Cleanup |
//! |---------|-----------|---------|
//! | [`Persistent`](WorkDir::Persistent) | Caller-supplied path, must not exist yet | Directory is **kept** |
//! | [`Temporary`](WorkDir::Temporary) | Random name with suffix `_va` | Directory is **removed** |

use std::path::{Path, PathBuf};

/// Suffix of runtime-created temporary directories.
pub const TEMP_DIR_SUFFIX: &str = "_va";

/// Errors creating or removing the working directory.
#[derive(Debug, thiserror::Error)]
pub enum WorkDirError {
    /// A caller-supplied directory already exists.
    #[error("working directory already exists: {}", path.display())]
    Exists {
        /// The existing path.
        path: PathBuf,
    },

    /// Creating or removing the directory failed.
    #[error("working directory {}: {source}", path.display())]
    Io {
        /// Directory path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// A directory that exists for as long as this value is alive.
#[derive(Debug)]
pub enum WorkDir {
    /// Caller-supplied directory. Never removed by the runtime.
    Persistent(PathBuf),
    /// Runtime-created directory. Removed on [`WorkDir::close`] or drop.
    Temporary(tempfile::TempDir),
}

impl WorkDir {
    /// Create a caller-supplied directory, including missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Exists`] if anything is already at `path`,
    /// so an earlier run's files are never clobbered.
    pub fn persistent(path: PathBuf) -> Result<Self, WorkDirError> {
        if path.exists() {
            return Err(WorkDirError::Exists { path });
        }
        match std::fs::create_dir_all(&path) {
            Ok(()) => Ok(Self::Persistent(path)),
            Err(source) => Err(WorkDirError::Io { path, source }),
        }
    }

    /// Create a temporary directory under the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] if the directory cannot be created.
    pub fn temporary() -> Result<Self, WorkDirError> {
        tempfile::Builder::new()
            .suffix(TEMP_DIR_SUFFIX)
            .tempdir()
            .map(Self::Temporary)
            .map_err(|source| WorkDirError::Io {
                path: std::env::temp_dir(),
                source,
            })
    }

    /// Create the directory the configuration asks for: `explicit` when
    /// given, a temporary one otherwise.
    ///
    /// # Errors
    ///
    /// See [`WorkDir::persistent`] and [`WorkDir::temporary`].
    pub fn create(explicit: Option<&Path>) -> Result<Self, WorkDirError> {
        match explicit {
            Some(path) => Self::persistent(path.to_path_buf()),
            None => Self::temporary(),
        }
    }

    /// Path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Persistent(p) => p,
            Self::Temporary(td) => td.path(),
        }
    }

    /// Returns `true` if the directory is removed at cleanup.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Release the directory: remove it if temporary, keep it otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`WorkDirError::Io`] if removal fails.
    pub fn close(self) -> Result<(), WorkDirError> {
        match self {
            Self::Persistent(_) => Ok(()),
            Self::Temporary(td) => {
                let path = td.path().to_path_buf();
                td.close().map_err(|source| WorkDirError::Io { path, source })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn temporary_is_removed_on_close() {
        let wd = WorkDir::temporary().unwrap();
        let path = wd.path().to_path_buf();
        assert!(path.is_dir());
        assert!(wd.is_temporary());
        assert!(
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TEMP_DIR_SUFFIX))
        );

        wd.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn persistent_is_created_and_kept() {
        let outer = tempfile::tempdir().unwrap();
        let target = outer.path().join("run").join("one");

        let wd = WorkDir::persistent(target.clone()).unwrap();
        assert!(target.is_dir());
        assert!(!wd.is_temporary());
        assert_eq!(wd.path(), target);

        wd.close().unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn persistent_refuses_existing_path() {
        let outer = tempfile::tempdir().unwrap();
        let err = WorkDir::persistent(outer.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, WorkDirError::Exists { .. }));
    }

    #[test]
    fn create_picks_variant() {
        let outer = tempfile::tempdir().unwrap();
        let explicit = outer.path().join("va");
        assert!(!WorkDir::create(Some(&explicit)).unwrap().is_temporary());
        assert!(WorkDir::create(None).unwrap().is_temporary());
    }
}
