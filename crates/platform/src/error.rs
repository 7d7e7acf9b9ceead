use std::path::PathBuf;

/// Errors surfaced by the [`crate::Filesystem`] trait.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("{path}: not found")]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The path exists but access was denied.
    #[error("{path}: permission denied")]
    PermissionDenied {
        /// The path that was accessed.
        path: PathBuf,
    },

    /// Any other I/O failure, with the path it occurred on for diagnostics.
    #[error("{path}: {source}")]
    Io {
        /// The path the operation was attempted against.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub(crate) fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}
