//! Filesystem abstraction consumed by the diff engine and session driver.
//!
//! Rsync's reference client talks to the filesystem through a small set of
//! primitives (open/read/write/seek/stat/readdir/readlink/symlink/rename/
//! remove/mkdir/chmod/utime). Modeling that as a trait keeps platform
//! differences (path encoding, `lseek64` vs `SetFilePointer`, NFC
//! normalization on Darwin) out of the transfer core; today only the Unix
//! backend is implemented.

mod error;
mod partial;
mod unix;

pub use error::FsError;
pub use partial::PartialKeeper;

use std::path::{Path, PathBuf};

/// Directory entry returned by [`Filesystem::read_dir`].
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// File name, not a full path.
    pub name: String,
    /// `true` if the entry is itself a directory (not resolved through symlinks).
    pub is_dir: bool,
}

/// Metadata returned by [`Filesystem::stat`] and [`Filesystem::lstat`].
#[derive(Clone, Copy, Debug)]
pub struct Metadata {
    /// File size in bytes; 0 for directories.
    pub size: i64,
    /// Last modified time, Unix seconds.
    pub mtime: i64,
    /// POSIX mode bits, including the file-type bits.
    pub mode: u32,
}

/// Seek origin, mirroring `File::SEEK_FROM_*` in the reference client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeekFrom {
    /// Offset from the start of the file.
    Start(u64),
    /// Offset from the current position.
    Current(i64),
    /// Offset from the end of the file.
    End(i64),
}

/// An open file handle.
pub trait FileHandle: std::io::Read + std::io::Write {
    /// Moves the read/write position.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`] if the underlying seek fails.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError>;
}

/// Filesystem operations the transfer core needs.
///
/// # Errors
///
/// Every fallible method returns [`FsError`]; callers distinguish "file does
/// not exist" (`FsError::NotFound`) from other I/O failures where the spec's
/// reconciliation logic needs to (§4.7).
pub trait Filesystem {
    /// The concrete open-file type this implementation returns.
    type File: FileHandle;

    /// Opens `path` for reading.
    fn open_for_read(&self, path: &Path) -> Result<Self::File, FsError>;

    /// Creates (truncating if necessary) `path` for writing.
    fn create_for_write_truncate(&self, path: &Path) -> Result<Self::File, FsError>;

    /// Returns metadata for `path`, following symlinks.
    fn stat(&self, path: &Path) -> Result<Metadata, FsError>;

    /// Returns metadata for `path` without following a terminal symlink.
    fn lstat(&self, path: &Path) -> Result<Metadata, FsError>;

    /// Lists the immediate children of a directory.
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    /// Reads the target of a symbolic link.
    fn read_link(&self, path: &Path) -> Result<String, FsError>;

    /// Creates a symbolic link at `path` pointing to `target`.
    fn symlink(&self, target: &str, path: &Path) -> Result<(), FsError>;

    /// Renames (or moves) `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Removes a regular file or symlink.
    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    /// Creates a directory; succeeds if it already exists.
    fn create_dir(&self, path: &Path) -> Result<(), FsError>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<(), FsError>;

    /// Changes the mode bits of `path`.
    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), FsError>;

    /// Sets the modification time of `path`.
    fn set_mtime(&self, path: &Path, mtime: i64) -> Result<(), FsError>;

    /// Returns whether `path` exists (following symlinks).
    fn exists(&self, path: &Path) -> bool;

    /// Returns the process's current working directory.
    fn current_dir(&self) -> Result<PathBuf, FsError>;
}

pub use unix::UnixFilesystem;
