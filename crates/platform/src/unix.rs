use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek as _, SeekFrom as StdSeekFrom, Write};
use std::os::unix::fs::{MetadataExt as _, PermissionsExt as _};
use std::path::{Path, PathBuf};

use crate::{DirEntry, FileHandle, Filesystem, FsError, Metadata, SeekFrom};

/// Mode bit constants mirroring `Entry`'s `IS_*` enum in the reference client.
pub const IS_FILE: u32 = 0o100_000;
/// Directory bit (`S_IFDIR`).
pub const IS_DIR: u32 = 0o040_000;
/// Symlink bit (`S_IFLNK`).
pub const IS_LINK: u32 = 0o020_000;

/// Standard-library-backed [`Filesystem`] implementation for Unix-like systems.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnixFilesystem;

impl UnixFilesystem {
    /// Creates a new handle. Stateless; cheap to construct per call site.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn to_metadata(meta: &fs::Metadata) -> Metadata {
    let file_type = meta.file_type();
    let mut mode = meta.mode() & 0o7_777;
    if file_type.is_dir() {
        mode |= IS_DIR;
    } else if file_type.is_symlink() {
        mode |= IS_FILE | IS_LINK;
    } else {
        mode |= IS_FILE;
    }
    Metadata {
        size: if file_type.is_dir() { 0 } else { meta.len() as i64 },
        mtime: meta.mtime(),
        mode,
    }
}

/// Open file handle backed by [`std::fs::File`].
pub struct UnixFile(File);

impl Read for UnixFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for UnixFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl FileHandle for UnixFile {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let std_pos = match pos {
            SeekFrom::Start(n) => StdSeekFrom::Start(n),
            SeekFrom::Current(n) => StdSeekFrom::Current(n),
            SeekFrom::End(n) => StdSeekFrom::End(n),
        };
        self.0
            .seek(std_pos)
            .map_err(|e| FsError::from_io(Path::new("<open file>"), e))
    }
}

impl Filesystem for UnixFilesystem {
    type File = UnixFile;

    fn open_for_read(&self, path: &Path) -> Result<Self::File, FsError> {
        File::open(path)
            .map(UnixFile)
            .map_err(|e| FsError::from_io(path, e))
    }

    fn create_for_write_truncate(&self, path: &Path) -> Result<Self::File, FsError> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map(UnixFile)
            .map_err(|e| FsError::from_io(path, e))
    }

    fn stat(&self, path: &Path) -> Result<Metadata, FsError> {
        fs::metadata(path)
            .map(|m| to_metadata(&m))
            .map_err(|e| FsError::from_io(path, e))
    }

    fn lstat(&self, path: &Path) -> Result<Metadata, FsError> {
        fs::symlink_metadata(path)
            .map(|m| to_metadata(&m))
            .map_err(|e| FsError::from_io(path, e))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| FsError::from_io(path, e))? {
            let entry = entry.map_err(|e| FsError::from_io(path, e))?;
            let file_type = entry.file_type().map_err(|e| FsError::from_io(path, e))?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(out)
    }

    fn read_link(&self, path: &Path) -> Result<String, FsError> {
        fs::read_link(path)
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| FsError::from_io(path, e))
    }

    fn symlink(&self, target: &str, path: &Path) -> Result<(), FsError> {
        std::os::unix::fs::symlink(target, path).map_err(|e| FsError::from_io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|e| FsError::from_io(from, e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|e| FsError::from_io(path, e))
    }

    fn create_dir(&self, path: &Path) -> Result<(), FsError> {
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(FsError::from_io(path, e)),
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_dir(path).map_err(|e| FsError::from_io(path, e))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), FsError> {
        let perms = fs::Permissions::from_mode(mode & 0o7_777);
        fs::set_permissions(path, perms).map_err(|e| FsError::from_io(path, e))
    }

    fn set_mtime(&self, path: &Path, mtime: i64) -> Result<(), FsError> {
        let time = filetime::FileTime::from_unix_time(mtime, 0);
        filetime::set_file_mtime(path, time).map_err(|e| FsError::from_io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn current_dir(&self) -> Result<PathBuf, FsError> {
        std::env::current_dir().map_err(|e| FsError::from_io(Path::new("."), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_write_read_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let fs = UnixFilesystem::new();

        let mut f = fs.create_for_write_truncate(&path).unwrap();
        f.write_all(b"hello").unwrap();
        drop(f);

        let meta = fs.stat(&path).unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.mode & IS_FILE, IS_FILE);

        let mut f = fs.open_for_read(&path).unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn symlink_round_trips_target() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        let fs = UnixFilesystem::new();

        fs.symlink("target-name", &link).unwrap();
        assert_eq!(fs.read_link(&link).unwrap(), "target-name");
        assert_eq!(fs.lstat(&link).unwrap().mode & IS_LINK, IS_LINK);
    }

    #[test]
    fn missing_path_reports_not_found() {
        let fs = UnixFilesystem::new();
        let err = fs.stat(Path::new("/does/not/exist")).unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
    }
}
