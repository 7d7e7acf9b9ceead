use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::{Filesystem, FsError};

/// Retain a partially-downloaded temp file if it was in flight long enough to
/// be worth resuming from, matching the reference client's heuristic.
const RETAIN_PARTIAL_AFTER: std::time::Duration = std::time::Duration::from_secs(10);

/// Scoped acquisition of an intermediate download file (§4.9).
///
/// On [`Self::commit`] the temp file is renamed over the destination with
/// the given mtime/mode. If the keeper is dropped without a commit, it
/// either preserves the temp file (acquisition lived past the retention
/// threshold, so a future run can resume from it) or deletes it.
pub struct PartialKeeper<'a, F: Filesystem> {
    fs: &'a F,
    temp_path: PathBuf,
    destination: PathBuf,
    mode: u32,
    mtime: i64,
    started: Instant,
    committed: bool,
}

impl<'a, F: Filesystem> PartialKeeper<'a, F> {
    /// Begins tracking `temp_path` as the eventual source for `destination`.
    /// `mtime` is the entry's intended modification time, applied both on
    /// [`Self::commit`] and, if the temp file is instead retained on drop,
    /// there too.
    pub fn new(fs: &'a F, temp_path: PathBuf, destination: PathBuf, mode: u32, mtime: i64) -> Self {
        Self {
            fs,
            temp_path,
            destination,
            mode,
            mtime,
            started: Instant::now(),
            committed: false,
        }
    }

    /// Path of the temporary file callers should write into.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Finalizes the transfer: rename the temp file over the destination,
    /// then apply mtime and mode.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] if the rename, mtime, or mode change fails.
    pub fn commit(mut self) -> Result<(), FsError> {
        self.fs.rename(&self.temp_path, &self.destination)?;
        self.fs.set_mtime(&self.destination, self.mtime)?;
        self.fs.set_mode(&self.destination, self.mode)?;
        self.committed = true;
        Ok(())
    }
}

impl<F: Filesystem> Drop for PartialKeeper<'_, F> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        if self.started.elapsed() >= RETAIN_PARTIAL_AFTER {
            match self.fs.rename(&self.temp_path, &self.destination) {
                Ok(()) => {
                    let _ = self.fs.set_mtime(&self.destination, self.mtime);
                    let _ = self.fs.set_mode(&self.destination, self.mode);
                }
                Err(err) => {
                    tracing::debug!(
                        temp = %self.temp_path.display(),
                        %err,
                        "could not retain partial download, removing temp file",
                    );
                    let _ = self.fs.remove_file(&self.temp_path);
                }
            }
            return;
        }

        let _ = self.fs.remove_file(&self.temp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnixFilesystem;
    use std::io::Write as _;

    #[test]
    fn commit_renames_and_applies_mtime_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let fs = UnixFilesystem::new();
        let temp = dir.path().join(".partial");
        let dest = dir.path().join("out.bin");

        let mut f = fs.create_for_write_truncate(&temp).unwrap();
        f.write_all(b"data").unwrap();
        drop(f);

        let keeper = PartialKeeper::new(&fs, temp.clone(), dest.clone(), 0o640, 1_700_000_000);
        keeper.commit().unwrap();

        assert!(!temp.exists());
        assert!(dest.exists());
        let meta = fs.stat(&dest).unwrap();
        assert_eq!(meta.mtime, 1_700_000_000);
        assert_eq!(meta.mode & 0o777, 0o640);
    }

    #[test]
    fn drop_without_commit_removes_short_lived_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = UnixFilesystem::new();
        let temp = dir.path().join(".partial");
        let dest = dir.path().join("out.bin");

        fs.create_for_write_truncate(&temp).unwrap();
        {
            let _keeper = PartialKeeper::new(&fs, temp.clone(), dest.clone(), 0o640, 1_700_000_000);
        }

        assert!(!temp.exists());
        assert!(!dest.exists());
    }
}
