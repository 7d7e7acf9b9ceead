//! Two-pointer merge of a locally enumerated tree against a received remote
//! file list (§4.7). Produces the queue of remote indices that need a
//! content transfer, performing every other action (directory/symlink
//! creation, chmod, local removal) synchronously as it walks the lists.

use std::collections::HashSet;
use std::path::Path;

use flist::{compare_globally, is_reserved, is_valid_path, Entry, IS_FILE};
use platform::Filesystem;

use crate::config::Stats;
use crate::error::SessionError;

const PERM_MASK: u32 = 0o7_777;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Kind {
    Dir,
    Symlink,
    Regular,
    NonRegular,
}

fn classify(entry: &Entry) -> Kind {
    if entry.is_directory() {
        Kind::Dir
    } else if entry.is_symlink() {
        Kind::Symlink
    } else if entry.mode() & IS_FILE != 0 {
        Kind::Regular
    } else {
        Kind::NonRegular
    }
}

/// Merges `local` and `remote` (both sorted by [`compare_globally`]),
/// applying every non-transfer action directly and returning the remote
/// indices that still need their content pulled.
///
/// `include_only`, when set, restricts the sweep to remote paths present in
/// the set; everything else is treated as absent.
pub fn reconcile<F: Filesystem>(
    fs: &F,
    root: &Path,
    local: &[Entry],
    remote: &[Entry],
    include_only: Option<&HashSet<String>>,
    stats: &mut Stats,
) -> Result<Vec<i32>, SessionError> {
    let mut queue = Vec::new();
    let mut li = 0usize;

    for (ri, rentry) in remote.iter().enumerate() {
        while li < local.len() && compare_globally(&local[li], rentry) == std::cmp::Ordering::Less {
            li += 1;
        }
        let local_match = (li < local.len() && compare_globally(&local[li], rentry) == std::cmp::Ordering::Equal)
            .then(|| &local[li]);

        let skip_entirely = is_reserved(rentry.path())
            || include_only.is_some_and(|set| !set.contains(rentry.path()));

        if skip_entirely {
            if local_match.is_some() {
                li += 1;
            }
            continue;
        }

        let full = root.join(rentry.path());
        apply_action(fs, &full, rentry, local_match, &mut queue, ri, stats)?;

        if local_match.is_some() {
            li += 1;
        }
    }

    Ok(queue)
}

#[allow(clippy::too_many_arguments)]
fn apply_action<F: Filesystem>(
    fs: &F,
    full: &Path,
    remote: &Entry,
    local: Option<&Entry>,
    queue: &mut Vec<i32>,
    remote_index: usize,
    stats: &mut Stats,
) -> Result<(), SessionError> {
    let valid = is_valid_path(remote.path());

    match (classify(remote), local) {
        (Kind::Dir, None) => {
            fs.create_dir(full)?;
            stats.add_skipped(remote.size().max(0) as u64);
        }
        (Kind::Symlink, None) => {
            if valid {
                fs.symlink(remote.symlink().unwrap_or(""), full)?;
            } else {
                log_skip(remote.path());
            }
        }
        (Kind::NonRegular, None) => log_skip(remote.path()),
        (Kind::Regular, None) => {
            if valid {
                queue.push(remote_index as i32);
            } else {
                log_skip(remote.path());
            }
        }
        (Kind::Symlink, Some(local_entry)) => {
            remove_local(fs, full, local_entry)?;
            if valid {
                fs.symlink(remote.symlink().unwrap_or(""), full)?;
            } else {
                log_skip(remote.path());
            }
        }
        (Kind::Dir, Some(local_entry)) if local_entry.is_directory() => {
            if local_entry.mode() & PERM_MASK != remote.mode() & PERM_MASK {
                fs.set_mode(full, remote.mode() & PERM_MASK)?;
            }
        }
        (Kind::Dir, Some(local_entry)) => {
            remove_local(fs, full, local_entry)?;
            fs.create_dir(full)?;
            fs.set_mode(full, remote.mode() & PERM_MASK)?;
        }
        (Kind::Regular, Some(local_entry)) if local_entry.is_directory() => {
            remove_local(fs, full, local_entry)?;
            if valid {
                queue.push(remote_index as i32);
            } else {
                log_skip(remote.path());
            }
        }
        (Kind::Regular, Some(local_entry)) if classify(local_entry) != Kind::Regular => log_skip(remote.path()),
        (Kind::Regular, Some(local_entry)) => {
            if !valid {
                log_skip(remote.path());
            } else if local_entry.is_older_than(remote) {
                queue.push(remote_index as i32);
            } else {
                if local_entry.mode() & PERM_MASK != remote.mode() & PERM_MASK {
                    fs.set_mode(full, remote.mode() & PERM_MASK)?;
                }
                stats.add_skipped(remote.size().max(0) as u64);
            }
        }
        (Kind::NonRegular, Some(_)) => log_skip(remote.path()),
    }

    Ok(())
}

fn log_skip(path: &str) {
    logging_sink::log(
        logging_sink::Level::Info,
        "RECONCILE_SKIP",
        &format!("skipping {path}"),
    );
}

fn remove_local<F: Filesystem>(fs: &F, full: &Path, local: &Entry) -> Result<(), platform::FsError> {
    if local.is_directory() {
        remove_dir_recursive(fs, full)
    } else {
        fs.remove_file(full)
    }
}

fn remove_dir_recursive<F: Filesystem>(fs: &F, dir: &Path) -> Result<(), platform::FsError> {
    for child in fs.read_dir(dir)? {
        let child_path = dir.join(&child.name);
        if child.is_dir {
            remove_dir_recursive(fs, &child_path)?;
        } else {
            fs.remove_file(&child_path)?;
        }
    }
    fs.remove_dir(dir)
}

/// Walks both fully-sorted lists a second time, after transfers complete,
/// removing local entries whose path is absent on the remote side. Only
/// called when deletion is enabled.
pub fn sweep_deletions<F: Filesystem>(
    fs: &F,
    root: &Path,
    local: &[Entry],
    remote: &[Entry],
) -> Result<Vec<String>, SessionError> {
    let mut ri = 0usize;
    let mut deleted = Vec::new();
    for lentry in local {
        if is_reserved(lentry.path()) {
            continue;
        }
        while ri < remote.len() && compare_globally(&remote[ri], lentry) == std::cmp::Ordering::Less {
            ri += 1;
        }
        let present = ri < remote.len() && compare_globally(&remote[ri], lentry) == std::cmp::Ordering::Equal;
        if !present {
            let full = root.join(lentry.path());
            remove_local(fs, &full, lentry)?;
            deleted.push(lentry.path().to_string());
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeFs {
        dirs_created: RefCell<Vec<PathBuf>>,
        symlinks_created: RefCell<Vec<(String, PathBuf)>>,
        files_removed: RefCell<Vec<PathBuf>>,
        modes_set: RefCell<Vec<(PathBuf, u32)>>,
    }

    struct FakeFile;
    impl std::io::Read for FakeFile {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }
    impl std::io::Write for FakeFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl platform::FileHandle for FakeFile {
        fn seek(&mut self, _pos: platform::SeekFrom) -> Result<u64, platform::FsError> {
            Ok(0)
        }
    }

    impl Filesystem for FakeFs {
        type File = FakeFile;

        fn open_for_read(&self, _path: &Path) -> Result<Self::File, platform::FsError> {
            Ok(FakeFile)
        }
        fn create_for_write_truncate(&self, _path: &Path) -> Result<Self::File, platform::FsError> {
            Ok(FakeFile)
        }
        fn stat(&self, path: &Path) -> Result<platform::Metadata, platform::FsError> {
            Err(platform::FsError::NotFound { path: path.to_path_buf() })
        }
        fn lstat(&self, path: &Path) -> Result<platform::Metadata, platform::FsError> {
            Err(platform::FsError::NotFound { path: path.to_path_buf() })
        }
        fn read_dir(&self, _path: &Path) -> Result<Vec<platform::DirEntry>, platform::FsError> {
            Ok(Vec::new())
        }
        fn read_link(&self, _path: &Path) -> Result<String, platform::FsError> {
            Ok(String::new())
        }
        fn symlink(&self, target: &str, path: &Path) -> Result<(), platform::FsError> {
            self.symlinks_created.borrow_mut().push((target.to_string(), path.to_path_buf()));
            Ok(())
        }
        fn rename(&self, _from: &Path, _to: &Path) -> Result<(), platform::FsError> {
            Ok(())
        }
        fn remove_file(&self, path: &Path) -> Result<(), platform::FsError> {
            self.files_removed.borrow_mut().push(path.to_path_buf());
            Ok(())
        }
        fn create_dir(&self, path: &Path) -> Result<(), platform::FsError> {
            self.dirs_created.borrow_mut().push(path.to_path_buf());
            Ok(())
        }
        fn remove_dir(&self, _path: &Path) -> Result<(), platform::FsError> {
            Ok(())
        }
        fn set_mode(&self, path: &Path, mode: u32) -> Result<(), platform::FsError> {
            self.modes_set.borrow_mut().push((path.to_path_buf(), mode));
            Ok(())
        }
        fn set_mtime(&self, _path: &Path, _mtime: i64) -> Result<(), platform::FsError> {
            Ok(())
        }
        fn exists(&self, _path: &Path) -> bool {
            false
        }
        fn current_dir(&self) -> Result<PathBuf, platform::FsError> {
            Ok(PathBuf::from("."))
        }
    }

    fn file(path: &str, time: i64) -> Entry {
        Entry::new(path, false, 10, time, 0o644)
    }

    fn dir(path: &str) -> Entry {
        Entry::new(path, true, 0, 0, 0o755)
    }

    #[test]
    fn missing_remote_file_is_queued_for_transfer() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let remote = vec![file("a.txt", 100)];
        let queue = reconcile(&fs, Path::new("/root"), &[], &remote, None, &mut stats).unwrap();
        assert_eq!(queue, vec![0]);
    }

    #[test]
    fn up_to_date_local_file_is_skipped_and_counted() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let local = vec![file("a.txt", 100)];
        let remote = vec![file("a.txt", 100)];
        let queue = reconcile(&fs, Path::new("/root"), &local, &remote, None, &mut stats).unwrap();
        assert!(queue.is_empty());
        assert_eq!(stats.skipped_bytes, 10);
    }

    #[test]
    fn stale_local_file_is_requeued() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let local = vec![file("a.txt", 50)];
        let remote = vec![file("a.txt", 100)];
        let queue = reconcile(&fs, Path::new("/root"), &local, &remote, None, &mut stats).unwrap();
        assert_eq!(queue, vec![0]);
    }

    #[test]
    fn missing_remote_directory_is_created() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let remote = vec![dir("sub/")];
        let queue = reconcile(&fs, Path::new("/root"), &[], &remote, None, &mut stats).unwrap();
        assert!(queue.is_empty());
        assert_eq!(fs.dirs_created.borrow().as_slice(), [Path::new("/root/sub/")]);
    }

    #[test]
    fn remote_symlink_replacing_a_local_file_removes_it_first() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let local = vec![file("link", 0)];
        let remote = vec![Entry::new("link", false, 0, 0, 0o777).with_symlink("target")];
        reconcile(&fs, Path::new("/root"), &local, &remote, None, &mut stats).unwrap();
        assert_eq!(fs.files_removed.borrow().as_slice(), [Path::new("/root/link")]);
        assert_eq!(fs.symlinks_created.borrow()[0].0, "target");
    }

    #[test]
    fn forbidden_path_is_skipped_rather_than_queued() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let remote = vec![file("bad:name.txt", 100)];
        let queue = reconcile(&fs, Path::new("/root"), &[], &remote, None, &mut stats).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn reserved_state_directory_is_never_touched() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let remote = vec![dir(".acrosync/"), file(".acrosync/state.db", 100)];
        let queue = reconcile(&fs, Path::new("/root"), &[], &remote, None, &mut stats).unwrap();
        assert!(queue.is_empty());
        assert!(fs.dirs_created.borrow().is_empty());
    }

    #[test]
    fn include_only_restricts_the_sweep() {
        let fs = FakeFs::default();
        let mut stats = Stats::default();
        let remote = vec![file("a.txt", 100), file("b.txt", 100)];
        let mut keep = HashSet::new();
        keep.insert("b.txt".to_string());
        let queue = reconcile(&fs, Path::new("/root"), &[], &remote, Some(&keep), &mut stats).unwrap();
        assert_eq!(queue, vec![1]);
    }

    #[test]
    fn deletion_sweep_removes_local_entries_absent_remotely() {
        let fs = FakeFs::default();
        let local = vec![file("gone.txt", 0), file("kept.txt", 0)];
        let remote = vec![file("kept.txt", 0)];
        sweep_deletions(&fs, Path::new("/root"), &local, &remote).unwrap();
        assert_eq!(fs.files_removed.borrow().as_slice(), [Path::new("/root/gone.txt")]);
    }
}
