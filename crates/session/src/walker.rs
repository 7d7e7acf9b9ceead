//! Local filesystem tree walker used by both transfer directions to build a
//! `flist::Entry` list that sorts identically to whatever the remote sends
//! (§4.8 "Enumerate local tree").

use std::path::Path;

use flist::{compare_globally, is_reserved, Entry, IS_DIR, IS_FILE, IS_LINK};
use platform::{FsError, Metadata};

use crate::error::SessionError;

fn is_dir_mode(mode: u32) -> bool {
    mode & IS_DIR != 0 && mode & IS_FILE == 0
}

fn is_symlink_mode(mode: u32) -> bool {
    mode & IS_LINK != 0
}

fn to_entry<F: platform::Filesystem>(fs: &F, full: &Path, rel_path: &str, meta: &Metadata) -> Result<Entry, SessionError> {
    let perm = meta.mode & 0o7_777;
    if is_symlink_mode(meta.mode) {
        let target = fs.read_link(full)?;
        Ok(Entry::new(rel_path, false, 0, meta.mtime, perm).with_symlink(target))
    } else if is_dir_mode(meta.mode) {
        Ok(Entry::new(format!("{rel_path}/"), true, 0, meta.mtime, perm))
    } else {
        Ok(Entry::new(rel_path, false, meta.size, meta.mtime, perm))
    }
}

/// Recursively enumerates `root`, returning entries sorted by
/// [`compare_globally`], with the reserved state directory excluded.
///
/// A missing `root` yields an empty list rather than an error: a download
/// into a not-yet-created destination starts from nothing.
pub fn walk_local_tree<F: platform::Filesystem>(fs: &F, root: &Path) -> Result<Vec<Entry>, SessionError> {
    let mut out = Vec::new();
    walk_into(fs, root, "", &mut out)?;
    out.sort_by(compare_globally);
    Ok(out)
}

fn walk_into<F: platform::Filesystem>(
    fs: &F,
    root: &Path,
    rel_prefix: &str,
    out: &mut Vec<Entry>,
) -> Result<(), SessionError> {
    let dir_path = if rel_prefix.is_empty() { root.to_path_buf() } else { root.join(rel_prefix) };

    let children = match fs.read_dir(&dir_path) {
        Ok(children) => children,
        Err(FsError::NotFound { .. }) => return Ok(()),
        Err(other) => return Err(other.into()),
    };

    for child in children {
        let rel_path = if rel_prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{rel_prefix}/{}", child.name)
        };
        if is_reserved(&rel_path) {
            continue;
        }

        let full = root.join(&rel_path);
        let meta = fs.lstat(&full)?;
        let entry = to_entry(fs, &full, &rel_path, &meta)?;
        let recurse = entry.is_directory();
        out.push(entry);

        if recurse {
            walk_into(fs, root, &rel_path, out)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::UnixFilesystem;

    #[test]
    fn walks_nested_directories_in_global_order() {
        let dir = tempfile::tempdir().unwrap();
        let fs = UnixFilesystem::new();
        fs.create_dir(&dir.path().join("ad")).unwrap();
        fs.create_dir(&dir.path().join("d")).unwrap();
        fs.create_for_write_truncate(&dir.path().join("b")).unwrap();
        fs.create_for_write_truncate(&dir.path().join("d/c")).unwrap();
        fs.symlink("c", &dir.path().join("d/link")).unwrap();

        let entries = walk_local_tree(&fs, dir.path()).unwrap();
        let paths: Vec<&str> = entries.iter().map(Entry::path).collect();
        assert_eq!(paths, vec!["ad/", "b", "d/", "d/c", "d/link"]);
    }

    #[test]
    fn reserved_state_directory_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let fs = UnixFilesystem::new();
        fs.create_dir(&dir.path().join(flist::RESERVED_STATE_DIR)).unwrap();
        fs.create_for_write_truncate(&dir.path().join("a")).unwrap();

        let entries = walk_local_tree(&fs, dir.path()).unwrap();
        let paths: Vec<&str> = entries.iter().map(Entry::path).collect();
        assert_eq!(paths, vec!["a"]);
    }

    #[test]
    fn missing_root_yields_an_empty_list() {
        let fs = UnixFilesystem::new();
        let entries = walk_local_tree(&fs, Path::new("/does/not/exist")).unwrap();
        assert!(entries.is_empty());
    }
}
