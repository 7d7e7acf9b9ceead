//! Entry ordering (§8 invariant 3). All three comparators are a direct
//! transcription of the reference client's byte-level string comparison,
//! since the wire protocol and the reconciler both depend on lists being
//! sorted identically on both ends.

use crate::entry::Entry;

/// Orders two entries believed to share a parent directory: directories
/// sort before files, then lexicographically by path.
#[must_use]
pub fn compare_locally(lhs: &Entry, rhs: &Entry) -> std::cmp::Ordering {
    match (lhs.is_directory(), rhs.is_directory()) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => lhs.path().cmp(rhs.path()),
    }
}

/// Same ordering as [`compare_locally`] but operating on raw path strings,
/// using a trailing `/` as the directory signal.
#[must_use]
pub fn compare_by_local_name(lhs: &str, rhs: &str) -> std::cmp::Ordering {
    let lhs_dir = lhs.ends_with('/');
    let rhs_dir = rhs.ends_with('/');
    match (lhs_dir, rhs_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => lhs.cmp(rhs),
    }
}

/// Orders two entries by full path, treating a directory's implicit
/// trailing separator as sorting before any sibling file that shares the
/// same prefix (`dir/` before `dir-suffix`, but after `dir` itself).
#[must_use]
pub fn compare_globally(lhs: &Entry, rhs: &Entry) -> std::cmp::Ordering {
    let p1 = lhs.path().as_bytes();
    let p2 = rhs.path().as_bytes();

    let mut i = 0;
    while i < p1.len() && i < p2.len() && p1[i] == p2[i] {
        i += 1;
    }

    let b1 = p1.get(i).copied();
    let b2 = p2.get(i).copied();
    if b1 == b2 {
        return std::cmp::Ordering::Equal;
    }

    let rest1_has_slash = p1[i..].contains(&b'/');
    let rest2_has_slash = p2[i..].contains(&b'/');

    match (b1, b2) {
        // `p1` ended exactly at the mismatch: its "rest" scan is empty, so
        // the reference logic always treats the shorter path as lesser.
        (None, _) => std::cmp::Ordering::Less,
        (_, None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) if a < b => {
            if rest1_has_slash && !rest2_has_slash {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Less
            }
        }
        (Some(_), Some(_)) => {
            if rest2_has_slash && !rest1_has_slash {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> Entry {
        Entry::new(path, false, 0, 0, 0)
    }

    fn dir(path: &str) -> Entry {
        Entry::new(path, true, 0, 0, 0)
    }

    #[test]
    fn compare_globally_matches_the_documented_ordering() {
        let mut paths = vec!["x", "d/c/f", "d/", "d/e", "ad/", "ad/ef", "b", "f", "d/c/", "d/c"];
        let mut entries: Vec<Entry> = paths
            .drain(..)
            .map(|p| {
                if p.ends_with('/') {
                    dir(p)
                } else {
                    file(p)
                }
            })
            .collect();
        entries.sort_by(compare_globally);
        let sorted: Vec<&str> = entries.iter().map(Entry::path).collect();
        assert_eq!(
            sorted,
            vec!["b", "f", "x", "ad/", "ad/ef", "d/", "d/c", "d/e", "d/c/", "d/c/f"]
        );
    }

    #[test]
    fn compare_locally_orders_directories_before_files() {
        assert_eq!(compare_locally(&dir("z"), &file("a")), std::cmp::Ordering::Less);
        assert_eq!(compare_locally(&file("a"), &dir("z")), std::cmp::Ordering::Greater);
        assert_eq!(compare_locally(&file("a"), &file("b")), std::cmp::Ordering::Less);
    }

    #[test]
    fn compare_by_local_name_uses_trailing_slash_as_directory_signal() {
        assert_eq!(compare_by_local_name("z/", "a"), std::cmp::Ordering::Less);
        assert_eq!(compare_by_local_name("a", "z/"), std::cmp::Ordering::Greater);
    }
}
