//! Cross-platform path validation (§4.7 PathValidator, §8 invariant 7).

/// Name of the directory reserved for internal session state; never
/// transferred and never listed.
pub const RESERVED_STATE_DIR: &str = ".acrosync";

const FORBIDDEN_BYTES: &[u8] = b"<>:\"/\\|?*";

fn byte_is_forbidden(b: u8) -> bool {
    b < 0x20 || b > 0x7e || FORBIDDEN_BYTES.contains(&b)
}

/// `true` if every byte of `component` is permitted in a cross-platform
/// filename: printable ASCII excluding control characters and
/// `<>:"/\|?*`.
#[must_use]
pub fn is_valid_component(component: &str) -> bool {
    component.bytes().all(|b| !byte_is_forbidden(b))
}

/// `true` if every `/`-separated component of `path` is individually valid.
#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    path.split('/').filter(|c| !c.is_empty()).all(is_valid_component)
}

/// `true` if `path` is, or is nested under, the reserved internal state
/// directory and must never be transferred or listed.
#[must_use]
pub fn is_reserved(path: &str) -> bool {
    let trimmed = path.trim_start_matches("./");
    trimmed == RESERVED_STATE_DIR
        || trimmed.starts_with(&format!("{RESERVED_STATE_DIR}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_printable_ascii_byte_outside_the_forbidden_set() {
        for b in 0x20u8..=0x7e {
            if FORBIDDEN_BYTES.contains(&b) {
                continue;
            }
            let s = String::from_utf8(vec![b]).unwrap();
            assert!(is_valid_component(&s), "byte {b:#04x} should be valid");
        }
    }

    #[test]
    fn rejects_every_forbidden_byte() {
        for &b in FORBIDDEN_BYTES {
            let s = String::from_utf8(vec![b]).unwrap();
            assert!(!is_valid_component(&s), "byte {b:#04x} should be rejected");
        }
        for b in 0u8..0x20 {
            let s = String::from_utf8(vec![b]).unwrap();
            assert!(!is_valid_component(&s));
        }
    }

    #[test]
    fn rejects_non_ascii_bytes() {
        assert!(!is_valid_component("café"));
    }

    #[test]
    fn flags_a_colon_in_a_filename() {
        assert!(!is_valid_path("dir/bad:name.txt"));
        assert!(is_valid_path("dir/good_name.txt"));
    }

    #[test]
    fn recognizes_the_reserved_state_directory() {
        assert!(is_reserved(".acrosync"));
        assert!(is_reserved(".acrosync/state.db"));
        assert!(is_reserved("./.acrosync/state.db"));
        assert!(!is_reserved("acrosync-notes.txt"));
    }
}
