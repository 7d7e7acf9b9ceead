//! Incremental file-list codec, entry comparison, and path validation (§3, §4.3, §4.7).
//!
//! This crate knows the shape of one file-list record and how to compare
//! and validate paths; it has no opinion on how the list as a whole is
//! reconciled against the local filesystem (see the `session` crate's
//! `ListReconciler`) or how file contents move (see `engine`).

mod codec;
mod compare;
mod entry;
mod path;

pub use codec::EntryCodec;
pub use compare::{compare_by_local_name, compare_globally, compare_locally};
pub use entry::{
    Entry, IS_ALL_EXECUTABLE, IS_ALL_READABLE, IS_DIR, IS_EXECUTABLE, IS_FILE, IS_LINK,
    IS_READABLE, IS_WRITABLE,
};
pub use path::{is_reserved, is_valid_component, is_valid_path, RESERVED_STATE_DIR};
