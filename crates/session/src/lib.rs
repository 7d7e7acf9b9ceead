//! Client-side session driver: handshake dispatch, list reconciliation, and
//! transfer orchestration for one rsync operation (§4.8).
//!
//! This crate wires together `protocol` (wire framing and negotiation),
//! `flist` (file-list records and ordering), `engine` (delta transfer), and
//! `platform` (local filesystem access) into the handful of operations a
//! caller actually invokes: download, upload, remove, mkdir, link, and
//! listModules.

mod config;
mod driver;
mod error;
mod reconciler;
mod walker;

pub use config::{ClientConfig, ClientConfigBuilder, Stats, PROTOCOL_CEILING};
pub use driver::{build_remote_command, list_modules, SessionDriver};
pub use error::SessionError;
pub use reconciler::{reconcile, sweep_deletions};
pub use walker::walk_local_tree;

pub use protocol::{CancellationFlag, DaemonCredentials};

/// Callbacks the driver invokes synchronously on its driving thread (§6.4).
///
/// Implementations must not block indefinitely; the stall watchdog has no
/// way to interrupt a callback that never returns.
pub trait Callbacks {
    /// Called once per entry that was created, updated, or listed.
    fn entry_out(&mut self, path: &str, is_dir: bool, size: i64, time: i64, symlink: Option<&str>);

    /// A human-readable progress line (mirrors `--out-format=%n`).
    fn status_out(&mut self, message: &str) {
        let _ = message;
    }

    /// Asked to accept or reject an unrecognized SSH host key. Returning
    /// `false` aborts the connection attempt.
    fn host_key_out(&mut self, server: &str, fingerprint_hex: &str) -> bool {
        let _ = (server, fingerprint_hex);
        true
    }
}

/// A [`Callbacks`] implementation that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCallbacks;

impl Callbacks for NullCallbacks {
    fn entry_out(&mut self, _path: &str, _is_dir: bool, _size: i64, _time: i64, _symlink: Option<&str>) {}
}
