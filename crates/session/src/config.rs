//! Client configuration (§10.3) and the supplemented speed-limit/backup-path/
//! selective-sync/stats surface carried over from `original_source/` (§10.5).

use std::collections::HashSet;

/// Protocol ceiling this client ever advertises; negotiation may still land
/// lower if the peer proposes an older version (§9 Open Question 4).
pub const PROTOCOL_CEILING: u32 = 30;

/// Immutable configuration for one [`crate::SessionDriver`] operation,
/// assembled via [`ClientConfigBuilder`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub(crate) protocol_ceiling: u32,
    pub(crate) download_limit_kbps: u32,
    pub(crate) upload_limit_kbps: u32,
    pub(crate) deleting: bool,
    pub(crate) backup_paths: Vec<String>,
    pub(crate) intermediate_template: String,
    pub(crate) include_only: Option<HashSet<String>>,
}

impl ClientConfig {
    /// Starts building a [`ClientConfig`] with the reference defaults (no
    /// speed limits, no deletion, no backup paths, whole tree included).
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Protocol version ceiling advertised during the handshake.
    #[must_use]
    pub fn protocol_ceiling(&self) -> u32 {
        self.protocol_ceiling
    }

    /// `--bwlimit=K` applied to the remote command when downloading.
    #[must_use]
    pub fn download_limit_kbps(&self) -> u32 {
        self.download_limit_kbps
    }

    /// Local upload token-bucket pacer limit, in kilobytes per second.
    #[must_use]
    pub fn upload_limit_kbps(&self) -> u32 {
        self.upload_limit_kbps
    }

    /// Whether the operation should delete local entries absent remotely.
    #[must_use]
    pub fn deleting(&self) -> bool {
        self.deleting
    }

    /// Remote `--link-dest=P` alternate-base directories, in order.
    #[must_use]
    pub fn backup_paths(&self) -> &[String] {
        &self.backup_paths
    }

    /// `{}`-style template for the intermediate download file name.
    #[must_use]
    pub fn intermediate_template(&self) -> &str {
        &self.intermediate_template
    }

    /// Restricts the operation to these relative paths, if set.
    #[must_use]
    pub fn include_only(&self) -> Option<&HashSet<String>> {
        self.include_only.as_ref()
    }
}

/// Builder for [`ClientConfig`]; see [`ClientConfig::builder`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientConfigBuilder {
    protocol_ceiling: Option<u32>,
    download_limit_kbps: u32,
    upload_limit_kbps: u32,
    deleting: bool,
    backup_paths: Vec<String>,
    intermediate_template: Option<String>,
    include_only: Option<HashSet<String>>,
}

impl ClientConfigBuilder {
    /// Caps the protocol version this client advertises; always clamped to
    /// [`PROTOCOL_CEILING`] regardless of what's requested here.
    #[must_use]
    pub fn protocol_ceiling(mut self, version: u32) -> Self {
        self.protocol_ceiling = Some(version.min(PROTOCOL_CEILING));
        self
    }

    /// Sets the download speed limit, surfaced as `--bwlimit=K` on the
    /// remote command.
    #[must_use]
    #[doc(alias = "--bwlimit")]
    pub const fn download_limit_kbps(mut self, limit: u32) -> Self {
        self.download_limit_kbps = limit;
        self
    }

    /// Sets the upload speed limit, enforced locally by the stream's
    /// token-bucket pacer.
    #[must_use]
    pub const fn upload_limit_kbps(mut self, limit: u32) -> Self {
        self.upload_limit_kbps = limit;
        self
    }

    /// Enables deletion of local entries absent from the remote list.
    #[must_use]
    #[doc(alias = "--delete-during")]
    pub const fn deleting(mut self, deleting: bool) -> Self {
        self.deleting = deleting;
        self
    }

    /// Appends a remote alternate-base directory.
    #[must_use]
    #[doc(alias = "--link-dest")]
    pub fn add_backup_path(mut self, path: impl Into<String>) -> Self {
        self.backup_paths.push(path.into());
        self
    }

    /// Clears any previously added backup paths.
    #[must_use]
    pub fn clear_backup_paths(mut self) -> Self {
        self.backup_paths.clear();
        self
    }

    /// Sets the template used to name the intermediate download file before
    /// it's committed by [`platform::PartialKeeper`] (e.g. `".{}.tmp"`,
    /// formatted with the destination's file name).
    #[must_use]
    pub fn intermediate_template(mut self, template: impl Into<String>) -> Self {
        self.intermediate_template = Some(template.into());
        self
    }

    /// Restricts the operation to this set of remote-relative paths.
    #[must_use]
    pub fn include_only(mut self, paths: HashSet<String>) -> Self {
        self.include_only = Some(paths);
        self
    }

    /// Finalizes the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            protocol_ceiling: self.protocol_ceiling.unwrap_or(PROTOCOL_CEILING).min(PROTOCOL_CEILING),
            download_limit_kbps: self.download_limit_kbps,
            upload_limit_kbps: self.upload_limit_kbps,
            deleting: self.deleting,
            backup_paths: self.backup_paths,
            intermediate_template: self.intermediate_template.unwrap_or_else(|| ".{}.rrsync-tmp".to_string()),
            include_only: self.include_only,
        }
    }
}

/// Running byte counters for one transfer, readable after (or during) an
/// operation, matching `setStatsAddresses` in the original client.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Bytes that would have been sent with no delta compression.
    pub logical_bytes: u64,
    /// Bytes actually placed on the wire.
    pub physical_bytes: u64,
    /// Sum of all file sizes considered by the operation.
    pub total_bytes: u64,
    /// Bytes belonging to entries judged up to date and left untouched.
    pub skipped_bytes: u64,
}

impl Stats {
    pub(crate) fn add_logical(&mut self, n: u64) {
        self.logical_bytes += n;
    }

    pub(crate) fn add_physical(&mut self, n: u64) {
        self.physical_bytes += n;
    }

    pub(crate) fn add_total(&mut self, n: u64) {
        self.total_bytes += n;
    }

    pub(crate) fn add_skipped(&mut self, n: u64) {
        self.skipped_bytes += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_ceiling_is_clamped_even_when_a_higher_value_is_requested() {
        let config = ClientConfig::builder().protocol_ceiling(32).build();
        assert_eq!(config.protocol_ceiling(), PROTOCOL_CEILING);
    }

    #[test]
    fn defaults_have_no_limits_or_backup_paths() {
        let config = ClientConfig::builder().build();
        assert_eq!(config.download_limit_kbps(), 0);
        assert_eq!(config.upload_limit_kbps(), 0);
        assert!(config.backup_paths().is_empty());
        assert!(!config.deleting());
    }

    #[test]
    fn backup_paths_accumulate_in_order() {
        let config = ClientConfig::builder()
            .add_backup_path("/snap/1")
            .add_backup_path("/snap/2")
            .build();
        assert_eq!(config.backup_paths(), ["/snap/1", "/snap/2"]);
    }
}
