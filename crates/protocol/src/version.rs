//! Supported protocol version range and compatibility-flag bits (§9 Open
//! Question: this client negotiates down to 30 and refuses anything outside
//! {29, 30} rather than attempting newer wire formats it doesn't implement).

/// Lowest protocol version this client will negotiate.
pub const MIN_PROTOCOL_VERSION: u32 = 29;

/// Highest protocol version this client will negotiate. Peers proposing a
/// newer version are met with this value rather than their own, since the
/// client has nothing newer to speak.
pub const MAX_PROTOCOL_VERSION: u32 = 30;

/// Compatibility-flag bit for incremental recursion (protocol >= 30). This
/// client never requests it and treats a peer that requires it as fatal.
pub const COMPAT_INCREMENTAL_RECURSION: u8 = 0x01;

/// Picks the version both sides speak, clamped to the supported range.
///
/// Mirrors the reference behavior of `min(local, remote)`, except that a
/// `remote` above [`MAX_PROTOCOL_VERSION`] is treated as if the remote had
/// proposed [`MAX_PROTOCOL_VERSION`] (this client has nothing newer to
/// offer), and a `remote` below [`MIN_PROTOCOL_VERSION`] is rejected.
///
/// # Errors
///
/// Returns [`crate::ProtocolError::UnsupportedVersion`] if the negotiated
/// version would fall outside `{29, 30}`.
pub fn negotiate(remote: u32) -> Result<u32, crate::ProtocolError> {
    let remote = remote.min(MAX_PROTOCOL_VERSION);
    if remote < MIN_PROTOCOL_VERSION {
        return Err(crate::ProtocolError::UnsupportedVersion {
            version: remote,
            min: MIN_PROTOCOL_VERSION,
            max: MAX_PROTOCOL_VERSION,
        });
    }
    Ok(remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_newer_peers_down_to_max_supported() {
        assert_eq!(negotiate(31).unwrap(), MAX_PROTOCOL_VERSION);
        assert_eq!(negotiate(99).unwrap(), MAX_PROTOCOL_VERSION);
    }

    #[test]
    fn accepts_the_supported_range_unchanged() {
        assert_eq!(negotiate(29).unwrap(), 29);
        assert_eq!(negotiate(30).unwrap(), 30);
    }

    #[test]
    fn rejects_peers_older_than_the_minimum() {
        assert!(negotiate(28).is_err());
    }
}
