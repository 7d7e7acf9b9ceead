//! Multiplexed message tags (§4.1, §6.1).

/// Base value added to a message kind before it is shifted into the top byte
/// of the 4-byte frame header.
pub const MSG_BASE: u32 = 7;

/// File data.
pub const MSG_DATA: u8 = 0;
/// Per-file transfer error (non-fatal, informational).
pub const MSG_ERROR_XFER: u8 = 1;
/// Informational message for the user.
pub const MSG_INFO: u8 = 2;
/// Error message for the user.
pub const MSG_ERROR: u8 = 3;
/// Warning message for the user.
pub const MSG_WARNING: u8 = 4;
/// Fatal I/O error on the remote side.
pub const MSG_IO_ERROR: u8 = 22;
/// No-op keepalive frame.
pub const MSG_NOOP: u8 = 42;
/// Operation succeeded (carries the index it refers to).
pub const MSG_SUCCESS: u8 = 100;
/// A path was deleted on the remote side.
pub const MSG_DELETED: u8 = 101;
/// The generator decided not to send a queued index.
pub const MSG_NO_SEND: u8 = 102;

/// A decoded multiplex frame header: message kind plus payload length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// One of the `MSG_*` constants.
    pub kind: u8,
    /// Number of payload bytes that follow.
    pub len: u32,
}

impl FrameHeader {
    /// Maximum payload length representable in the 24-bit length field.
    pub const MAX_LEN: u32 = 0x00ff_ffff;

    /// Packs `self` into the 4-byte little-endian-on-the-wire-but-big-endian-shifted
    /// header rsync uses: `((MSG_BASE + kind) << 24) | len`, transmitted as
    /// four raw bytes with the tag byte last (rsync writes it via `SIVAL`
    /// with the tag occupying the top byte).
    #[must_use]
    pub fn encode(self) -> [u8; 4] {
        let tag = (MSG_BASE + u32::from(self.kind)) << 24 | (self.len & Self::MAX_LEN);
        tag.to_le_bytes()
    }

    /// Decodes a 4-byte header previously produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns `None` if the encoded tag is below `MSG_BASE` (malformed).
    #[must_use]
    pub fn decode(bytes: [u8; 4]) -> Option<Self> {
        let raw = u32::from_le_bytes(bytes);
        let tag = raw >> 24;
        let len = raw & Self::MAX_LEN;
        let kind = tag.checked_sub(MSG_BASE)?;
        u8::try_from(kind).ok().map(|kind| Self { kind, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        for kind in [
            MSG_DATA,
            MSG_ERROR_XFER,
            MSG_INFO,
            MSG_ERROR,
            MSG_WARNING,
            MSG_IO_ERROR,
            MSG_NOOP,
            MSG_SUCCESS,
            MSG_DELETED,
            MSG_NO_SEND,
        ] {
            for len in [0u32, 1, 4096, FrameHeader::MAX_LEN] {
                let header = FrameHeader { kind, len };
                let decoded = FrameHeader::decode(header.encode()).unwrap();
                assert_eq!(decoded, header);
            }
        }
    }

    #[test]
    fn rejects_tag_below_msg_base() {
        let bytes = 0u32.to_le_bytes();
        assert!(FrameHeader::decode(bytes).is_none());
    }
}
