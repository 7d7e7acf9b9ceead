//! SSH-mode protocol handshake: version exchange, compatibility flag, and
//! checksum seed (§9 SessionDriver step 2-4).

use transport::ByteChannel;

use crate::multiplex::Stream;
use crate::version::{negotiate, COMPAT_INCREMENTAL_RECURSION, MAX_PROTOCOL_VERSION};
use crate::ProtocolError;

/// Result of a completed SSH-mode handshake.
pub struct Handshake {
    /// Version both sides agreed to speak.
    pub version: u32,
    /// Checksum seed the peer generated for this session.
    pub checksum_seed: i32,
}

/// Exchanges protocol-version integers, rejects incremental recursion, and
/// reads the checksum seed, leaving `stream` ready for `enable_buffer()`.
///
/// # Errors
///
/// Returns [`ProtocolError::UnsupportedVersion`] if negotiation falls
/// outside `{29, 30}`, or [`ProtocolError::FramingError`] if the peer
/// requires incremental recursion.
pub fn handshake<C: ByteChannel>(stream: &mut Stream<C>) -> Result<Handshake, ProtocolError> {
    stream.write_i32(MAX_PROTOCOL_VERSION as i32)?;
    let remote_version = stream.read_i32()?;
    let version = negotiate(u32::try_from(remote_version).unwrap_or(0))?;

    if version >= 30 {
        let compat = stream.read_u8()?;
        if compat & COMPAT_INCREMENTAL_RECURSION != 0 {
            return Err(ProtocolError::FramingError {
                reason: "peer requires incremental recursion, which this client does not support".into(),
            });
        }
    }

    let checksum_seed = stream.read_i32()?;
    Ok(Handshake {
        version,
        checksum_seed,
    })
}
