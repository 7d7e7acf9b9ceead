/// Errors surfaced by the diff engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A wire-level framing or channel failure.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    /// A local filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] platform::FsError),

    /// Reading from or writing to a plain local file (not routed through
    /// [`platform::Filesystem`]) failed.
    #[error("local file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The whole-file digest the peer sent didn't match what was
    /// reconstructed locally.
    #[error("checksum mismatch after receiving file")]
    ChecksumMismatch,

    /// The rolling-checksum window was used inconsistently (empty window
    /// rolled, or a window too large to represent in 32 bits).
    #[error(transparent)]
    Rolling(#[from] checksums::RollingError),
}
