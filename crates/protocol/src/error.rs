/// Errors surfaced while framing, multiplexing, or negotiating the protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer sent bytes that don't parse as a valid frame or value.
    #[error("protocol framing error: {reason}")]
    FramingError {
        /// Human-readable description of what was malformed.
        reason: String,
    },

    /// The peer's negotiated protocol version is outside the supported range.
    #[error("unsupported protocol version {version} (need {min}..={max})")]
    UnsupportedVersion {
        /// Version the peer proposed.
        version: u32,
        /// Lowest version this client supports.
        min: u32,
        /// Highest version this client supports.
        max: u32,
    },

    /// The daemon greeting line did not start with `@RSYNCD:`.
    #[error("daemon sent an unrecognized greeting: {line:?}")]
    UnrecognizedGreeting {
        /// The raw line the daemon sent.
        line: String,
    },

    /// The daemon rejected the requested module or authentication.
    #[error("daemon rejected the request: {reason}")]
    DaemonRejected {
        /// The `@ERROR:` text the daemon sent.
        reason: String,
    },

    /// The transport underneath the protocol layer failed.
    #[error(transparent)]
    Channel(#[from] transport::ChannelError),

    /// The peer went silent for longer than the configured stall timeout.
    #[error("no data received from peer for {seconds}s")]
    Stalled {
        /// How long the stream waited before giving up.
        seconds: u64,
    },
}
