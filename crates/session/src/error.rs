/// Top-level error returned by [`crate::SessionDriver`] operations.
///
/// Wraps every lower-layer error type plus the session-level taxonomy
/// (§7): a fatal error unwinds the current operation; [`platform::PartialKeeper`]
/// and other scoped acquisitions still run their release policy on the way out.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A wire-level framing, negotiation, or handshake failure.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    /// The underlying transport failed or the peer closed the connection.
    #[error(transparent)]
    Channel(#[from] transport::ChannelError),

    /// A local filesystem operation failed outside of a per-entry context
    /// (e.g. enumerating the local tree, or a base file required to proceed).
    #[error(transparent)]
    Fs(#[from] platform::FsError),

    /// The delta-transfer engine failed in a way that isn't a retryable
    /// checksum mismatch (see [`Self::ChecksumMismatch`]).
    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    /// The whole-file digest didn't match after a transfer attempt. Not
    /// fatal to the session: the caller enqueues the entry for a phase-1
    /// retry with an empty base file.
    #[error("checksum mismatch reconstructing {path}")]
    ChecksumMismatch {
        /// Remote-relative path of the file that failed to reconstruct.
        path: String,
    },

    /// The remote peer reported an I/O error (`MSG_IO_ERROR`).
    #[error("remote I/O error: {reason}")]
    RemoteIoError {
        /// Text the peer sent with the error.
        reason: String,
    },

    /// The negotiated protocol version or compatibility flags are
    /// unsupported by this client.
    #[error("protocol mismatch: {reason}")]
    ProtocolMismatch {
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A log record at [`logging_sink::Level::Fatal`] or above was emitted;
    /// the current operation cannot continue.
    #[error("fatal: {message}")]
    Fatal {
        /// Stable call-site identifier.
        id: &'static str,
        /// The message that was logged.
        message: String,
    },

    /// The caller's cancellation flag was observed during a blocking wait.
    #[error("operation cancelled")]
    Cancelled,

    /// No progress was made for the stall timeout window.
    #[error("operation timed out after {seconds}s of no progress")]
    Timeout {
        /// Length of the stall window.
        seconds: u64,
    },
}

impl SessionError {
    pub(crate) fn from_protocol(err: protocol::ProtocolError) -> Self {
        match err {
            protocol::ProtocolError::Stalled { seconds } => Self::Timeout { seconds },
            protocol::ProtocolError::UnsupportedVersion { version, min, max } => Self::ProtocolMismatch {
                reason: format!("peer proposed protocol {version}, supported range is {min}..={max}"),
            },
            protocol::ProtocolError::FramingError { ref reason } if reason == "operation cancelled" => {
                Self::Cancelled
            }
            protocol::ProtocolError::FramingError { reason } if reason.starts_with("remote I/O error: ") => {
                Self::RemoteIoError {
                    reason: reason["remote I/O error: ".len()..].to_string(),
                }
            }
            other => Self::Protocol(other),
        }
    }

    pub(crate) fn from_engine(err: engine::EngineError) -> Self {
        match err {
            engine::EngineError::Protocol(inner) => Self::from_protocol(inner),
            engine::EngineError::ChecksumMismatch => Self::ChecksumMismatch { path: String::new() },
            other => Self::Engine(other),
        }
    }
}
