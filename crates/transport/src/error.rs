/// Errors a [`crate::ByteChannel`] can report.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer closed the connection.
    #[error("channel closed by peer")]
    Closed,

    /// A socket-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An SSH-level failure (handshake, channel open, auth).
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// The remote host key did not match and the caller declined to accept it.
    #[error("host key for {server} was rejected")]
    HostKeyRejected {
        /// Server the key was presented for.
        server: String,
    },

    /// SSH authentication failed for every offered method.
    #[error("SSH authentication failed for user {user}")]
    AuthenticationFailed {
        /// The username authentication was attempted for.
        user: String,
    },
}
