//! Byte channels the protocol layer can frame on top of.
//!
//! Two concrete transports: a plain TCP socket (rsync daemon mode) and an
//! SSH exec channel (`rsync --server ...`, the common case). Both implement
//! [`ByteChannel`], the only interface the rest of the crate depends on.

mod error;
mod socket;
mod ssh;

pub use error::ChannelError;
pub use socket::SocketChannel;
pub use ssh::SshChannel;

/// A bidirectional, pollable byte channel to an rsync peer.
///
/// # Errors
///
/// All methods return [`ChannelError`]; `read`/`write` returning `Ok(0)`
/// means "would block, try again", not EOF — callers detect peer close via
/// [`Self::closed`].
pub trait ByteChannel {
    /// Reads up to `buf.len()` bytes. Returns `0` if nothing is currently
    /// available without blocking.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError>;

    /// Writes up to `buf.len()` bytes. Returns `0` if the channel is not
    /// currently writable.
    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError>;

    /// Flushes any internally buffered bytes to the underlying transport.
    fn flush(&mut self) -> Result<(), ChannelError>;

    /// Blocks up to `timeout_ms` waiting for the channel to become readable.
    fn readable(&mut self, timeout_ms: u32) -> Result<bool, ChannelError>;

    /// Blocks up to `timeout_ms` waiting for the channel to become writable.
    fn writable(&mut self, timeout_ms: u32) -> Result<bool, ChannelError>;

    /// Returns `true` once the peer has closed the channel.
    fn closed(&mut self) -> bool;
}
