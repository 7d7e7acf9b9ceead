//! rsync wire protocol framing, multiplexing, and handshakes (§4.1-4.2, §6).
//!
//! This crate owns everything that talks bytes on the wire: the multiplex
//! envelope, variable-length integer and index codecs, the buffered/framed
//! [`Stream`], and the two handshake flavors (SSH-exec and daemon). It knows
//! nothing about file lists or file contents; see the `flist` and `engine`
//! crates for those.

mod daemon_login;
mod envelope;
mod error;
mod multiplex;
mod negotiation;
mod varint;
mod version;

pub use daemon_login::{login as daemon_login, DaemonCredentials, DaemonHandshake};
pub use envelope::{
    FrameHeader, MSG_BASE, MSG_DATA, MSG_DELETED, MSG_ERROR, MSG_ERROR_XFER, MSG_INFO,
    MSG_IO_ERROR, MSG_NOOP, MSG_NO_SEND, MSG_SUCCESS, MSG_WARNING,
};
pub use error::ProtocolError;
pub use multiplex::{CancellationFlag, Stream};
pub use negotiation::{handshake, Handshake};
pub use varint::{
    decode_varint32, decode_varint64, encode_varint32, encode_varint64, varint64_extension_len,
    IndexCursor, INDEX_DONE,
};
pub use version::{negotiate, COMPAT_INCREMENTAL_RECURSION, MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
