//! Delta-transfer engine.
//!
//! [`DiffSender`] drives the upload side: given the generator's checksum
//! header for an old file, it finds literal and matched spans in a local
//! file and emits the rsync token stream. [`PatchReceiver`] drives the
//! download side: given that same token stream, it reconstructs the new
//! file from literal chunks and blocks copied out of the old one. Neither
//! type touches the filesystem directly beyond the handles it's given; see
//! the `platform` crate for that boundary and the `session` crate for how
//! the two sides are wired into a full transfer.

mod digest;
mod error;
mod receiver;
mod sender;

pub use error::EngineError;
pub use receiver::{PatchReceiver, ReceiveOutcome};
pub use sender::DiffSender;
