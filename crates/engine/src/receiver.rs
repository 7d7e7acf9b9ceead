use std::io::Write;

use platform::{FileHandle, SeekFrom};
use protocol::{ProtocolError, Stream};
use transport::ByteChannel;

use crate::digest::WholeFileDigest;
use crate::error::EngineError;

/// Outcome of a [`PatchReceiver::receive_file`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReceiveOutcome {
    /// The generator marked this file as unchanged; no bytes followed.
    NotTransmitted,
    /// The file was reconstructed from `new_file`.
    Received {
        /// Total bytes written to `new_file`.
        file_size: i64,
    },
}

/// Reconstructs a downloaded file from the sender's token stream, copying
/// literal chunks verbatim and matched blocks from the previously-open old
/// version of the same file.
#[derive(Default)]
pub struct PatchReceiver;

impl PatchReceiver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Reads `iflags` and the checksum header this client itself sent
    /// earlier (echoed back by the sender), then drains the token stream
    /// into `new_file`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChecksumMismatch`] if the whole-file digest
    /// the sender appends doesn't match what was reconstructed, and
    /// propagates channel, filesystem, or local I/O failures otherwise.
    pub fn receive_file<C: ByteChannel, Old: FileHandle, W: Write>(
        &mut self,
        stream: &mut Stream<C>,
        protocol_version: u32,
        seed: i32,
        mut old_file: Option<&mut Old>,
        mut new_file: W,
    ) -> Result<ReceiveOutcome, EngineError> {
        let iflags = stream.read_u16()?;
        if iflags & 0x8000 == 0 {
            return Ok(ReceiveOutcome::NotTransmitted);
        }

        let _count = stream.read_i32()?;
        let block_length = stream.read_i32()?;
        let _strong_length = stream.read_i32()?;
        let _remainder = stream.read_i32()?;

        let mut digest = WholeFileDigest::new(protocol_version, seed);
        let mut file_size: i64 = 0;
        let mut previous_block: Option<i32> = None;
        let block_len = block_length.max(1) as usize;
        let mut chunk = vec![0u8; block_len];

        loop {
            let token = stream.read_i32()?;
            if token == 0 {
                break;
            }

            if token > 0 {
                let len = token as usize;
                if chunk.len() < len {
                    chunk.resize(len, 0);
                }
                stream.read(&mut chunk[..len])?;
                new_file.write_all(&chunk[..len])?;
                digest.update(&chunk[..len]);
                file_size += i64::from(token);
            } else {
                let block = -token - 1;
                let file = old_file.as_mut().ok_or_else(|| {
                    EngineError::Protocol(ProtocolError::FramingError {
                        reason: "sender referenced an old-file block but no base file is open".to_owned(),
                    })
                })?;

                if previous_block != Some(block) {
                    let offset = i64::from(block) * i64::from(block_length);
                    file.seek(SeekFrom::Start(offset.max(0) as u64))?;
                }

                let n = read_some(file, &mut chunk[..block_len])?;
                new_file.write_all(&chunk[..n])?;
                digest.update(&chunk[..n]);
                file_size += n as i64;
                previous_block = Some(block + 1);
            }
        }

        let local_digest = digest.finalize();
        let mut remote_digest = [0u8; 16];
        stream.read(&mut remote_digest)?;
        if local_digest != remote_digest {
            return Err(EngineError::ChecksumMismatch);
        }

        Ok(ReceiveOutcome::Received { file_size })
    }
}

fn read_some<R: std::io::Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut total = 0;
    while total < buf.len() {
        match source.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
