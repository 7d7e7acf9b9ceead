use std::io::Read;

use checksums::RollingChecksum;
use protocol::{ProtocolError, Stream};
use signature::{BlockChecksum, ChecksumHeader, SignatureTable};
use transport::ByteChannel;

use crate::digest::WholeFileDigest;
use crate::error::EngineError;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Produces the diff token stream for one file being uploaded.
///
/// The checksum header and per-block checksums it reads come from the
/// remote generator; this side never computes them. `send_file` forwards
/// that header verbatim to the remote receiver before emitting tokens, so
/// the same physical stream carries both roles' traffic.
pub struct DiffSender {
    chunk_size: usize,
}

impl Default for DiffSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffSender {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Reads the generator's `iflags` and checksum header for `index`, and
    /// if the file is actually being transferred (`iflags & 0x8000`) and
    /// `source` is `Some`, streams the diff against it.
    ///
    /// Returns `Ok(true)` if the file was transmitted, `Ok(false)` if the
    /// generator marked it unchanged or `source` was `None` (the local open
    /// failed; the index is not forwarded in that case, matching the
    /// generator's own "skip" framing).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on a channel or local read failure, or if the
    /// generator set a flag this client doesn't support.
    pub fn send_file<C: ByteChannel, R: Read>(
        &mut self,
        stream: &mut Stream<C>,
        protocol_version: u32,
        seed: i32,
        index: i32,
        source: Option<R>,
    ) -> Result<bool, EngineError> {
        let iflags = stream.read_u16()?;

        let mut fnamecmp_type = 0u8;
        if iflags & 0x0800 != 0 {
            fnamecmp_type = stream.read_u8()?;
        }
        if iflags & 0x1000 != 0 {
            return Err(EngineError::Protocol(ProtocolError::FramingError {
                reason: "generator set an unsupported xname-follows flag".to_owned(),
            }));
        }

        let count = stream.read_i32()?;
        let block_length = stream.read_i32()?;
        let strong_length = stream.read_i32()?;
        let remainder = stream.read_i32()?;
        let header = ChecksumHeader {
            count,
            block_length,
            strong_length,
            remainder,
        };

        if iflags & 0x8000 == 0 {
            self.skip_checksum_list(stream, &header)?;
            return Ok(false);
        }

        let Some(mut source) = source else {
            self.skip_checksum_list(stream, &header)?;
            return Ok(false);
        };

        stream.write_index(index)?;
        stream.write_u16(iflags)?;
        if iflags & 0x0800 != 0 {
            stream.write_u8(fnamecmp_type)?;
        }
        stream.write_i32(count)?;
        stream.write_i32(block_length)?;
        stream.write_i32(strong_length)?;
        stream.write_i32(remainder)?;

        let mut digest = WholeFileDigest::new(protocol_version, seed);
        if header.count == 0 {
            self.send_literal_only(stream, &mut source, &mut digest)?;
        } else {
            let table = self.read_checksum_table(stream, &header)?;
            self.send_diff(stream, protocol_version, seed, &header, &table, &mut source, &mut digest)?;
        }

        stream.write_i32(0)?;
        stream.write(&digest.finalize())?;
        Ok(true)
    }

    fn skip_checksum_list<C: ByteChannel>(
        &self,
        stream: &mut Stream<C>,
        header: &ChecksumHeader,
    ) -> Result<(), EngineError> {
        let mut discard = vec![0u8; header.strong_length.max(0) as usize];
        for _ in 0..header.count {
            stream.read_i32()?;
            stream.read(&mut discard)?;
        }
        Ok(())
    }

    fn read_checksum_table<C: ByteChannel>(
        &self,
        stream: &mut Stream<C>,
        header: &ChecksumHeader,
    ) -> Result<SignatureTable, EngineError> {
        let strong_length = header.strong_length.max(0) as usize;
        let mut entries = Vec::with_capacity(header.count.max(0) as usize);
        for _ in 0..header.count {
            let weak = stream.read_i32()? as u32;
            let mut strong = [0u8; 16];
            stream.read(&mut strong[..strong_length])?;
            entries.push(BlockChecksum { weak, strong });
        }
        Ok(SignatureTable::build(entries))
    }

    fn send_literal_only<C: ByteChannel, R: Read>(
        &mut self,
        stream: &mut Stream<C>,
        source: &mut R,
        digest: &mut WholeFileDigest,
    ) -> Result<(), EngineError> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = fill(source, &mut buf)?;
            if n == 0 {
                break;
            }
            stream.write_i32(i32::try_from(n).unwrap_or(i32::MAX))?;
            stream.write(&buf[..n])?;
            digest.update(&buf[..n]);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn send_diff<C: ByteChannel, R: Read>(
        &mut self,
        stream: &mut Stream<C>,
        protocol_version: u32,
        seed: i32,
        header: &ChecksumHeader,
        table: &SignatureTable,
        source: &mut R,
        digest: &mut WholeFileDigest,
    ) -> Result<(), EngineError> {
        let block_length = header.block_length as usize;
        let capacity = block_length * 2;
        let mut buf = vec![0u8; capacity];

        let mut n = fill(source, &mut buf)?;
        digest.update(&buf[..n]);

        if n < block_length {
            if n > 0 {
                stream.write_i32(i32::try_from(n).unwrap_or(i32::MAX))?;
                stream.write(&buf[..n])?;
            }
            return Ok(());
        }

        let mut i = block_length;
        let mut roll = RollingChecksum::new();
        roll.update(&buf[..block_length]);

        loop {
            let mut matched_index = None;
            let mut matched_digest: Option<[u8; 16]> = None;
            for candidate in table.candidates(roll.value()) {
                let block = &buf[i - block_length..i];
                let bytes =
                    *matched_digest.get_or_insert_with(|| signature::strong_digest(protocol_version, block, seed));
                if bytes == table.get(candidate).strong {
                    matched_index = Some(candidate);
                    break;
                }
            }

            if let Some(index) = matched_index {
                if i > block_length {
                    let literal_len = i - block_length;
                    stream.write_i32(i32::try_from(literal_len).unwrap_or(i32::MAX))?;
                    stream.write(&buf[..literal_len])?;
                }
                stream.write_i32(-(i32::try_from(index).unwrap_or(i32::MAX)) - 1)?;
                buf.copy_within(i..n, 0);
                n -= i;
                i = 0;
            } else if i >= capacity {
                let literal_len = i - block_length;
                stream.write_i32(i32::try_from(literal_len).unwrap_or(i32::MAX))?;
                stream.write(&buf[..literal_len])?;
                buf.copy_within(literal_len..n, 0);
                n -= literal_len;
                i -= literal_len;
            }

            if i >= n || (i == 0 && n < block_length) {
                let more = fill(source, &mut buf[n..])?;
                digest.update(&buf[n..n + more]);
                n += more;

                if i >= n || (i == 0 && n < block_length) {
                    if n == 0 {
                        break;
                    }
                    if n == header.remainder as usize && !table.is_empty() {
                        let last = table.get(table.len() - 1);
                        let final_weak = signature::weak_checksum(&buf[..n]);
                        if final_weak == last.weak
                            && signature::strong_digest(protocol_version, &buf[..n], seed) == last.strong
                        {
                            stream.write_i32(-header.count)?;
                            break;
                        }
                    }
                    stream.write_i32(i32::try_from(n).unwrap_or(i32::MAX))?;
                    stream.write(&buf[..n])?;
                    break;
                }
            }

            if i == 0 {
                roll.update_from_block(&buf[..block_length]);
                i = block_length;
                continue;
            }

            roll.roll(buf[i - block_length], buf[i])?;
            i += 1;
        }

        Ok(())
    }
}

fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut total = 0;
    while total < buf.len() {
        match source.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
