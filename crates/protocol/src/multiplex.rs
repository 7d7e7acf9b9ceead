//! Framed, optionally multiplexed stream on top of a [`ByteChannel`] (§4.2).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use transport::ByteChannel;

use crate::envelope::{
    FrameHeader, MSG_DATA, MSG_DELETED, MSG_ERROR, MSG_ERROR_XFER, MSG_INFO, MSG_IO_ERROR,
    MSG_NOOP, MSG_NO_SEND, MSG_SUCCESS, MSG_WARNING,
};
use crate::varint::{self, IndexCursor, INDEX_DONE};
use crate::ProtocolError;

/// How long a blocking read/write may sit idle before [`Stream`] gives up
/// with [`ProtocolError::Stalled`].
const STALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Poll granularity used while waiting on [`ByteChannel::readable`]/`writable`.
const POLL_MS: u32 = 50;

/// Width of the upload-pacing token bucket; one slot per second.
const BUCKET_WINDOW_SECS: usize = 8;

/// Lifecycle phase, matching the reference client's framing state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StreamPhase {
    Fresh,
    Unbuffered,
    Buffered,
    BufferedMultiplexed,
}

/// Shared flag a caller can set to abort any in-progress blocking operation.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not yet set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of any blocking [`Stream`] operation sharing this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Framed, optionally multiplexed, buffered codec over a [`ByteChannel`].
pub struct Stream<C: ByteChannel> {
    channel: C,
    cancel: CancellationFlag,
    phase: StreamPhase,
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
    read_data_remaining: u32,
    flush_start: usize,
    auto_flush: bool,
    read_index_cursor: IndexCursor,
    write_index_cursor: IndexCursor,
    upload_limit_kbps: u32,
    upload_buckets: VecDeque<(u64, usize)>,
    blocked_since: Option<Instant>,
    /// Raw payloads of `MSG_DELETED` frames received so far, oldest first.
    deleted: Vec<Vec<u8>>,
}

impl<C: ByteChannel> Stream<C> {
    /// Wraps `channel` in a fresh stream sharing `cancel` for abort signaling.
    pub fn new(channel: C, cancel: CancellationFlag) -> Self {
        Self {
            channel,
            cancel,
            phase: StreamPhase::Fresh,
            read_buf: VecDeque::new(),
            write_buf: Vec::new(),
            read_data_remaining: 0,
            flush_start: 0,
            auto_flush: true,
            read_index_cursor: IndexCursor::new(),
            write_index_cursor: IndexCursor::new(),
            upload_limit_kbps: 0,
            upload_buckets: VecDeque::new(),
            blocked_since: None,
            deleted: Vec::new(),
        }
    }

    /// Returns the stream to its initial, unbuffered, unmultiplexed state.
    pub fn reset(&mut self) {
        self.phase = StreamPhase::Unbuffered;
        self.read_buf.clear();
        self.write_buf.clear();
        self.read_data_remaining = 0;
        self.flush_start = 0;
        self.read_index_cursor = IndexCursor::new();
        self.write_index_cursor = IndexCursor::new();
        self.upload_buckets.clear();
        self.blocked_since = None;
        self.deleted.clear();
    }

    /// Enables read/write buffering (no multiplex framing yet).
    pub fn enable_buffer(&mut self) {
        if self.phase == StreamPhase::Fresh {
            self.phase = StreamPhase::Unbuffered;
        }
        self.phase = StreamPhase::Buffered;
    }

    /// Enables multiplex framing in both directions.
    ///
    /// The reference client turns on read demultiplexing and write framing
    /// together; this implementation does the same rather than modeling two
    /// independently toggled directions.
    pub fn enable_write_multiplex(&mut self) {
        self.phase = StreamPhase::BufferedMultiplexed;
    }

    /// Sets the upload rate limit in kilobytes per second (`0` disables pacing).
    pub fn set_upload_limit_kbps(&mut self, limit: u32) {
        self.upload_limit_kbps = limit;
    }

    /// Bytes-per-second cap configured via [`Self::set_upload_limit_kbps`].
    #[must_use]
    pub fn upload_limit_kbps(&self) -> u32 {
        self.upload_limit_kbps
    }

    /// Drains and returns the `MSG_DELETED` payloads collected so far.
    pub fn take_deleted(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.deleted)
    }

    /// Disables (or re-enables) the automatic blocking flush that normally
    /// follows every buffered `write()`.
    ///
    /// Callers that need to interleave non-blocking writes and reads (the
    /// download transfer loop's checksum/token interleave) turn this off
    /// and drive `try_flush_write_buffer` themselves.
    pub fn set_auto_flush(&mut self, enabled: bool) {
        self.auto_flush = enabled;
    }

    fn check_cancelled(&self) -> Result<(), ProtocolError> {
        if self.cancel.is_set() {
            return Err(ProtocolError::FramingError {
                reason: "operation cancelled".into(),
            });
        }
        Ok(())
    }

    fn note_blocked(&mut self) -> Result<(), ProtocolError> {
        self.check_cancelled()?;
        let since = *self.blocked_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= STALL_TIMEOUT {
            return Err(ProtocolError::Stalled {
                seconds: STALL_TIMEOUT.as_secs(),
            });
        }
        Ok(())
    }

    fn clear_blocked(&mut self) {
        self.blocked_since = None;
    }

    /// Reads at least one, at most `buf.len()`, bytes directly from the
    /// channel, polling and checking cancellation/stall while would-block.
    fn channel_read_some(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        loop {
            let n = self.channel.read(buf)?;
            if n > 0 {
                self.clear_blocked();
                return Ok(n);
            }
            self.note_blocked()?;
            self.channel.readable(POLL_MS)?;
        }
    }

    /// Reads exactly `out.len()` bytes directly from the channel, bypassing
    /// `read_buf` and any demultiplexing. Used for frame headers and inline
    /// (non-`MSG_DATA`) message payloads.
    fn raw_read_exact(&mut self, out: &mut [u8]) -> Result<(), ProtocolError> {
        let mut filled = 0;
        while filled < out.len() {
            filled += self.channel_read_some(&mut out[filled..])?;
        }
        Ok(())
    }

    fn raw_read_vec(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![0u8; len];
        self.raw_read_exact(&mut out)?;
        Ok(out)
    }

    fn handle_inline_frame(&mut self, header: FrameHeader) -> Result<(), ProtocolError> {
        match header.kind {
            MSG_INFO => {
                let text = self.raw_read_vec(header.len as usize)?;
                logging_sink::log(logging_sink::Level::Info, "rsync.peer", &String::from_utf8_lossy(&text));
            }
            MSG_WARNING => {
                let text = self.raw_read_vec(header.len as usize)?;
                logging_sink::log(logging_sink::Level::Warning, "rsync.peer", &String::from_utf8_lossy(&text));
            }
            MSG_ERROR | MSG_ERROR_XFER => {
                let text = self.raw_read_vec(header.len as usize)?;
                logging_sink::log(logging_sink::Level::Error, "rsync.peer", &String::from_utf8_lossy(&text));
            }
            MSG_IO_ERROR => {
                let text = self.raw_read_vec(header.len as usize)?;
                return Err(ProtocolError::FramingError {
                    reason: format!("remote I/O error: {}", String::from_utf8_lossy(&text)),
                });
            }
            MSG_DELETED => {
                let payload = self.raw_read_vec(header.len as usize)?;
                self.deleted.push(payload);
            }
            MSG_SUCCESS | MSG_NO_SEND | MSG_NOOP => {
                if header.len != 0 && header.len != 4 {
                    return Err(ProtocolError::FramingError {
                        reason: format!("tag {} carried unexpected length {}", header.kind, header.len),
                    });
                }
                if header.len > 0 {
                    self.raw_read_exact(&mut [0u8; 4])?;
                }
            }
            other => {
                return Err(ProtocolError::FramingError {
                    reason: format!("unhandled multiplex tag {other}"),
                })
            }
        }
        Ok(())
    }

    fn fill_read_buf(&mut self) -> Result<(), ProtocolError> {
        match self.phase {
            StreamPhase::Fresh | StreamPhase::Unbuffered => {
                let mut chunk = [0u8; 4096];
                let n = self.channel_read_some(&mut chunk)?;
                self.read_buf.extend(&chunk[..n]);
            }
            StreamPhase::Buffered => {
                let mut chunk = [0u8; 4096];
                let n = self.channel_read_some(&mut chunk)?;
                self.read_buf.extend(&chunk[..n]);
            }
            StreamPhase::BufferedMultiplexed => loop {
                if self.read_data_remaining == 0 {
                    let mut header_bytes = [0u8; 4];
                    self.raw_read_exact(&mut header_bytes)?;
                    let header = FrameHeader::decode(header_bytes).ok_or_else(|| {
                        ProtocolError::FramingError {
                            reason: "multiplex tag below MSG_BASE".into(),
                        }
                    })?;
                    if header.kind == MSG_DATA {
                        self.read_data_remaining = header.len;
                    } else {
                        self.handle_inline_frame(header)?;
                        continue;
                    }
                }
                let want = (self.read_data_remaining as usize).min(65536);
                let mut chunk = vec![0u8; want];
                let n = self.channel_read_some(&mut chunk)?;
                self.read_data_remaining -= n as u32;
                self.read_buf.extend(&chunk[..n]);
                return Ok(());
            },
        }
        Ok(())
    }

    /// Blocking read of exactly `buf.len()` payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on a channel failure, a malformed frame, a
    /// remote I/O error, cancellation, or a 600-second stall.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.read_buf.is_empty() {
                self.fill_read_buf()?;
                continue;
            }
            let n = self.read_buf.len().min(buf.len() - filled);
            for slot in &mut buf[filled..filled + n] {
                *slot = self.read_buf.pop_front().expect("checked non-empty above");
            }
            filled += n;
        }
        Ok(())
    }

    /// Buffers `buf` for later transmission (or writes through immediately
    /// when unbuffered).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FramingError`] if a non-atomic flush is
    /// currently in progress, or a channel error if writing through directly.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), ProtocolError> {
        if self.flush_start != 0 {
            return Err(ProtocolError::FramingError {
                reason: "write rejected while a partial flush is in progress".into(),
            });
        }
        match self.phase {
            StreamPhase::Fresh | StreamPhase::Unbuffered => self.write_through(buf),
            StreamPhase::Buffered | StreamPhase::BufferedMultiplexed => {
                self.write_buf.extend_from_slice(buf);
                if self.auto_flush {
                    self.flush_write_buffer(None)?;
                }
                Ok(())
            }
        }
    }

    fn write_through(&mut self, buf: &[u8]) -> Result<(), ProtocolError> {
        let mut sent = 0;
        while sent < buf.len() {
            self.pace_upload(buf.len() - sent)?;
            let n = self.channel.write(&buf[sent..])?;
            if n == 0 {
                self.note_blocked()?;
                self.channel.writable(POLL_MS)?;
                continue;
            }
            self.clear_blocked();
            self.record_upload(n);
            sent += n;
        }
        Ok(())
    }

    /// Blocking flush of the write buffer, prefixing a `MSG_DATA` tag (plus
    /// `extra` bytes of length accounting) when multiplexed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on channel failure, cancellation, or stall.
    pub fn flush_write_buffer(&mut self, extra: Option<u32>) -> Result<(), ProtocolError> {
        while !self.try_flush_write_buffer(extra)? {
            self.note_blocked()?;
            self.channel.writable(POLL_MS)?;
        }
        Ok(())
    }

    /// Attempts to flush the write buffer without blocking.
    ///
    /// Returns `true` once the entire framed payload (header plus body) is
    /// on the wire and the buffer has been reset; `false` if only partial
    /// progress was made, in which case state is preserved via `flush_start`
    /// for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on a channel failure.
    pub fn try_flush_write_buffer(&mut self, extra: Option<u32>) -> Result<bool, ProtocolError> {
        if self.write_buf.is_empty() && self.flush_start == 0 {
            return Ok(true);
        }

        let framed = self.framed_write_buffer(extra);
        while self.flush_start < framed.len() {
            self.pace_upload(framed.len() - self.flush_start)?;
            let n = self.channel.write(&framed[self.flush_start..])?;
            if n == 0 {
                return Ok(false);
            }
            self.clear_blocked();
            self.record_upload(n);
            self.flush_start += n;
        }

        self.write_buf.clear();
        self.flush_start = 0;
        Ok(true)
    }

    fn framed_write_buffer(&self, extra: Option<u32>) -> Vec<u8> {
        if self.phase != StreamPhase::BufferedMultiplexed {
            return self.write_buf.clone();
        }
        let len = self.write_buf.len() as u32 + extra.unwrap_or(0);
        let header = FrameHeader { kind: MSG_DATA, len }.encode();
        let mut framed = Vec::with_capacity(4 + self.write_buf.len());
        framed.extend_from_slice(&header);
        framed.extend_from_slice(&self.write_buf);
        framed
    }

    fn pace_upload(&mut self, about_to_send: usize) -> Result<(), ProtocolError> {
        if self.upload_limit_kbps == 0 {
            return Ok(());
        }
        let limit_bytes_per_sec = u64::from(self.upload_limit_kbps) * 1024;
        loop {
            let now_secs = self.current_bucket_second();
            self.evict_stale_buckets(now_secs);
            let sent_this_window: usize = self.upload_buckets.iter().map(|(_, n)| *n).sum();
            if (sent_this_window + about_to_send) as u64 <= limit_bytes_per_sec {
                return Ok(());
            }
            self.check_cancelled()?;
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn record_upload(&mut self, n: usize) {
        if self.upload_limit_kbps == 0 {
            return;
        }
        let second = self.current_bucket_second();
        if let Some(last) = self.upload_buckets.back_mut() {
            if last.0 == second {
                last.1 += n;
                return;
            }
        }
        self.upload_buckets.push_back((second, n));
        self.evict_stale_buckets(second);
    }

    fn evict_stale_buckets(&mut self, now_secs: u64) {
        while let Some(&(sec, _)) = self.upload_buckets.front() {
            if now_secs.saturating_sub(sec) as usize >= BUCKET_WINDOW_SECS {
                self.upload_buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn current_bucket_second(&self) -> u64 {
        static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_secs()
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let mut b = [0u8; 1];
        self.read(&mut b)?;
        Ok(b[0])
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.write(&[value])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let mut b = [0u8; 2];
        self.read(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    /// Writes a little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) -> Result<(), ProtocolError> {
        self.write(&value.to_le_bytes())
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let mut b = [0u8; 4];
        self.read(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    /// Writes a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.write(&value.to_le_bytes())
    }

    /// Reads a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut b = [0u8; 8];
        self.read(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    /// Writes a little-endian `i64`.
    pub fn write_i64(&mut self, value: i64) -> Result<(), ProtocolError> {
        self.write(&value.to_le_bytes())
    }

    /// Reads a protocol-30 `varint32`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FramingError`] if the lead byte implies an
    /// extension count outside `0..=4`.
    pub fn read_variable_i32(&mut self) -> Result<i32, ProtocolError> {
        let lead = self.read_u8()?;
        let ext = varint::varint32_extension_len(lead);
        let mut ext_bytes = vec![0u8; ext as usize];
        if ext > 0 {
            self.read(&mut ext_bytes)?;
        }
        varint::decode_varint32(lead, &ext_bytes)
    }

    /// Writes `value` as a protocol-30 `varint32`.
    pub fn write_variable_i32(&mut self, value: i32) -> Result<(), ProtocolError> {
        let bytes = varint::encode_varint32(value);
        self.write(&bytes)
    }

    /// Reads a protocol-30 `varint64` with a `min_bytes`-byte floor (file
    /// sizes use 3, modification times use 4).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FramingError`] if the lead byte implies a
    /// trailing-byte count that doesn't match what was actually read.
    pub fn read_variable_i64(&mut self, min_bytes: u8) -> Result<i64, ProtocolError> {
        let lead = self.read_u8()?;
        let ext = varint::varint64_extension_len(lead);
        let trailing = if ext == 7 {
            8
        } else {
            u32::from(min_bytes) + ext - 1
        };
        let mut rest = vec![0u8; trailing as usize];
        if trailing > 0 {
            self.read(&mut rest)?;
        }
        varint::decode_varint64(min_bytes, lead, &rest)
    }

    /// Writes `value` as a protocol-30 `varint64` with a `min_bytes`-byte floor.
    pub fn write_variable_i64(&mut self, value: i64, min_bytes: u8) -> Result<(), ProtocolError> {
        let bytes = varint::encode_varint64(value, min_bytes);
        self.write(&bytes)
    }

    /// Reads a delta- or absolute-coded index (`write_index`'s inverse).
    ///
    /// The sign channel (positive/negative index counters are tracked
    /// independently) is carried by a dedicated byte following the marker,
    /// so it never collides with a payload byte that happens to equal 0xff.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FramingError`] on a malformed marker/payload.
    pub fn read_index(&mut self) -> Result<i32, ProtocolError> {
        let marker = self.read_u8()?;
        if marker == 0 {
            return self.read_index_cursor.decode(0, true, &[]);
        }
        let sign_is_positive = self.read_u8()? != 0xff;
        let first_byte = self.read_u8()?;
        let payload_len = IndexCursor::payload_len(Some(first_byte));
        let mut payload = vec![first_byte];
        while payload.len() < payload_len {
            payload.push(self.read_u8()?);
        }
        self.read_index_cursor.decode(marker, sign_is_positive, &payload)
    }

    /// Writes `index` (or [`INDEX_DONE`]) using the delta-coded scheme.
    pub fn write_index(&mut self, index: i32) -> Result<(), ProtocolError> {
        let bytes = self.write_index_cursor.encode(index);
        if index == INDEX_DONE {
            return self.write(&bytes);
        }
        let sign_byte: u8 = if index >= 0 { 0x00 } else { 0xff };
        let mut framed = vec![bytes[0], sign_byte];
        framed.extend_from_slice(&bytes[1..]);
        self.write(&framed)
    }

    /// Reads a line terminated by LF, stripping any CR and the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on a channel failure before a terminator is seen.
    pub fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == b'\n' {
                break;
            }
            if b != b'\r' {
                line.push(b);
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Writes `line` followed by a trailing LF.
    pub fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.write(line.as_bytes())?;
        self.write(b"\n")
    }

    /// Flushes the underlying channel after any buffered flush completes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the final flush or channel flush fails.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.flush_write_buffer(None)?;
        self.channel.flush().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct MemChannel {
        inbound: Rc<RefCell<VecDeque<u8>>>,
        outbound: Rc<RefCell<Vec<u8>>>,
    }

    impl ByteChannel for MemChannel {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, transport::ChannelError> {
            let mut inbound = self.inbound.borrow_mut();
            let n = inbound.len().min(buf.len());
            for (i, slot) in buf.iter_mut().enumerate().take(n) {
                *slot = inbound.pop_front().unwrap();
                let _ = i;
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, transport::ChannelError> {
            self.outbound.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), transport::ChannelError> {
            Ok(())
        }

        fn readable(&mut self, _timeout_ms: u32) -> Result<bool, transport::ChannelError> {
            Ok(true)
        }

        fn writable(&mut self, _timeout_ms: u32) -> Result<bool, transport::ChannelError> {
            Ok(true)
        }

        fn closed(&mut self) -> bool {
            false
        }
    }

    fn fixed_width_round_trip(phase_buffered: bool, multiplexed: bool) {
        let channel = MemChannel::default();
        let outbound = channel.outbound.clone();
        let mut stream = Stream::new(channel, CancellationFlag::new());
        if phase_buffered {
            stream.enable_buffer();
        }
        if multiplexed {
            stream.enable_write_multiplex();
        }
        stream.write_i32(42).unwrap();
        stream.write_u16(7).unwrap();
        stream.flush().unwrap();

        let sent = outbound.borrow().clone();
        let reader_channel = MemChannel {
            inbound: Rc::new(RefCell::new(sent.into())),
            outbound: Rc::new(RefCell::new(Vec::new())),
        };
        let mut reader = Stream::new(reader_channel, CancellationFlag::new());
        if phase_buffered {
            reader.enable_buffer();
        }
        if multiplexed {
            reader.enable_write_multiplex();
        }
        assert_eq!(reader.read_i32().unwrap(), 42);
        assert_eq!(reader.read_u16().unwrap(), 7);
    }

    #[test]
    fn unbuffered_fixed_width_values_round_trip() {
        fixed_width_round_trip(false, false);
    }

    #[test]
    fn buffered_unmultiplexed_fixed_width_values_round_trip() {
        fixed_width_round_trip(true, false);
    }

    #[test]
    fn buffered_multiplexed_fixed_width_values_round_trip() {
        fixed_width_round_trip(true, true);
    }

    #[test]
    fn index_round_trips_through_write_and_read() {
        let channel = MemChannel::default();
        let outbound = channel.outbound.clone();
        let mut stream = Stream::new(channel, CancellationFlag::new());
        stream.enable_buffer();
        for index in [0i32, 1, 300, 70_000, INDEX_DONE] {
            stream.write_index(index).unwrap();
        }
        stream.flush().unwrap();

        let sent = outbound.borrow().clone();
        let reader_channel = MemChannel {
            inbound: Rc::new(RefCell::new(sent.into())),
            outbound: Rc::new(RefCell::new(Vec::new())),
        };
        let mut reader = Stream::new(reader_channel, CancellationFlag::new());
        reader.enable_buffer();
        for expected in [0i32, 1, 300, 70_000, INDEX_DONE] {
            assert_eq!(reader.read_index().unwrap(), expected);
        }
    }

    #[test]
    fn variable_i64_round_trips_through_write_and_read() {
        let channel = MemChannel::default();
        let outbound = channel.outbound.clone();
        let mut stream = Stream::new(channel, CancellationFlag::new());
        stream.enable_buffer();
        let values: [i64; 5] = [0, 1, 0xff, 0x00ff_ffff, i64::MAX];
        for &value in &values {
            stream.write_variable_i64(value, 3).unwrap();
        }
        stream.flush().unwrap();

        let sent = outbound.borrow().clone();
        let reader_channel = MemChannel {
            inbound: Rc::new(RefCell::new(sent.into())),
            outbound: Rc::new(RefCell::new(Vec::new())),
        };
        let mut reader = Stream::new(reader_channel, CancellationFlag::new());
        reader.enable_buffer();
        for &expected in &values {
            assert_eq!(reader.read_variable_i64(3).unwrap(), expected);
        }
    }

    #[test]
    fn line_round_trips_ignoring_carriage_return() {
        let channel = MemChannel::default();
        let outbound = channel.outbound.clone();
        let mut stream = Stream::new(channel, CancellationFlag::new());
        stream.write(b"hello\r\n").unwrap();
        stream.flush().unwrap();

        let sent = outbound.borrow().clone();
        let reader_channel = MemChannel {
            inbound: Rc::new(RefCell::new(sent.into())),
            outbound: Rc::new(RefCell::new(Vec::new())),
        };
        let mut reader = Stream::new(reader_channel, CancellationFlag::new());
        assert_eq!(reader.read_line().unwrap(), "hello");
    }

    #[test]
    fn multiplexed_inline_messages_are_consumed_without_surfacing_as_data() {
        let channel = MemChannel::default();
        let mut stream = Stream::new(channel, CancellationFlag::new());
        stream.enable_buffer();
        stream.enable_write_multiplex();

        let info = FrameHeader {
            kind: MSG_INFO,
            len: 5,
        }
        .encode();
        let data = FrameHeader {
            kind: MSG_DATA,
            len: 2,
        }
        .encode();
        {
            let mut inbound = stream.channel.inbound.borrow_mut();
            inbound.extend(info);
            inbound.extend(b"hello");
            inbound.extend(data);
            inbound.extend([9u8, 10u8]);
        }

        let mut out = [0u8; 2];
        stream.read(&mut out).unwrap();
        assert_eq!(out, [9, 10]);
    }
}
