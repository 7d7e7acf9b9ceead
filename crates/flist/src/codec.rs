//! Incremental file-list entry codec (§4.3): XFLAGS compression, same-name
//! prefix sharing, and the size/time/mode inheritance rules shared with the
//! reference client's file-list wire format.

use protocol::{ProtocolError, Stream};
use transport::ByteChannel;

use crate::entry::{Entry, IS_LINK};

const XMIT_TOP_DIR: u16 = 0x01;
const XMIT_SAME_MODE: u16 = 0x02;
const XMIT_EXTENDED_FLAGS: u16 = 0x04;
const XMIT_SAME_UID: u16 = 0x08;
const XMIT_SAME_GID: u16 = 0x10;
const XMIT_SAME_NAME: u16 = 0x20;
const XMIT_LONG_NAME: u16 = 0x40;
const XMIT_SAME_TIME: u16 = 0x80;
const XMIT_NO_CONTENT_DIR: u16 = 0x100;
const XMIT_IO_ERROR_ENDLIST: u16 = 0x1000;

const MAX_SAME_NAME_PREFIX: usize = 255;
const SIZE_MIN_BYTES: u8 = 3;
const TIME_MIN_BYTES: u8 = 4;

/// Encodes and decodes one side of a file-list stream, tracking the
/// previous entry's path/mode/time for XFLAGS-driven inheritance.
pub struct EntryCodec {
    protocol_version: u32,
    last_path: String,
    last_mode: u32,
    last_time: i64,
}

impl EntryCodec {
    #[must_use]
    pub fn new(protocol_version: u32) -> Self {
        Self {
            protocol_version,
            last_path: String::new(),
            last_mode: 0,
            last_time: 0,
        }
    }

    fn common_prefix_len(&self, path: &str) -> usize {
        self.last_path
            .as_bytes()
            .iter()
            .zip(path.as_bytes())
            .take_while(|(a, b)| a == b)
            .count()
            .min(MAX_SAME_NAME_PREFIX)
    }

    /// Sends one entry, or the terminating zero-flags marker if `entry` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on a channel failure.
    pub fn send_entry<C: ByteChannel>(
        &mut self,
        stream: &mut Stream<C>,
        entry: &Entry,
        is_top: bool,
        no_dir_content: bool,
    ) -> Result<(), ProtocolError> {
        let mut path_owned;
        let path: &str = if entry.is_directory() && !entry.path().ends_with('/') {
            path_owned = entry.path().to_string();
            path_owned.push('/');
            &path_owned
        } else {
            entry.path()
        };
        let prefix_len = if self.last_path.is_empty() {
            0
        } else {
            self.common_prefix_len(path)
        };
        let suffix = &path[prefix_len..];

        let same_time = entry.time() == self.last_time;
        let same_mode = entry.mode() == self.last_mode;
        let same_name = prefix_len > 0;
        let long_name = suffix.len() > 255;

        let mut attr_flags = XMIT_SAME_UID | XMIT_SAME_GID;
        if same_time {
            attr_flags |= XMIT_SAME_TIME;
        }
        if same_mode {
            attr_flags |= XMIT_SAME_MODE;
        }
        if same_name {
            attr_flags |= XMIT_SAME_NAME;
        }
        if long_name {
            attr_flags |= XMIT_LONG_NAME;
        }
        if is_top || (!entry.is_directory() && attr_flags == 0) {
            attr_flags |= XMIT_TOP_DIR;
        }

        let is_empty_dir = entry.is_directory() && no_dir_content;
        let mut extended_flags = 0u16;
        let mut suffix_owned;
        let suffix: &str = if is_empty_dir && self.protocol_version < 30 {
            suffix_owned = suffix.to_string();
            if suffix_owned.ends_with('/') {
                suffix_owned.pop();
            }
            &suffix_owned
        } else {
            if is_empty_dir {
                extended_flags |= XMIT_NO_CONTENT_DIR;
            }
            suffix
        };

        if extended_flags != 0 || attr_flags == 0 {
            attr_flags |= XMIT_EXTENDED_FLAGS;
        }
        let xflags = attr_flags | extended_flags;

        stream.write_u8(attr_flags as u8)?;
        if attr_flags & XMIT_EXTENDED_FLAGS != 0 {
            stream.write_u8((xflags >> 8) as u8)?;
        }

        if same_name {
            stream.write_u8(prefix_len as u8)?;
        }
        if long_name {
            if self.protocol_version >= 30 {
                stream.write_variable_i32(suffix.len() as i32)?;
            } else {
                stream.write_i32(suffix.len() as i32)?;
            }
        } else {
            stream.write_u8(suffix.len() as u8)?;
        }
        stream.write(suffix.as_bytes())?;

        if self.protocol_version >= 30 {
            stream.write_variable_i64(entry.size(), SIZE_MIN_BYTES)?;
        } else {
            stream.write_i64(entry.size())?;
        }

        if !same_time {
            if self.protocol_version >= 30 {
                stream.write_variable_i64(entry.time(), TIME_MIN_BYTES)?;
            } else {
                stream.write_i32(entry.time() as i32)?;
            }
        }

        if !same_mode {
            stream.write_i32(entry.mode() as i32)?;
        }

        if entry.is_symlink() {
            let target = entry.symlink().unwrap_or_default();
            if self.protocol_version >= 30 {
                stream.write_variable_i32(target.len() as i32)?;
            } else {
                stream.write_i32(target.len() as i32)?;
            }
            stream.write(target.as_bytes())?;
        }

        self.last_path = path.to_string();
        self.last_mode = entry.mode();
        self.last_time = entry.time();
        Ok(())
    }

    /// Receives one entry, or `None` once the terminating zero-flags marker
    /// (or a fatal `IO_ERROR_ENDLIST` notice) is seen.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on a channel failure or malformed record.
    pub fn receive_entry<C: ByteChannel>(&mut self, stream: &mut Stream<C>) -> Result<Option<Entry>, ProtocolError> {
        let low = stream.read_u8()?;
        if low == 0 {
            return Ok(None);
        }
        let attr_flags = u16::from(low);
        let xflags = if attr_flags & XMIT_EXTENDED_FLAGS != 0 {
            let high = stream.read_u8()?;
            attr_flags | (u16::from(high) << 8)
        } else {
            attr_flags
        };

        if xflags & XMIT_IO_ERROR_ENDLIST != 0 {
            let code = stream.read_i32()?;
            logging_sink::log(
                logging_sink::Level::Error,
                "rsync.flist",
                &format!("remote file list aborted with io-error code {code}"),
            );
            return Ok(None);
        }

        let prefix_len = if xflags & XMIT_SAME_NAME != 0 {
            usize::from(stream.read_u8()?)
        } else {
            0
        };
        if prefix_len > self.last_path.len() {
            return Err(ProtocolError::FramingError {
                reason: format!(
                    "same-name prefix length {prefix_len} exceeds previous path length {}",
                    self.last_path.len()
                ),
            });
        }

        let suffix_len = if xflags & XMIT_LONG_NAME != 0 {
            if self.protocol_version >= 30 {
                stream.read_variable_i32()? as usize
            } else {
                stream.read_i32()? as usize
            }
        } else {
            usize::from(stream.read_u8()?)
        };

        let mut suffix = vec![0u8; suffix_len];
        if suffix_len > 0 {
            stream.read(&mut suffix)?;
        }
        let mut path = self.last_path[..prefix_len].to_string();
        path.push_str(&String::from_utf8_lossy(&suffix));

        let size = if self.protocol_version >= 30 {
            stream.read_variable_i64(SIZE_MIN_BYTES)?
        } else {
            stream.read_i64()?
        };

        let time = if xflags & XMIT_SAME_TIME != 0 {
            self.last_time
        } else if self.protocol_version >= 30 {
            stream.read_variable_i64(TIME_MIN_BYTES)?
        } else {
            i64::from(stream.read_i32()?)
        };

        let mode = if xflags & XMIT_SAME_MODE != 0 {
            self.last_mode
        } else {
            stream.read_i32()? as u32
        };

        let mut entry = Entry::new(path, false, size, time, mode);
        if mode & IS_LINK != 0 {
            let target_len = if self.protocol_version >= 30 {
                stream.read_variable_i32()? as usize
            } else {
                stream.read_i32()? as usize
            };
            let mut target = vec![0u8; target_len];
            if target_len > 0 {
                stream.read(&mut target)?;
            }
            entry = entry.with_symlink(String::from_utf8_lossy(&target).into_owned());
        }
        if xflags & XMIT_NO_CONTENT_DIR != 0 {
            entry.set_directory();
        }
        entry.normalize_path();

        self.last_path = entry.path().to_string();
        self.last_mode = entry.mode();
        self.last_time = entry.time();
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::CancellationFlag;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use transport::ChannelError;

    #[derive(Clone, Default)]
    struct MemChannel {
        inbound: Rc<RefCell<VecDeque<u8>>>,
        outbound: Rc<RefCell<Vec<u8>>>,
    }

    impl ByteChannel for MemChannel {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
            let mut inbound = self.inbound.borrow_mut();
            let n = buf.len().min(inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
            self.outbound.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }

        fn readable(&mut self, _timeout_ms: u32) -> Result<bool, ChannelError> {
            Ok(!self.inbound.borrow().is_empty())
        }

        fn writable(&mut self, _timeout_ms: u32) -> Result<bool, ChannelError> {
            Ok(true)
        }

        fn closed(&mut self) -> bool {
            false
        }
    }

    fn round_trip(protocol_version: u32, entries: &[(Entry, bool, bool)]) -> Vec<Entry> {
        let channel = MemChannel::default();
        let outbound = channel.outbound.clone();
        let mut writer = Stream::new(channel, CancellationFlag::new());
        writer.enable_buffer();
        let mut encoder = EntryCodec::new(protocol_version);
        for (entry, is_top, no_dir_content) in entries {
            encoder.send_entry(&mut writer, entry, *is_top, *no_dir_content).unwrap();
        }
        writer.write_u8(0).unwrap();
        writer.flush().unwrap();

        let sent = outbound.borrow().clone();
        let reader_channel = MemChannel {
            inbound: Rc::new(RefCell::new(sent.into())),
            outbound: Rc::new(RefCell::new(Vec::new())),
        };
        let mut reader = Stream::new(reader_channel, CancellationFlag::new());
        reader.enable_buffer();
        let mut decoder = EntryCodec::new(protocol_version);
        let mut out = Vec::new();
        while let Some(entry) = decoder.receive_entry(&mut reader).unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn protocol_30_round_trips_a_small_file_list() {
        let entries = vec![
            (Entry::new("a/", true, 0, 1_000, 0o040_755), true, false),
            (Entry::new("a/b.txt", false, 4096, 1_000, 0o100_644), false, false),
            (Entry::new("a/c.txt", false, 0x1_0000_0000, 1_200, 0o100_644), false, false),
        ];
        let decoded = round_trip(30, &entries);
        assert_eq!(decoded.len(), entries.len());
        for ((original, _, _), decoded) in entries.iter().zip(decoded.iter()) {
            assert_eq!(decoded.path(), original.path());
            assert_eq!(decoded.size(), original.size());
            assert_eq!(decoded.time(), original.time());
            assert_eq!(decoded.mode(), original.mode());
        }
    }

    #[test]
    fn protocol_29_round_trips_a_small_file_list() {
        let entries = vec![
            (Entry::new("x/", true, 0, 500, 0o040_755), true, false),
            (Entry::new("x/y.bin", false, 99, 500, 0o100_600), false, false),
        ];
        let decoded = round_trip(29, &entries);
        assert_eq!(decoded.len(), entries.len());
        assert_eq!(decoded[1].path(), "x/y.bin");
        assert_eq!(decoded[1].size(), 99);
    }

    #[test]
    fn symlink_target_round_trips() {
        let entries = vec![(
            Entry::new("link", false, 0, 10, 0o120_777).with_symlink("target/path"),
            true,
            false,
        )];
        let decoded = round_trip(30, &entries);
        assert_eq!(decoded[0].symlink(), Some("target/path"));
        assert!(decoded[0].is_symlink());
    }

    #[test]
    fn empty_directory_uses_no_content_dir_on_protocol_30() {
        let entries = vec![(Entry::new("empty", true, 0, 10, 0o040_755), true, true)];
        let decoded = round_trip(30, &entries);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_directory());
        assert_eq!(decoded[0].path(), "empty/");
    }

    #[test]
    fn empty_directory_truncates_trailing_slash_on_protocol_29() {
        let entries = vec![(Entry::new("empty", true, 0, 10, 0o040_755), true, true)];
        let decoded = round_trip(29, &entries);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_directory());
        assert_eq!(decoded[0].path(), "empty/");
    }

    #[test]
    fn same_name_prefix_compresses_sibling_paths() {
        let entries = vec![
            (Entry::new("dir/aaaa.txt", false, 1, 1, 0o100_644), true, false),
            (Entry::new("dir/aaab.txt", false, 1, 1, 0o100_644), false, false),
        ];
        let decoded = round_trip(30, &entries);
        assert_eq!(decoded[1].path(), "dir/aaab.txt");
    }

    #[test]
    fn long_suffix_over_255_bytes_round_trips() {
        let long_name = "a".repeat(300);
        let path = format!("dir/{long_name}");
        let entries = vec![(Entry::new(path.clone(), false, 7, 1, 0o100_644), true, false)];
        let decoded = round_trip(30, &entries);
        assert_eq!(decoded[0].path(), path);
    }
}
