//! Session driver: handshake dispatch and transfer orchestration for one
//! rsync operation (§4.8).
//!
//! A [`SessionDriver`] owns one negotiated [`Stream`] and drives it through
//! exactly one of download, upload, remove, mkdir, or link. [`list_modules`]
//! is a standalone daemon-mode query that never reaches a driver: the
//! connection ends at `@RSYNCD: EXIT` before any file-list phase begins.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flist::{compare_globally, Entry, EntryCodec};
use platform::{Filesystem, PartialKeeper};
use protocol::{daemon_login, CancellationFlag, DaemonCredentials, Stream, COMPAT_INCREMENTAL_RECURSION, INDEX_DONE};
use signature::ChecksumHeader;
use transport::ByteChannel;

use crate::config::{ClientConfig, Stats};
use crate::error::SessionError;
use crate::reconciler::{reconcile, sweep_deletions};
use crate::walker::walk_local_tree;
use crate::Callbacks;

/// Assembles the remote command line for `--server` mode (§4.8 step 1).
///
/// `downloading` adds `--sender` (the remote reads and we receive);
/// `recursive` and `config.deleting()` mirror their namesake flags.
#[must_use]
pub fn build_remote_command(remote_path: &str, downloading: bool, recursive: bool, config: &ClientConfig) -> String {
    let mut args = vec!["--server".to_string()];
    if downloading {
        args.push("--sender".to_string());
    }
    if config.download_limit_kbps() > 0 {
        args.push(format!("--bwlimit={}", config.download_limit_kbps()));
    }
    args.push("--out-format=%n".to_string());
    args.push("--links".to_string());
    if recursive {
        args.push("--recursive".to_string());
    }
    if config.deleting() {
        args.push("--delete-during".to_string());
    }
    for path in config.backup_paths() {
        args.push(format!("--link-dest={path}"));
    }
    args.push("-tude.".to_string());
    args.push(".".to_string());
    args.push(remote_path.to_string());
    args.join(" ")
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Drives one rsync operation over an already-negotiated [`Stream`] (§4.8).
pub struct SessionDriver<C: ByteChannel, F: Filesystem, CB: Callbacks> {
    stream: Stream<C>,
    fs: F,
    root: PathBuf,
    config: ClientConfig,
    callbacks: CB,
    stats: Stats,
    protocol_version: u32,
    seed: i32,
    updated_files: Vec<String>,
    deleted_files: Vec<String>,
}

impl<C: ByteChannel, F: Filesystem, CB: Callbacks> SessionDriver<C, F, CB> {
    /// Runs the SSH-mode version exchange (`protocol::handshake`) over a
    /// channel whose remote command has already been exec'd.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the handshake fails or the peer proposes
    /// an unsupported protocol version or compatibility flag.
    pub fn connect_ssh(
        channel: C,
        cancel: CancellationFlag,
        fs: F,
        root: PathBuf,
        callbacks: CB,
        config: ClientConfig,
        downloading: bool,
        deleting: bool,
    ) -> Result<Self, SessionError> {
        let mut stream = Stream::new(channel, cancel);
        stream.reset();
        let handshake = protocol::handshake(&mut stream).map_err(SessionError::from_protocol)?;
        Self::finish_connect(stream, fs, root, callbacks, config, handshake.version, handshake.checksum_seed, downloading, deleting)
    }

    /// Runs the `@RSYNCD:` daemon handshake, then the compat-flag and
    /// checksum-seed reads that SSH mode performs inside its own handshake
    /// but the daemon line protocol leaves for the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the daemon rejects the module or
    /// credentials, or the post-login reads fail.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_daemon(
        channel: C,
        cancel: CancellationFlag,
        fs: F,
        root: PathBuf,
        callbacks: CB,
        config: ClientConfig,
        module: &str,
        credentials: Option<DaemonCredentials<'_>>,
        command_args: &[String],
        downloading: bool,
        deleting: bool,
    ) -> Result<Self, SessionError> {
        let mut stream = Stream::new(channel, cancel);
        stream.reset();
        let handshake = daemon_login(&mut stream, module, credentials, command_args).map_err(SessionError::from_protocol)?;

        if handshake.version >= 30 {
            let compat = stream.read_u8().map_err(SessionError::from_protocol)?;
            if compat & COMPAT_INCREMENTAL_RECURSION != 0 {
                return Err(SessionError::ProtocolMismatch {
                    reason: "peer requires incremental recursion, which this client does not support".into(),
                });
            }
        }
        let seed = stream.read_i32().map_err(SessionError::from_protocol)?;

        Self::finish_connect(stream, fs, root, callbacks, config, handshake.version, seed, downloading, deleting)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_connect(
        mut stream: Stream<C>,
        fs: F,
        root: PathBuf,
        callbacks: CB,
        config: ClientConfig,
        protocol_version: u32,
        seed: i32,
        downloading: bool,
        deleting: bool,
    ) -> Result<Self, SessionError> {
        stream.enable_buffer();
        if protocol_version >= 30 {
            stream.enable_write_multiplex();
        }
        stream.set_upload_limit_kbps(config.upload_limit_kbps());

        if downloading || deleting {
            stream.write_i32(0).map_err(SessionError::from_protocol)?;
            stream.flush().map_err(SessionError::from_protocol)?;
        }

        Ok(Self {
            stream,
            fs,
            root,
            config,
            callbacks,
            stats: Stats::default(),
            protocol_version,
            seed,
            updated_files: Vec::new(),
            deleted_files: Vec::new(),
        })
    }

    /// Byte counters accumulated so far by this driver.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Remote-relative paths of files created or updated by the most recent
    /// [`Self::download`] (§7: "callers read `getUpdatedFiles` afterward").
    #[must_use]
    pub fn updated_files(&self) -> &[String] {
        &self.updated_files
    }

    /// Remote-relative paths removed locally by the most recent
    /// [`Self::download`]'s deletion sweep.
    #[must_use]
    pub fn deleted_files(&self) -> &[String] {
        &self.deleted_files
    }

    fn drain_index_done(&mut self) -> Result<(), SessionError> {
        for _ in 0..4 {
            self.stream.write_index(INDEX_DONE).map_err(SessionError::from_protocol)?;
        }
        self.stream.flush().map_err(SessionError::from_protocol)
    }

    fn temp_path_for(&self, destination: &Path) -> PathBuf {
        let file_name = destination.file_name().and_then(|s| s.to_str()).unwrap_or("tmp");
        let formatted = self.config.intermediate_template().replace("{}", file_name);
        destination.with_file_name(formatted)
    }

    fn receive_remote_list(&mut self) -> Result<Vec<Entry>, SessionError> {
        let mut codec = EntryCodec::new(self.protocol_version);
        let mut list = Vec::new();
        while let Some(entry) = codec.receive_entry(&mut self.stream).map_err(SessionError::from_protocol)? {
            list.push(entry);
        }
        if !list.iter().any(|e| e.path() == "./") {
            list.push(Entry::new("./", true, 0, 0, 0o755));
        }
        list.sort_by(compare_globally);
        Ok(list)
    }

    /// Runs a full download: receive the remote list, reconcile it against
    /// the local tree, transfer every queued file, then sweep deletions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on any unrecoverable wire, filesystem, or
    /// engine failure. A per-file checksum mismatch is retried once with an
    /// empty base file before being treated as fatal.
    pub fn download(&mut self) -> Result<(), SessionError> {
        self.updated_files.clear();
        self.deleted_files.clear();

        let remote = self.receive_remote_list()?;
        let local = walk_local_tree(&self.fs, &self.root)?;
        let include_only = self.config.include_only().cloned();
        let queue = reconcile(&self.fs, &self.root, &local, &remote, include_only.as_ref(), &mut self.stats)?;

        let retries = self.run_download_phase(&remote, &queue, true)?;
        if !retries.is_empty() {
            self.run_download_phase(&remote, &retries, false)?;
        }

        self.drain_index_done()?;

        if self.config.deleting() {
            self.deleted_files = sweep_deletions(&self.fs, &self.root, &local, &remote)?;
        }

        let mut remote = remote;
        roll_up_directory_sizes(&mut remote);
        for entry in &remote {
            self.callbacks
                .entry_out(entry.path(), entry.is_directory(), entry.size(), entry.time(), entry.symlink());
        }

        Ok(())
    }

    /// Sends the checksum header for `index`, then reads back the echoed
    /// index and applies the resulting token stream. `use_base` selects
    /// between the real old file (phase 0) and a forced empty base
    /// (phase 1 retry).
    fn run_download_phase(&mut self, remote: &[Entry], queue: &[i32], use_base: bool) -> Result<Vec<i32>, SessionError> {
        let mut retries = Vec::new();
        for &index in queue {
            self.write_checksum_frame(remote, index, use_base)?;
            self.stream.flush().map_err(SessionError::from_protocol)?;

            let echoed = self.stream.read_index().map_err(SessionError::from_protocol)?;
            if echoed != index {
                return Err(SessionError::Protocol(protocol::ProtocolError::FramingError {
                    reason: format!("generator echoed index {echoed}, expected {index}"),
                }));
            }

            match self.receive_one_file(remote, index) {
                Ok(()) => {}
                Err(SessionError::ChecksumMismatch { .. }) => retries.push(index),
                Err(other) => return Err(other),
            }
        }
        Ok(retries)
    }

    fn write_checksum_frame(&mut self, remote: &[Entry], index: i32, use_base: bool) -> Result<(), SessionError> {
        let entry = &remote[index as usize];
        let full = self.root.join(entry.path());

        let mut old_file = if use_base { self.fs.open_for_read(&full).ok() } else { None };
        let header = match old_file.as_ref() {
            Some(_) => {
                let old_size = self.fs.stat(&full).map(|m| m.size).unwrap_or(0);
                ChecksumHeader::for_file_size(old_size)
            }
            None => ChecksumHeader::empty(),
        };

        self.stream.write_index(index).map_err(SessionError::from_protocol)?;
        self.stream.write_u16(0x8000).map_err(SessionError::from_protocol)?;
        self.stream.write_i32(header.count).map_err(SessionError::from_protocol)?;
        self.stream.write_i32(header.block_length).map_err(SessionError::from_protocol)?;
        self.stream.write_i32(header.strong_length).map_err(SessionError::from_protocol)?;
        self.stream.write_i32(header.remainder).map_err(SessionError::from_protocol)?;

        if header.count == 0 {
            return Ok(());
        }

        let Some(file) = old_file.as_mut() else {
            return Ok(());
        };
        let block_length = header.block_length.max(1) as usize;
        let mut buf = vec![0u8; block_length];
        for i in 0..header.count {
            let this_len = if i == header.count - 1 {
                header.remainder as usize
            } else {
                block_length
            };
            read_block(file, &full, this_len, &mut buf)?;
            let checksum = signature::block_checksum(self.protocol_version, &buf[..this_len], self.seed);
            self.stream.write_i32(checksum.weak as i32).map_err(SessionError::from_protocol)?;
            self.stream
                .write(&checksum.strong[..header.strong_length as usize])
                .map_err(SessionError::from_protocol)?;
        }
        Ok(())
    }

    fn receive_one_file(&mut self, remote: &[Entry], index: i32) -> Result<(), SessionError> {
        let entry = &remote[index as usize];
        let full = self.root.join(entry.path());
        let temp_path = self.temp_path_for(&full);
        let keeper = PartialKeeper::new(&self.fs, temp_path, full.clone(), entry.mode() & 0o7_777, entry.time());

        let mut old_file = self.fs.open_for_read(&full).ok();
        let new_file = self.fs.create_for_write_truncate(keeper.temp_path())?;

        let mut receiver = engine::PatchReceiver::new();
        let outcome = receiver.receive_file(&mut self.stream, self.protocol_version, self.seed, old_file.as_mut(), new_file);

        match outcome {
            Ok(engine::ReceiveOutcome::Received { file_size }) => {
                keeper.commit()?;
                self.stats.add_physical(file_size.max(0) as u64);
                self.stats.add_total(file_size.max(0) as u64);
                self.updated_files.push(entry.path().to_string());
                Ok(())
            }
            Ok(engine::ReceiveOutcome::NotTransmitted) => Ok(()),
            Err(engine::EngineError::ChecksumMismatch) => Err(SessionError::ChecksumMismatch {
                path: entry.path().to_string(),
            }),
            Err(other) => Err(SessionError::from_engine(other)),
        }
    }

    /// Runs a full upload: send the local list, then answer every index the
    /// remote generator asks for with a diff against the matching local
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on any unrecoverable wire, filesystem, or
    /// engine failure.
    pub fn upload(&mut self) -> Result<(), SessionError> {
        let mut local = walk_local_tree(&self.fs, &self.root)?;
        local.insert(0, Entry::new("./", true, 0, now_unix(), 0o755));

        let mut codec = EntryCodec::new(self.protocol_version);
        for (i, entry) in local.iter().enumerate() {
            codec.send_entry(&mut self.stream, entry, i == 0, false).map_err(SessionError::from_protocol)?;
        }
        self.stream.write_u8(0).map_err(SessionError::from_protocol)?;
        if self.protocol_version == 29 {
            self.stream.write_i32(0).map_err(SessionError::from_protocol)?;
        }
        self.stream.flush().map_err(SessionError::from_protocol)?;

        let mut sender = engine::DiffSender::new();
        let mut last_index = -1i32;
        loop {
            let index = self.stream.read_index().map_err(SessionError::from_protocol)?;
            if index == INDEX_DONE {
                break;
            }

            for gap in last_index + 1..index {
                if let Some(skipped) = local.get(gap as usize) {
                    self.stats.add_skipped(skipped.size().max(0) as u64);
                }
            }
            last_index = index;

            let entry = local.get(index as usize).ok_or_else(|| {
                SessionError::Protocol(protocol::ProtocolError::FramingError {
                    reason: format!("generator referenced unknown index {index}"),
                })
            })?;
            let full = self.root.join(entry.path());
            let source = self.fs.open_for_read(&full).ok();

            let transmitted = sender
                .send_file(&mut self.stream, self.protocol_version, self.seed, index, source)
                .map_err(SessionError::from_engine)?;
            if transmitted {
                self.stats.add_logical(entry.size().max(0) as u64);
            } else {
                self.stats.add_skipped(entry.size().max(0) as u64);
            }
            self.stream.flush().map_err(SessionError::from_protocol)?;
        }

        self.drain_index_done()?;

        for payload in self.stream.take_deleted() {
            self.callbacks.status_out(&format!("deleted {}", String::from_utf8_lossy(&payload)));
        }

        Ok(())
    }

    fn send_single_entry(&mut self, entry: &Entry) -> Result<(), SessionError> {
        let mut codec = EntryCodec::new(self.protocol_version);
        codec.send_entry(&mut self.stream, entry, true, false).map_err(SessionError::from_protocol)?;
        self.stream.write_u8(0).map_err(SessionError::from_protocol)?;
        self.stream.flush().map_err(SessionError::from_protocol)?;
        self.drain_index_done()
    }

    /// Removes `remote_path` on the peer by sending a filter list that
    /// includes only that path (and nothing beneath it keeps), then an
    /// empty file list.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a wire failure.
    pub fn remove(&mut self, remote_path: &str) -> Result<(), SessionError> {
        let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        let rules = [
            format!("+ /{name}"),
            format!("+ /{name}/"),
            format!("+ /{name}/**"),
            "- *".to_string(),
        ];
        for rule in &rules {
            self.stream.write_i32(rule.len() as i32).map_err(SessionError::from_protocol)?;
            self.stream.write(rule.as_bytes()).map_err(SessionError::from_protocol)?;
        }
        self.stream.write_i32(0).map_err(SessionError::from_protocol)?;

        let entry = Entry::new("./", true, 0, now_unix(), 0o755);
        self.send_single_entry(&entry)
    }

    /// Creates a directory at `remote_path` via a single synthetic entry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a wire failure.
    pub fn mkdir(&mut self, remote_path: &str) -> Result<(), SessionError> {
        let entry = Entry::new(remote_path, true, 0, now_unix(), 0o755);
        self.send_single_entry(&entry)
    }

    /// Creates a symbolic link at `remote_path` pointing to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a wire failure.
    pub fn link(&mut self, remote_path: &str, target: &str) -> Result<(), SessionError> {
        let entry = Entry::new(remote_path, false, 0, now_unix(), 0o777).with_symlink(target);
        self.send_single_entry(&entry)
    }
}

/// Queries a daemon for its module list without ever reaching a
/// [`SessionDriver`]: the connection ends at `@RSYNCD: EXIT` before any
/// file-list phase would begin.
///
/// # Errors
///
/// Returns [`SessionError`] if the daemon handshake fails.
pub fn list_modules<C: ByteChannel, CB: Callbacks>(
    channel: C,
    cancel: CancellationFlag,
    callbacks: &mut CB,
) -> Result<Vec<String>, SessionError> {
    let mut stream = Stream::new(channel, cancel);
    stream.reset();
    let handshake = daemon_login(&mut stream, "", None, &[]).map_err(SessionError::from_protocol)?;
    for module in &handshake.module_listing {
        callbacks.entry_out(module, true, 0, 0, None);
    }
    Ok(handshake.module_listing)
}

fn read_block<R: Read>(file: &mut R, path: &Path, len: usize, buf: &mut [u8]) -> Result<(), SessionError> {
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..len]).map_err(|source| {
            SessionError::Fs(platform::FsError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(())
}

/// Rolls each file entry's size up into every ancestor directory entry
/// present in `remote`, so a directory's reported size covers its subtree.
fn roll_up_directory_sizes(remote: &mut [Entry]) {
    let dir_index: HashMap<String, usize> = remote
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_directory())
        .map(|(i, e)| (e.path().to_string(), i))
        .collect();

    let file_sizes: Vec<(String, i64)> = remote
        .iter()
        .filter(|e| !e.is_directory())
        .map(|e| (e.path().to_string(), e.size()))
        .collect();

    for (path, size) in file_sizes {
        let mut component = path.as_str();
        while let Some(pos) = component.rfind('/') {
            component = &component[..pos];
            let dir_path = format!("{component}/");
            if let Some(&idx) = dir_index.get(&dir_path) {
                remote[idx].add_size(size);
            }
            if component.is_empty() {
                break;
            }
        }
    }
}
