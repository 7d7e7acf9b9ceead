use std::io::{Read as _, Write as _};
use std::net::TcpStream;
use std::time::Duration;

use ssh2::Session;

use crate::{ByteChannel, ChannelError};

/// Channel receive window is grown back above this floor so the remote
/// sender never stalls waiting for window space (mirrors the reference
/// client's `minWindowSize`).
const MIN_WINDOW_SIZE: u64 = 128 * 1024;

/// SSH exec-channel transport: `ssh user@host rsync --server ...`.
pub struct SshChannel {
    session: Session,
    channel: Option<ssh2::Channel>,
    closed: bool,
}

impl SshChannel {
    /// Connects, authenticates, and verifies the host key via `accept_host_key`.
    ///
    /// `accept_host_key` receives the server address and a colon-separated
    /// hex SHA-1 fingerprint and returns whether to proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the TCP connection, SSH handshake,
    /// authentication, or host-key verification fails.
    pub fn connect(
        addr: &str,
        username: &str,
        password: Option<&str>,
        mut accept_host_key: impl FnMut(&str, &str) -> bool,
    ) -> Result<Self, ChannelError> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;

        let mut session = Session::new().map_err(ChannelError::Ssh)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(100_000);
        session.handshake()?;

        let fingerprint = session
            .host_key_hash(ssh2::HashType::Sha1)
            .map(hex_colon)
            .unwrap_or_default();
        if !accept_host_key(addr, &fingerprint) {
            return Err(ChannelError::HostKeyRejected {
                server: addr.to_string(),
            });
        }

        authenticate(&session, username, password)?;
        session.set_keepalive(true, 5);

        Ok(Self {
            session,
            channel: None,
            closed: false,
        })
    }

    /// Opens the exec channel and starts `remote_command`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Ssh`] if the channel cannot be opened or the
    /// command cannot be started.
    pub fn create_channel(&mut self, remote_command: &str) -> Result<(), ChannelError> {
        let mut channel = self.session.channel_session()?;
        channel.exec(remote_command)?;
        self.session.set_blocking(false);
        self.channel = Some(channel);
        Ok(())
    }

    fn channel_mut(&mut self) -> &mut ssh2::Channel {
        self.channel
            .as_mut()
            .expect("create_channel must be called before using the transport")
    }
}

fn authenticate(
    session: &Session,
    username: &str,
    password: Option<&str>,
) -> Result<(), ChannelError> {
    if session.userauth_agent(username).is_ok() {
        return Ok(());
    }
    if let Some(password) = password {
        if session.userauth_password(username, password).is_ok() {
            return Ok(());
        }
    }
    if session.authenticated() {
        return Ok(());
    }
    Err(ChannelError::AuthenticationFailed {
        user: username.to_string(),
    })
}

fn hex_colon(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

impl ByteChannel for SshChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let (window, _initial, _avail) = self.channel_mut().read_window();
        if window < MIN_WINDOW_SIZE {
            let _ = self
                .channel_mut()
                .adjust_receive_window(MIN_WINDOW_SIZE * 2, false);
        }

        let eof = self.channel_mut().eof();
        match self.channel_mut().read(buf) {
            Ok(0) => {
                if eof {
                    self.closed = true;
                    Err(ChannelError::Closed)
                } else {
                    Ok(0)
                }
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        match self.channel_mut().write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.channel_mut().flush().map_err(Into::into)
    }

    fn readable(&mut self, timeout_ms: u32) -> Result<bool, ChannelError> {
        std::thread::sleep(Duration::from_millis(u64::from(timeout_ms.min(50))));
        Ok(true)
    }

    fn writable(&mut self, _timeout_ms: u32) -> Result<bool, ChannelError> {
        Ok(true)
    }

    fn closed(&mut self) -> bool {
        if self.closed {
            return true;
        }
        if self.channel_mut().eof() {
            self.closed = true;
            return true;
        }
        if let Ok(status) = self.channel_mut().exit_status() {
            if status != 0 {
                self.closed = true;
                return true;
            }
        }
        if self
            .channel_mut()
            .exit_signal()
            .is_ok_and(|s| s.0.is_some())
        {
            self.closed = true;
            return true;
        }
        false
    }
}
