use std::io::{Read as _, Write as _};
use std::net::TcpStream;
use std::time::Duration;

use crate::{ByteChannel, ChannelError};

/// Plain TCP transport, used for rsync daemon-mode (`rsync://`) connections.
pub struct SocketChannel {
    stream: TcpStream,
    closed: bool,
}

impl SocketChannel {
    /// Connects to `addr` and wraps the resulting stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] if the connection cannot be established.
    pub fn connect(addr: &str) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            closed: false,
        })
    }
}

impl ByteChannel for SocketChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        match self.stream.read(buf) {
            Ok(0) => {
                self.closed = true;
                Err(ChannelError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.stream.flush().map_err(Into::into)
    }

    fn readable(&mut self, timeout_ms: u32) -> Result<bool, ChannelError> {
        self.stream
            .set_read_timeout(Some(Duration::from_millis(u64::from(timeout_ms))))?;
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => {
                self.closed = true;
                Ok(true)
            }
            Ok(_) => Ok(true),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn writable(&mut self, _timeout_ms: u32) -> Result<bool, ChannelError> {
        Ok(true)
    }

    fn closed(&mut self) -> bool {
        self.closed
    }
}
