//! `@RSYNCD:` line-protocol handshake for plain rsync-daemon connections (§6.2).

use transport::ByteChannel;

use crate::multiplex::Stream;
use crate::version::{negotiate, MAX_PROTOCOL_VERSION};
use crate::ProtocolError;

const GREETING_PREFIX: &str = "@RSYNCD: ";
const AUTH_PREFIX: &str = "@RSYNCD: AUTHREQD ";
const OK_LINE: &str = "@RSYNCD: OK";
const EXIT_LINE: &str = "@RSYNCD: EXIT";
const ERROR_PREFIX: &str = "@ERROR:";

/// Credentials used if the daemon challenges with `AUTHREQD`.
pub struct DaemonCredentials<'a> {
    /// Daemon account name.
    pub user: &'a str,
    /// Daemon account password.
    pub password: &'a str,
}

/// Outcome of a successful daemon handshake: the negotiated version plus
/// any module listing lines the daemon sent while we were asking for one.
pub struct DaemonHandshake {
    /// Version both sides agreed to speak.
    pub version: u32,
    /// Lines the daemon sent before `@RSYNCD: EXIT` (only populated when
    /// `module` is empty, i.e. the caller asked to list modules).
    pub module_listing: Vec<String>,
}

/// Runs the `@RSYNCD:` handshake for `module` (empty string lists modules
/// instead of connecting to one) and, on success, sends `command_args` as
/// the remote command line.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the daemon's greeting is unrecognized, it
/// rejects the module or credentials, or the underlying stream fails.
pub fn login<C: ByteChannel>(
    stream: &mut Stream<C>,
    module: &str,
    credentials: Option<DaemonCredentials<'_>>,
    command_args: &[String],
) -> Result<DaemonHandshake, ProtocolError> {
    stream.write_line(&format!("{GREETING_PREFIX}{MAX_PROTOCOL_VERSION}.0"))?;
    stream.write_line(module)?;
    stream.flush()?;

    let greeting = stream.read_line()?;
    let remote_version = parse_greeting_version(&greeting)?;
    let version = negotiate(remote_version)?;

    let mut module_listing = Vec::new();
    loop {
        let line = stream.read_line()?;
        if let Some(challenge) = line.strip_prefix(AUTH_PREFIX) {
            let credentials = credentials.as_ref().ok_or_else(|| ProtocolError::DaemonRejected {
                reason: "daemon requires authentication but none was configured".into(),
            })?;
            let response = if version >= 30 {
                checksums::strong::Md5::digest_password_challenge(credentials.password, challenge.trim())
            } else {
                checksums::strong::Md4::digest_password_challenge(credentials.password, challenge.trim())
            };
            stream.write_line(&format!("{} {response}", credentials.user))?;
            stream.flush()?;
            continue;
        }
        if line == OK_LINE {
            break;
        }
        if line == EXIT_LINE {
            return Ok(DaemonHandshake {
                version,
                module_listing,
            });
        }
        if let Some(reason) = line.strip_prefix(ERROR_PREFIX) {
            return Err(ProtocolError::DaemonRejected {
                reason: reason.trim().to_string(),
            });
        }
        module_listing.push(line);
    }

    for arg in command_args {
        if version >= 30 {
            stream.write(arg.as_bytes())?;
        } else {
            stream.write_line(arg)?;
        }
    }
    stream.write_line("")?;
    stream.flush()?;

    Ok(DaemonHandshake {
        version,
        module_listing,
    })
}

fn parse_greeting_version(line: &str) -> Result<u32, ProtocolError> {
    let rest = line.strip_prefix(GREETING_PREFIX).ok_or_else(|| {
        ProtocolError::UnrecognizedGreeting {
            line: line.to_string(),
        }
    })?;
    let major = rest.split('.').next().unwrap_or_default();
    major.parse().map_err(|_| ProtocolError::UnrecognizedGreeting {
        line: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_version_from_greeting() {
        assert_eq!(parse_greeting_version("@RSYNCD: 30.0").unwrap(), 30);
    }

    #[test]
    fn rejects_unrecognized_greeting() {
        assert!(parse_greeting_version("hello there").is_err());
    }
}
