// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client side of the caching daemon that sits in front of database files.
//!
//! Only two requests are used: `FLUSH` before the source is read and
//! `FORGET` around the rename of the destination. Both are advisory; the
//! pipeline goes through [`flush_best_effort`] and [`forget_best_effort`],
//! which log failures and carry on.

use crate::error::{ModifyError, Result};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_PORT: u16 = 42217;
const UNIX_PREFIX: &str = "unix:";

pub trait CacheDaemon {
    /// Writes any cached updates for `path` to disk.
    fn flush(&mut self, path: &Path) -> Result<()>;

    /// Drops any cached state for `path` without writing it.
    fn forget(&mut self, path: &Path) -> Result<()>;
}

/// Used when no daemon is configured; every request succeeds immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDaemon;

impl CacheDaemon for NoDaemon {
    fn flush(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn forget(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

pub fn flush_best_effort(daemon: &mut dyn CacheDaemon, path: &Path) {
    if let Err(e) = daemon.flush(path) {
        warn!(path = %path.display(), error = %e, "daemon flush failed, continuing");
    }
}

pub fn forget_best_effort(daemon: &mut dyn CacheDaemon, path: &Path) {
    if let Err(e) = daemon.forget(path) {
        warn!(path = %path.display(), error = %e, "daemon forget failed, continuing");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddress {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl DaemonAddress {
    /// `unix:<path>` or an absolute path selects a Unix socket; anything else
    /// is `host`, `host:port` or `[v6-host]:port`.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || ModifyError::DaemonConnect {
            address: address.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "malformed daemon address"),
        };
        if let Some(path) = address.strip_prefix(UNIX_PREFIX) {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if address.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(address)));
        }
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else {
            match address.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                // Bare IPv6 literal without brackets.
                Some(_) => (address, None),
                None => (address, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

/// Connected transport to the daemon.
#[derive(Debug)]
pub enum DaemonStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for DaemonStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for DaemonStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

/// Line-protocol client: one `COMMAND arg\n` per request, answered by a
/// `<status> <message>` line. A negative status is an error; a positive one
/// announces that many extra lines, which are skipped.
#[derive(Debug)]
pub struct DaemonClient<S: Read + Write> {
    stream: BufReader<S>,
}

impl DaemonClient<DaemonStream> {
    pub fn connect(address: &str) -> Result<Self> {
        let connect_err = |source| ModifyError::DaemonConnect {
            address: address.to_string(),
            source,
        };
        let stream = match DaemonAddress::parse(address)? {
            #[cfg(unix)]
            DaemonAddress::Unix(path) => {
                DaemonStream::Unix(UnixStream::connect(path).map_err(connect_err)?)
            }
            #[cfg(not(unix))]
            DaemonAddress::Unix(_) => {
                return Err(connect_err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not available on this platform",
                )))
            }
            DaemonAddress::Tcp { host, port } => {
                DaemonStream::Tcp(TcpStream::connect((host.as_str(), port)).map_err(connect_err)?)
            }
        };
        debug!(address, "connected to daemon");
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> DaemonClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn request(&mut self, command: &str, path: &Path) -> Result<()> {
        let line = format!("{command} {}\n", escape_arg(&path.to_string_lossy()));
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        let mut status_line = String::new();
        if self.stream.read_line(&mut status_line)? == 0 {
            return Err(ModifyError::Daemon(format!(
                "{command}: connection closed by daemon"
            )));
        }
        let status_line = status_line.trim_end();
        let (code, message) = status_line.split_once(' ').unwrap_or((status_line, ""));
        let code: i64 = code.parse().map_err(|_| {
            ModifyError::Daemon(format!("{command}: malformed response '{status_line}'"))
        })?;
        if code < 0 {
            return Err(ModifyError::Daemon(format!("{command}: {message}")));
        }
        let mut extra = String::new();
        for _ in 0..code {
            extra.clear();
            if self.stream.read_line(&mut extra)? == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl<S: Read + Write> CacheDaemon for DaemonClient<S> {
    fn flush(&mut self, path: &Path) -> Result<()> {
        self.request("FLUSH", path)
    }

    fn forget(&mut self, path: &Path) -> Result<()> {
        self.request("FORGET", path)
    }
}

/// Backslash-escapes spaces and backslashes so a path stays one argument.
fn escape_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    for c in arg.chars() {
        if c == ' ' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex: reads come from canned responses, writes are kept.
    struct Scripted {
        responses: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(responses: &str) -> Self {
            Self {
                responses: Cursor::new(responses.as_bytes().to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.responses.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_flush_and_forget_requests() {
        let mut client = DaemonClient::new(Scripted::new("0 Success\n0 Gone\n"));
        client.flush(Path::new("/var/db/a b.rrd")).unwrap();
        client.forget(Path::new("/var/db/out.rrd")).unwrap();
        let sent = String::from_utf8(client.into_inner().sent).unwrap();
        assert_eq!(sent, "FLUSH /var/db/a\\ b.rrd\nFORGET /var/db/out.rrd\n");
    }

    #[test]
    fn test_negative_status_is_error() {
        let mut client = DaemonClient::new(Scripted::new("-1 No such file: x.rrd\n"));
        let err = client.forget(Path::new("x.rrd")).unwrap_err();
        assert!(matches!(err, ModifyError::Daemon(m) if m.contains("No such file")));
    }

    #[test]
    fn test_positive_status_skips_extra_lines() {
        let mut client = DaemonClient::new(Scripted::new("2 Details follow\nA\nB\n0 ok\n"));
        client.flush(Path::new("a.rrd")).unwrap();
        client.flush(Path::new("b.rrd")).unwrap();
    }

    #[test]
    fn test_closed_connection_is_error() {
        let mut client = DaemonClient::new(Scripted::new(""));
        assert!(matches!(
            client.flush(Path::new("a.rrd")),
            Err(ModifyError::Daemon(_))
        ));
    }

    #[test]
    fn test_best_effort_swallows_errors() {
        let mut client = DaemonClient::new(Scripted::new("garbage\n"));
        flush_best_effort(&mut client, Path::new("a.rrd"));
        forget_best_effort(&mut client, Path::new("a.rrd"));
    }

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            DaemonAddress::parse("unix:/run/cached.sock").unwrap(),
            DaemonAddress::Unix(PathBuf::from("/run/cached.sock"))
        );
        assert_eq!(
            DaemonAddress::parse("/run/cached.sock").unwrap(),
            DaemonAddress::Unix(PathBuf::from("/run/cached.sock"))
        );
        assert_eq!(
            DaemonAddress::parse("cache.local").unwrap(),
            DaemonAddress::Tcp {
                host: "cache.local".to_string(),
                port: DEFAULT_PORT
            }
        );
        assert_eq!(
            DaemonAddress::parse("10.0.0.5:1234").unwrap(),
            DaemonAddress::Tcp {
                host: "10.0.0.5".to_string(),
                port: 1234
            }
        );
        assert_eq!(
            DaemonAddress::parse("[::1]:99").unwrap(),
            DaemonAddress::Tcp {
                host: "::1".to_string(),
                port: 99
            }
        );
        assert!(DaemonAddress::parse("unix:").is_err());
        assert!(DaemonAddress::parse("host:notaport").is_err());
        assert!(DaemonAddress::parse(":80").is_err());
    }

    #[test]
    fn test_escape_arg() {
        assert_eq!(escape_arg(r"a b\c"), r"a\ b\\c");
    }
}
