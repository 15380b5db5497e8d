//! Minimal FTP client: control connection, passive-mode data connections
//! and the handful of commands the updater needs (RFC 959, RFC 2428 for EPSV).

use crate::core::target::TransferTarget;
use crate::error::{Result, UpdaterError};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::debug;

/// Size of one retrieval chunk.
pub const CHUNK_SIZE: usize = 8192;

/// What a transfer session needs from the remote end.
pub trait RemoteSource {
    /// Size of `name` in bytes.
    fn size(&mut self, name: &str) -> Result<u64>;

    /// Streams `name` in binary mode, handing each chunk to `on_chunk` in
    /// arrival order. Every chunk holds exactly `chunk_size` bytes except
    /// the last one. An error from `on_chunk` aborts the retrieval.
    fn retrieve(
        &mut self,
        name: &str,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()>;

    /// Ends the session. Calling it again does nothing.
    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn is_preliminary(&self) -> bool {
        self.code / 100 == 1
    }

    pub fn is_success(&self) -> bool {
        self.code / 100 == 2
    }

    pub fn is_intermediate(&self) -> bool {
        self.code / 100 == 3
    }

    /// 4xx: the server could not act right now but the request was sound.
    pub fn is_transient(&self) -> bool {
        self.code / 100 == 4
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// A file listed by [`FtpConnection::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: Option<u64>,
}

pub struct FtpConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
    closed: bool,
}

impl FtpConnection {
    /// Connects and reads the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let address = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let connection_error = |source: io::Error| UpdaterError::Connection {
            address: address.clone(),
            source,
        };

        debug!("connecting to {address}");
        let stream = TcpStream::connect((host, port)).map_err(connection_error)?;
        let peer = stream.peer_addr().map_err(connection_error)?;
        let writer = stream.try_clone().map_err(connection_error)?;

        let mut connection = Self {
            reader: BufReader::new(stream),
            writer,
            peer,
            closed: false,
        };

        let greeting = connection.read_reply()?;
        if greeting.is_transient() {
            return Err(UpdaterError::transfer_error(greeting.to_string()));
        }
        if !greeting.is_success() {
            return Err(connection_error(io::Error::other(greeting.to_string())));
        }
        debug!("server greeting: {greeting}");

        Ok(connection)
    }

    /// Connects, logs in, changes into the remote directory and switches
    /// to binary mode.
    pub fn open(target: &TransferTarget) -> Result<Self> {
        let mut connection = Self::connect(&target.host, target.port)?;
        let login = target.login();
        connection.login(&login.user, &login.password)?;
        connection.cwd(&target.remote_directory)?;
        connection.binary()?;
        Ok(connection)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let auth_error = |reply: Reply| UpdaterError::Auth {
            message: reply.to_string(),
        };

        let mut reply = self.command(&format!("USER {user}"))?;
        if reply.is_intermediate() {
            reply = self.command_masked("PASS", password)?;
        }
        if reply.is_intermediate() {
            // 332: account required
            return Err(auth_error(reply));
        }
        if !reply.is_success() {
            return Err(auth_error(reply));
        }

        debug!("logged in as {user}");
        Ok(())
    }

    pub fn cwd(&mut self, directory: &str) -> Result<()> {
        let reply = self.command(&format!("CWD {directory}"))?;
        if !reply.is_success() {
            return Err(UpdaterError::Navigation {
                directory: directory.to_string(),
                message: reply.to_string(),
            });
        }
        Ok(())
    }

    pub fn binary(&mut self) -> Result<()> {
        let reply = self.command("TYPE I")?;
        if !reply.is_success() {
            return Err(UpdaterError::protocol_error(reply.to_string()));
        }
        Ok(())
    }

    /// Names (and sizes, when the server reports them) of the regular files
    /// in the current directory, via MLSD.
    pub fn list_files(&mut self) -> Result<Vec<RemoteFile>> {
        let mut listing = Vec::new();
        self.transfer("MLSD", "MLSD", CHUNK_SIZE, &mut |chunk| {
            listing.extend_from_slice(chunk);
            Ok(())
        })?;

        Ok(String::from_utf8_lossy(&listing)
            .lines()
            .filter_map(parse_mlsd_line)
            .collect())
    }

    pub fn quit(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.command("QUIT").map(|_| ());
        self.closed = true;
        let _ = self.writer.shutdown(Shutdown::Both);
        result
    }

    fn send(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| UpdaterError::transfer_error(format!("control connection failed: {e}")))
    }

    /// Reads one control line. Servers are free to send any 8-bit text, so
    /// bytes that are not UTF-8 are replaced instead of rejected.
    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut line)
            .map_err(|e| UpdaterError::transfer_error(format!("control connection failed: {e}")))?;
        if read == 0 {
            return Err(UpdaterError::transfer_error("connection closed by server"));
        }
        Ok(String::from_utf8_lossy(&line)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line()?;
        let (code, separator, text) = parse_reply_line(&first)
            .ok_or_else(|| UpdaterError::protocol_error(format!("malformed reply '{first}'")))?;

        let mut text = text.to_string();
        if separator == '-' {
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line()?;
                if let Some(last) = line.strip_prefix(&terminator) {
                    text.push('\n');
                    text.push_str(last);
                    break;
                }
                text.push('\n');
                text.push_str(&line);
            }
        }

        let reply = Reply { code, text };
        debug!("< {reply}");
        Ok(reply)
    }

    /// Sends `line` and returns the reply. 4xx replies become
    /// [`UpdaterError::Transfer`]; every other reply is left to the caller.
    fn command(&mut self, line: &str) -> Result<Reply> {
        debug!("> {line}");
        self.exchange(line)
    }

    fn command_masked(&mut self, verb: &str, argument: &str) -> Result<Reply> {
        debug!("> {verb} ****");
        self.exchange(&format!("{verb} {argument}"))
    }

    fn exchange(&mut self, line: &str) -> Result<Reply> {
        if self.closed {
            return Err(UpdaterError::protocol_error("connection already closed"));
        }
        self.send(line)?;
        let reply = self.read_reply()?;
        if reply.is_transient() {
            return Err(UpdaterError::transfer_error(reply.to_string()));
        }
        Ok(reply)
    }

    fn passive(&mut self) -> Result<SocketAddr> {
        if self.peer.is_ipv4() {
            let reply = self.command("PASV")?;
            if reply.code != 227 {
                return Err(UpdaterError::protocol_error(reply.to_string()));
            }
            let port = parse_pasv(&reply.text).ok_or_else(|| {
                UpdaterError::protocol_error(format!("cannot parse PASV reply '{reply}'"))
            })?;
            // The advertised host is ignored; servers behind NAT often get it wrong.
            Ok(SocketAddr::new(self.peer.ip(), port))
        } else {
            let reply = self.command("EPSV")?;
            if reply.code != 229 {
                return Err(UpdaterError::protocol_error(reply.to_string()));
            }
            let port = parse_epsv(&reply.text).ok_or_else(|| {
                UpdaterError::protocol_error(format!("cannot parse EPSV reply '{reply}'"))
            })?;
            Ok(SocketAddr::new(self.peer.ip(), port))
        }
    }

    /// Opens a passive data connection, issues `line` and streams the data
    /// channel into `on_chunk`.
    fn transfer(
        &mut self,
        line: &str,
        subject: &str,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let address = self.passive()?;
        let mut data = TcpStream::connect(address).map_err(|source| UpdaterError::Connection {
            address: address.to_string(),
            source,
        })?;

        let reply = self.command(line)?;
        if !reply.is_preliminary() {
            return Err(match reply.code {
                550 => UpdaterError::NotFound {
                    name: subject.to_string(),
                    message: reply.to_string(),
                },
                _ => UpdaterError::protocol_error(reply.to_string()),
            });
        }

        let mut buffer = vec![0u8; chunk_size.max(1)];
        loop {
            let read = read_chunk(&mut data, &mut buffer).map_err(|e| {
                UpdaterError::transfer_error(format!("data connection failed: {e}"))
            })?;
            if read == 0 {
                break;
            }
            on_chunk(&buffer[..read])?;
            if read < buffer.len() {
                break;
            }
        }
        drop(data);

        let reply = self.read_reply()?;
        if reply.is_transient() {
            return Err(UpdaterError::transfer_error(reply.to_string()));
        }
        if !reply.is_success() {
            return Err(UpdaterError::protocol_error(reply.to_string()));
        }
        Ok(())
    }
}

impl RemoteSource for FtpConnection {
    fn size(&mut self, name: &str) -> Result<u64> {
        let reply = self.command(&format!("SIZE {name}"))?;
        match reply.code {
            213 => reply.text.trim().parse::<u64>().map_err(|_| {
                UpdaterError::protocol_error(format!("invalid SIZE reply '{reply}'"))
            }),
            550 => Err(UpdaterError::NotFound {
                name: name.to_string(),
                message: reply.to_string(),
            }),
            _ => Err(UpdaterError::protocol_error(reply.to_string())),
        }
    }

    fn retrieve(
        &mut self,
        name: &str,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.transfer(&format!("RETR {name}"), name, chunk_size, on_chunk)
    }

    fn close(&mut self) {
        if let Err(e) = self.quit() {
            debug!("QUIT failed: {e}");
        }
    }
}

impl Drop for FtpConnection {
    fn drop(&mut self) {
        RemoteSource::close(self);
    }
}

/// Fills `buffer` unless the stream ends first; returns the bytes read.
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn parse_reply_line(line: &str) -> Option<(u16, char, &str)> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = code.parse().ok()?;
    match line[3..].chars().next() {
        None => Some((code, ' ', "")),
        Some(separator @ (' ' | '-')) => Some((code, separator, &line[4..])),
        Some(_) => None,
    }
}

/// Port from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv(text: &str) -> Option<u16> {
    text.split(|c: char| !(c.is_ascii_digit() || c == ','))
        .find_map(|token| {
            let fields: Vec<u8> = token
                .split(',')
                .map(|field| field.parse::<u8>())
                .collect::<std::result::Result<_, _>>()
                .ok()?;
            (fields.len() == 6).then(|| (u16::from(fields[4]) << 8) | u16::from(fields[5]))
        })
}

/// Port from `229 Entering Extended Passive Mode (|||port|)`.
fn parse_epsv(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let inner = &text[start + 1..end];
    let delimiter = inner.chars().next()?;
    inner.split(delimiter).nth(3)?.parse().ok()
}

/// `type=file;size=123; name` -> Some(RemoteFile). Non-file facts are skipped.
fn parse_mlsd_line(line: &str) -> Option<RemoteFile> {
    let (facts, name) = line.split_once(' ')?;
    let mut is_file = false;
    let mut size = None;

    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let (key, value) = fact.split_once('=')?;
        match key.to_ascii_lowercase().as_str() {
            "type" => is_file = value.eq_ignore_ascii_case("file"),
            "size" => size = value.parse().ok(),
            _ => {}
        }
    }

    is_file.then(|| RemoteFile {
        name: name.to_string(),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fake_ftp::{FakeFtpServer, ServerScript};
    use crate::core::target::Credentials;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_reply_line() {
        assert_eq!(
            parse_reply_line("220 Service ready"),
            Some((220, ' ', "Service ready"))
        );
        assert_eq!(parse_reply_line("230-Welcome"), Some((230, '-', "Welcome")));
        assert_eq!(parse_reply_line("200"), Some((200, ' ', "")));
        assert_eq!(parse_reply_line("hello"), None);
        assert_eq!(parse_reply_line("2x0 nope"), None);
    }

    #[test]
    fn test_parse_pasv() {
        assert_eq!(
            parse_pasv("Entering Passive Mode (127,0,0,1,195,80)"),
            Some(195 * 256 + 80)
        );
        assert_eq!(parse_pasv("Entering Passive Mode 10,1,2,3,0,21"), Some(21));
        assert_eq!(parse_pasv("Entering Passive Mode (1,2,3)"), None);
    }

    #[test]
    fn test_parse_epsv() {
        assert_eq!(
            parse_epsv("Entering Extended Passive Mode (|||6446|)"),
            Some(6446)
        );
        assert_eq!(parse_epsv("Entering Extended Passive Mode"), None);
    }

    #[test]
    fn test_parse_mlsd_line() {
        assert_eq!(
            parse_mlsd_line("type=file;size=42;modify=20240101000000; tachyon-linux.tar.gz"),
            Some(RemoteFile {
                name: "tachyon-linux.tar.gz".to_string(),
                size: Some(42),
            })
        );
        assert_eq!(parse_mlsd_line("type=dir; archive"), None);
        assert_eq!(parse_mlsd_line("type=cdir; ."), None);
    }

    #[test]
    fn test_read_chunk_fills_buffer() {
        let data = vec![7u8; 20];
        let mut reader = io::Cursor::new(data);
        let mut buffer = [0u8; 8];
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 8);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 8);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 4);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 0);
    }

    fn target_for(server: &FakeFtpServer, credentials: Option<Credentials>) -> TransferTarget {
        TransferTarget {
            host: "127.0.0.1".to_string(),
            port: server.port(),
            remote_directory: "/dist".to_string(),
            remote_file_name: "pkg.tar.gz".to_string(),
            credentials,
        }
    }

    #[test]
    fn test_open_size_and_retrieve() {
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let server = FakeFtpServer::start(ServerScript::new("/dist").with_file("pkg.tar.gz", payload.clone()));

        let mut connection = FtpConnection::open(&target_for(&server, None)).unwrap();
        assert_eq!(connection.size("pkg.tar.gz").unwrap(), 20_000);

        let mut received = Vec::new();
        let mut chunks = Vec::new();
        connection
            .retrieve("pkg.tar.gz", CHUNK_SIZE, &mut |chunk| {
                chunks.push(chunk.len());
                received.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        RemoteSource::close(&mut connection);
        RemoteSource::close(&mut connection);

        assert_eq!(chunks, vec![8192, 8192, 3616]);
        assert_eq!(received, payload);

        let commands = server.finish();
        assert_eq!(commands.first().map(String::as_str), Some("USER anonymous"));
        assert!(commands.contains(&"PASS anonymous@".to_string()));
        assert!(commands.contains(&"CWD /dist".to_string()));
        assert!(commands.contains(&"TYPE I".to_string()));
        assert_eq!(commands.iter().filter(|c| *c == "QUIT").count(), 1);
    }

    #[test]
    fn test_multiline_greeting() {
        let server = FakeFtpServer::start(
            ServerScript::new("/dist").with_greeting(&["220-Welcome", "220-to the mirror", "220 ready"]),
        );
        let mut connection = FtpConnection::connect("127.0.0.1", server.port()).unwrap();
        connection.quit().unwrap();
        server.finish();
    }

    #[test]
    fn test_latin1_greeting() {
        let server = FakeFtpServer::start(
            ServerScript::new("/dist").with_raw_greeting(b"220 Bienvenue sur le serveur \xe9t\xe9"),
        );
        let mut connection = FtpConnection::open(&target_for(&server, None)).unwrap();
        connection.quit().unwrap();

        let commands = server.finish();
        assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
    }

    #[test]
    fn test_rejected_login() {
        let server = FakeFtpServer::start(ServerScript::new("/dist").with_user("bob", "secret"));
        let result = FtpConnection::open(&target_for(&server, Some(Credentials::new("bob", "wrong"))));
        assert!(matches!(result, Err(UpdaterError::Auth { .. })));
        server.finish();
    }

    #[test]
    fn test_missing_directory() {
        let server = FakeFtpServer::start(ServerScript::new("/elsewhere"));
        let result = FtpConnection::open(&target_for(&server, None));
        match result {
            Err(UpdaterError::Navigation { directory, .. }) => assert_eq!(directory, "/dist"),
            other => panic!("expected navigation error, got {:?}", other.err()),
        }
        server.finish();
    }

    #[test]
    fn test_missing_file() {
        let server = FakeFtpServer::start(ServerScript::new("/dist"));
        let mut connection = FtpConnection::open(&target_for(&server, None)).unwrap();
        assert!(matches!(
            connection.size("pkg.tar.gz"),
            Err(UpdaterError::NotFound { .. })
        ));
        let result = connection.retrieve("pkg.tar.gz", CHUNK_SIZE, &mut |_| Ok(()));
        assert!(matches!(result, Err(UpdaterError::NotFound { .. })));
        drop(connection);
        server.finish();
    }

    #[test]
    fn test_aborted_transfer_is_transient() {
        let server = FakeFtpServer::start(
            ServerScript::new("/dist")
                .with_file("pkg.tar.gz", vec![1u8; 30_000])
                .abort_after(10_000),
        );
        let mut connection = FtpConnection::open(&target_for(&server, None)).unwrap();
        let mut received = 0;
        let result = connection.retrieve("pkg.tar.gz", CHUNK_SIZE, &mut |chunk| {
            received += chunk.len();
            Ok(())
        });
        assert!(matches!(result, Err(UpdaterError::Transfer { .. })));
        assert_eq!(received, 10_000);
        drop(connection);
        server.finish();
    }

    #[test]
    fn test_list_files() {
        let server = FakeFtpServer::start(
            ServerScript::new("/dist")
                .with_file("a.tar.gz", vec![0u8; 3])
                .with_file("b.tar.xz", vec![0u8; 5]),
        );
        let mut connection = FtpConnection::open(&target_for(&server, None)).unwrap();
        let files = connection.list_files().unwrap();
        assert_eq!(
            files,
            vec![
                RemoteFile {
                    name: "a.tar.gz".to_string(),
                    size: Some(3),
                },
                RemoteFile {
                    name: "b.tar.xz".to_string(),
                    size: Some(5),
                },
            ]
        );
        drop(connection);
        server.finish();
    }

    #[test]
    fn test_unreachable_host() {
        let port = FakeFtpServer::unused_port();
        let result = FtpConnection::connect("127.0.0.1", port);
        assert!(matches!(result, Err(UpdaterError::Connection { .. })));
    }
}
