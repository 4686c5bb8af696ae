//! Minimal passive-mode FTP uploader.
//!
//! Speaks just enough of RFC 959 to put a directory tree on a server:
//! `USER`/`PASS`, `TYPE I`, `MKD` for each remote directory, then `PASV` +
//! `STOR` per file, and `QUIT`.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::config::DeployConfig;
use crate::tools::sourcemap::relative_path;
use crate::tools::{ChannelError, Publisher};

/// A server reply: code plus the text of its last line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    fn is(&self, codes: &[u16]) -> bool {
        codes.contains(&self.code)
    }
}

/// Read one (possibly multi-line) reply.
///
/// A multi-line reply starts with `NNN-` and ends at the first line that
/// starts with the same code followed by a space.
pub async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Reply, ChannelError> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(upload_error("connection closed by server"));
    }
    let code = parse_code(&line)?;

    if line.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{} ", code);
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(upload_error("connection closed inside a multi-line reply"));
            }
            if line.starts_with(&terminator) {
                break;
            }
        }
    }

    let text = line.get(4..).unwrap_or_default().trim_end().to_string();
    Ok(Reply { code, text })
}

fn parse_code(line: &str) -> Result<u16, ChannelError> {
    line.get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| upload_error(format!("malformed reply: {}", line.trim_end())))
}

/// Data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let fields: Vec<u16> =
        text[start + 1..end].split(',').map(|f| f.trim().parse().ok()).collect::<Option<_>>()?;
    match fields.as_slice() {
        [_, _, _, _, hi, lo] if *hi <= 255 && *lo <= 255 => Some(hi * 256 + lo),
        _ => None,
    }
}

fn upload_error(message: impl Into<String>) -> ChannelError {
    ChannelError::Upload(message.into())
}

/// Join a remote base directory and a relative path.
pub fn remote_path(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{}/{}", base, relative.trim_start_matches('/'))
}

/// Every remote directory that must exist before `files` are stored, parents
/// first.
fn remote_dirs<'a>(files: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for file in files {
        let mut current = String::new();
        let parts: Vec<&str> = file.split('/').filter(|p| !p.is_empty()).collect();
        for part in parts.iter().take(parts.len().saturating_sub(1)) {
            current.push('/');
            current.push_str(part);
            dirs.insert(current.clone());
        }
    }
    // Sorting puts every parent before its children.
    dirs.into_iter().collect()
}

struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl Control {
    async fn connect(addr: &str) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| upload_error(format!("cannot connect to {}: {}", addr, e)))?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let mut control = Self { reader: BufReader::new(reader), writer, peer };

        let greeting = control.reply().await?;
        if !greeting.is(&[220]) {
            return Err(upload_error(format!("unexpected greeting: {} {}", greeting.code, greeting.text)));
        }
        Ok(control)
    }

    async fn reply(&mut self) -> Result<Reply, ChannelError> {
        read_reply(&mut self.reader).await
    }

    async fn send(&mut self, command: &str) -> Result<Reply, ChannelError> {
        self.writer.write_all(format!("{}\r\n", command).as_bytes()).await?;
        self.writer.flush().await?;
        self.reply().await
    }

    /// Send a command and require one of `expected`.
    async fn expect(&mut self, command: &str, expected: &[u16]) -> Result<Reply, ChannelError> {
        let reply = self.send(command).await?;
        if !reply.is(expected) {
            let shown = if command.starts_with("PASS ") { "PASS ****" } else { command };
            return Err(upload_error(format!("{} failed: {} {}", shown, reply.code, reply.text)));
        }
        Ok(reply)
    }

    async fn login(&mut self, user: &str, password: &str) -> Result<(), ChannelError> {
        let reply = self.expect(&format!("USER {}", user), &[230, 331]).await?;
        if reply.is(&[331]) {
            self.expect(&format!("PASS {}", password), &[230, 202]).await?;
        }
        self.expect("TYPE I", &[200]).await?;
        Ok(())
    }

    async fn store(&mut self, remote: &str, bytes: &[u8]) -> Result<(), ChannelError> {
        let pasv = self.expect("PASV", &[227]).await?;
        let port = parse_pasv_port(&pasv.text)
            .ok_or_else(|| upload_error(format!("bad PASV reply: {}", pasv.text)))?;

        // Data goes to the control host; servers behind NAT report private addresses.
        let mut data = TcpStream::connect(SocketAddr::new(self.peer.ip(), port)).await?;
        self.expect(&format!("STOR {}", remote), &[125, 150]).await?;
        data.write_all(bytes).await?;
        data.shutdown().await?;
        drop(data);

        let done = self.reply().await?;
        if !done.is(&[226, 250]) {
            return Err(upload_error(format!("STOR {} failed: {} {}", remote, done.code, done.text)));
        }
        Ok(())
    }
}

/// Uploads over FTP in passive mode.
#[derive(Clone)]
pub struct FtpPublisher {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl FtpPublisher {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { host: host.into(), port, user: user.into(), password: password.into() }
    }

    /// Build from `[deploy]`, reading the password from the configured
    /// environment variable.
    pub fn from_config(config: &DeployConfig) -> Result<Self, ChannelError> {
        if config.host.is_empty() {
            return Err(upload_error("no deploy host configured ([deploy] host)"));
        }
        let password = std::env::var(&config.password_env).map_err(|_| {
            upload_error(format!("environment variable {} is not set", config.password_env))
        })?;
        Ok(Self::new(&config.host, config.port, &config.user, password))
    }
}

impl std::fmt::Debug for FtpPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpPublisher")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Publisher for FtpPublisher {
    async fn upload(
        &self,
        local_root: &Path,
        files: &[PathBuf],
        remote_base: &str,
    ) -> Result<usize, ChannelError> {
        let mut control = Control::connect(&format!("{}:{}", self.host, self.port)).await?;
        control.login(&self.user, &self.password).await?;

        let remote: Vec<String> =
            files.iter().map(|f| remote_path(remote_base, &relative_path(local_root, f))).collect();

        for dir in remote_dirs(remote.iter().map(String::as_str)) {
            // 550 when the directory already exists.
            let reply = control.send(&format!("MKD {}", dir)).await?;
            tracing::debug!("MKD {}: {}", dir, reply.code);
        }

        for (local, remote) in files.iter().zip(&remote) {
            let bytes = tokio::fs::read(local).await?;
            control.store(remote, &bytes).await?;
            tracing::info!("Uploaded {} ({} bytes)", remote, bytes.len());
        }

        if let Err(e) = control.send("QUIT").await {
            tracing::debug!("QUIT: {}", e);
        }
        Ok(files.len())
    }
}
