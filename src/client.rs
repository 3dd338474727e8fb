//! Blocking client side of the control-socket protocol.
//!
//! A client is a short-lived tool talking to one daemon: it binds its own
//! ephemeral socket path, connects to the target, and performs synchronous
//! request/reply transactions. It shares no state with the server and is
//! meant to run in a separate process.

use crate::cleanup;
use crate::socket;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static BIND_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Failure of one control-socket transaction.
///
/// A failed transaction returns no partial reply body.
#[derive(Debug)]
pub enum TransactError {
    /// Transport failure while sending or receiving.
    Io(io::Error),
    /// The peer violated the reply framing.
    Protocol(String),
}

impl fmt::Display for TransactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactError::Io(e) => write!(f, "control socket I/O error: {e}"),
            TransactError::Protocol(msg) => write!(f, "malformed control reply: {msg}"),
        }
    }
}

impl std::error::Error for TransactError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransactError::Io(e) => Some(e),
            TransactError::Protocol(_) => None,
        }
    }
}

impl From<io::Error> for TransactError {
    fn from(e: io::Error) -> Self {
        TransactError::Io(e)
    }
}

/// Client for one control socket, usable for any number of transactions.
pub struct Client {
    connect_path: PathBuf,
    bind_path: PathBuf,
    stream: BufReader<UnixStream>,
}

impl Client {
    /// Connect to `target`: an absolute socket path, or a bare name resolved
    /// under the runtime directory.
    ///
    /// The client binds a unique ephemeral path of its own,
    /// `<tmpdir>/<program>.<pid>.<counter>`; the file is removed again when
    /// the client is dropped.
    pub fn create(target: &str) -> io::Result<Client> {
        let connect_path = socket::target_path(target);
        let bind_path = std::env::temp_dir().join(format!(
            "{}.{}.{}",
            socket::program_name(),
            std::process::id(),
            BIND_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));

        let sock = match socket::unix_socket(false, Some(&bind_path), Some(&connect_path)) {
            Ok(sock) => sock,
            Err(e) => {
                let _ = fs::remove_file(&bind_path);
                cleanup::remove_file_to_unlink(&bind_path);
                return Err(e);
            }
        };

        Ok(Client {
            connect_path,
            bind_path,
            stream: BufReader::new(sock.into()),
        })
    }

    /// Path of the server socket this client is connected to.
    pub fn target(&self) -> &Path {
        &self.connect_path
    }

    /// Send one request and read its complete reply.
    ///
    /// A newline is appended to `request` if it does not already end in one.
    /// Returns the reply code and the accumulated body; every line of the
    /// returned body ends with `\n`, so a body that was sent without a final
    /// newline gains one.
    pub fn transact(&mut self, request: &str) -> Result<(u16, String), TransactError> {
        let stream = self.stream.get_mut();
        stream.write_all(request.as_bytes())?;
        if !request.ends_with('\n') {
            stream.write_all(b"\n")?;
        }

        let status = self.read_line()?;
        let digits = status.as_bytes();
        if digits.len() < 3 || !digits[..3].iter().all(u8::is_ascii_digit) {
            warn!(
                target = %self.connect_path.display(),
                "reply does not start with 3-digit code"
            );
            return Err(TransactError::Protocol(format!(
                "status line {status:?} does not start with a 3-digit code"
            )));
        }
        let code = digits[..3]
            .iter()
            .fold(0u16, |n, d| n * 10 + u16::from(d - b'0'));

        let mut body = String::new();
        loop {
            let line = self.read_line()?;
            if let Some(unstuffed) = line.strip_prefix('.') {
                if unstuffed.is_empty() {
                    break;
                }
                body.push_str(unstuffed);
            } else {
                body.push_str(&line);
            }
            body.push('\n');
        }
        Ok((code, body))
    }

    fn read_line(&mut self) -> Result<String, TransactError> {
        let mut line = String::new();
        if self.stream.read_line(&mut line)? == 0 {
            warn!(
                target = %self.connect_path.display(),
                "connection closed mid-reply"
            );
            return Err(TransactError::Protocol(
                "unexpected end of file".to_string(),
            ));
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.bind_path);
        cleanup::remove_file_to_unlink(&self.bind_path);
    }
}
