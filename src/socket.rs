//! Unix domain socket plumbing shared by the server and client.
//!
//! One factory covers both sides: the server binds a non-blocking listener,
//! the client binds an ephemeral path and connects. Path resolution follows
//! the control-socket convention: absolute paths verbatim, bare names under
//! the runtime directory.

use crate::cleanup;
use socket2::{Domain, SockAddr, Socket, Type};
use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process;
use tracing::warn;

/// Runtime directory unqualified socket names are placed under.
pub fn rundir() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// File name of the current executable, used in default socket names.
pub fn program_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "ctlsock".to_string())
}

/// Resolve the server's control-socket path.
///
/// An absolute path is used verbatim; a bare name is placed under the
/// runtime directory; `None` yields `<rundir>/<program>.<pid>.ctl`.
pub fn server_path(path: Option<&str>) -> PathBuf {
    match path {
        Some(p) if p.starts_with('/') => PathBuf::from(p),
        Some(p) => rundir().join(p),
        None => rundir().join(format!("{}.{}.ctl", program_name(), process::id())),
    }
}

/// Resolve a client's target the same way, minus the pid default.
pub fn target_path(path: &str) -> PathBuf {
    if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        rundir().join(path)
    }
}

/// Create a stream unix socket, optionally bound and/or connected.
///
/// Non-blocking mode is set before connecting, so a full server backlog
/// cannot block the caller. A stale file at `bind_path` is unlinked first
/// and the fresh one registered for crash cleanup before the bind; the bound
/// file starts at mode 0700 (callers may tighten it further).
pub fn unix_socket(
    nonblock: bool,
    bind_path: Option<&Path>,
    connect_path: Option<&Path>,
) -> io::Result<Socket> {
    let sock = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    if nonblock {
        sock.set_nonblocking(true)?;
    }

    if let Some(path) = bind_path {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "unlinking stale socket failed"),
        }
        cleanup::add_file_to_unlink(path);
        sock.bind(&SockAddr::unix(path)?)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }

    if let Some(path) = connect_path {
        match sock.connect(&SockAddr::unix(path)?) {
            Ok(()) => {}
            // A non-blocking connect may still be in progress; that is not a
            // failure.
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(sock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_server_path_resolution() {
        assert_eq!(
            server_path(Some("/run/daemon.ctl")),
            PathBuf::from("/run/daemon.ctl")
        );

        let named = server_path(Some("daemon.ctl"));
        assert_eq!(named, rundir().join("daemon.ctl"));

        let default = server_path(None);
        let name = default.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains(&format!(".{}.", process::id())));
        assert!(name.ends_with(".ctl"));
    }

    #[test]
    fn test_target_path_resolution() {
        assert_eq!(target_path("/x/y.ctl"), PathBuf::from("/x/y.ctl"));
        assert_eq!(target_path("y.ctl"), rundir().join("y.ctl"));
    }

    #[test]
    fn test_bind_connect_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.sock");

        // A stale file in the way is removed by the factory.
        fs::write(&path, b"stale").unwrap();

        let listener = unix_socket(true, Some(&path), None).unwrap();
        listener.listen(1).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let client = unix_socket(false, None, Some(&path)).unwrap();
        let listener: std::os::unix::net::UnixListener = listener.into();
        let (mut served, _) = listener.accept().unwrap();

        let mut client: std::os::unix::net::UnixStream = client.into();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        served.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        cleanup::remove_file_to_unlink(&path);
    }
}
