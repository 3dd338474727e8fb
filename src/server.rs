//! Control-socket server: the listener and every live connection.
//!
//! The server is single-threaded and never blocks. A hosting event loop
//! drives it in three beats: [`Server::run`] to accept and service
//! connections, [`Server::wait`] to declare readiness interests, then a
//! blocking poll. Command handlers run synchronously inside `run`, so they
//! must never block either — one stalled handler stalls every connection.

use crate::cleanup;
use crate::command::CommandRegistry;
use crate::connection::{ConnState, Connection};
use crate::ratelimit::RateLimit;
use crate::socket;
use mio::net::UnixListener;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Token [`Server::wait`] registers the listening socket under.
pub const LISTENER: Token = Token(usize::MAX);

/// New connections accepted per `run` call, so a busy listener cannot
/// starve connections that already have commands in flight.
const ACCEPT_BURST: usize = 10;

const BACKLOG: i32 = 10;

/// A control socket accepting commands for a running daemon.
pub struct Server {
    path: PathBuf,
    listener: UnixListener,
    listener_registered: bool,
    conns: Slab<Connection>,
    /// Slab keys in accept order; the slab reuses slots, so it cannot
    /// provide this ordering itself.
    order: Vec<usize>,
    registry: CommandRegistry,
    accept_rl: RateLimit,
}

impl Server {
    /// Create a server listening on the resolved control-socket path.
    ///
    /// `path` may be absolute (used verbatim), a bare name (placed under the
    /// runtime directory), or `None` for `<rundir>/<program>.<pid>.ctl`. The
    /// socket file is restricted to owner read/write and registered for
    /// best-effort removal if the process dies on a fatal signal. The
    /// built-in `help` command is registered into `registry`.
    ///
    /// Setup failures (bind, listen, permissions) abort creation with the
    /// underlying error.
    pub fn create(path: Option<&str>, registry: CommandRegistry) -> io::Result<Server> {
        if registry.lookup("help").is_none() {
            registry.register("help", registry.help_handler());
        }

        let path = socket::server_path(path);
        let sock = socket::unix_socket(true, Some(&path), None)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        sock.listen(BACKLOG)?;

        let listener = UnixListener::from_std(sock.into());
        info!(path = %path.display(), "control socket listening");

        Ok(Server {
            path,
            listener,
            listener_registered: false,
            conns: Slab::new(),
            order: Vec::new(),
            registry,
            accept_rl: RateLimit::new(5, 5),
        })
    }

    /// Path of the socket file this server owns.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The command table; hosting programs register their commands here.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Accept pending connections (bounded) and drive every live one.
    ///
    /// Never blocks. A connection whose step fails with anything other than
    /// would-block is torn down and removed from the set.
    pub fn run(&mut self) {
        for _ in 0..ACCEPT_BURST {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let key = self.conns.insert(Connection::new(stream));
                    self.order.push(key);
                    debug!(conn = key, "accepted control connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    if let Some(dropped) = self.accept_rl.admit() {
                        warn!(dropped, error = %e, "accept failed");
                    }
                    break;
                }
            }
        }

        let registry = self.registry.clone();
        let mut dead = Vec::new();
        for &key in &self.order {
            if let Err(e) = self.conns[key].step(&registry) {
                if e.kind() != io::ErrorKind::WouldBlock {
                    debug!(conn = key, error = %e, "closing control connection");
                    dead.push(key);
                }
            }
        }
        for key in dead {
            // Dropping the stream closes the descriptor, which also clears
            // any poll registration it still had.
            self.conns.remove(key);
            self.order.retain(|&k| k != key);
        }
    }

    /// Declare readiness interests with `registry`: reads on the listener
    /// and every Receiving connection, writes on every Sending connection.
    ///
    /// Known descriptors are re-registered each call; re-registration
    /// re-arms edge triggering, so a descriptor that is still ready — the
    /// listener after a capped accept burst, for instance — wakes the host
    /// loop again immediately instead of stalling until new traffic.
    pub fn wait(&mut self, registry: &Registry) -> io::Result<()> {
        if self.listener_registered {
            registry.reregister(&mut self.listener, LISTENER, Interest::READABLE)?;
        } else {
            registry.register(&mut self.listener, LISTENER, Interest::READABLE)?;
            self.listener_registered = true;
        }

        for &key in &self.order {
            let conn = &mut self.conns[key];
            let interest = match conn.state() {
                ConnState::Receiving => Interest::READABLE,
                ConnState::Sending => Interest::WRITABLE,
                ConnState::Processing => continue,
            };
            let token = Token(key);
            if conn.registered {
                registry.reregister(conn.stream_mut(), token, interest)?;
            } else {
                registry.register(conn.stream_mut(), token, interest)?;
                conn.registered = true;
            }
        }
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Connections and the listener close with their descriptors; the
        // socket file needs explicit removal, and its crash-cleanup entry
        // goes with it.
        let _ = fs::remove_file(&self.path);
        cleanup::remove_file_to_unlink(&self.path);
    }
}
