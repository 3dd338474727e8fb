//! ctlsock: an administrative control channel for long-lived daemons.
//!
//! A daemon embeds a [`Server`] listening on a local domain socket and
//! registers named commands; an external tool uses a [`Client`] to send one
//! command line and receive a structured, status-coded, multi-line reply —
//! runtime introspection and management without restarting the daemon.
//!
//! The server is single-threaded, non-blocking, and poll-driven. A hosting
//! event loop calls [`Server::run`], declares interests with
//! [`Server::wait`], then blocks on its poll:
//!
//! ```no_run
//! use ctlsock::{CommandRegistry, Connection, Server};
//! use std::rc::Rc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CommandRegistry::new();
//! registry.register(
//!     "version",
//!     Rc::new(|conn: &mut Connection, _args: &str| conn.reply(200, "demo 0.1.0\n")),
//! );
//!
//! let mut server = Server::create(None, registry)?;
//! let mut poll = mio::Poll::new()?;
//! let mut events = mio::Events::with_capacity(64);
//! loop {
//!     server.run();
//!     server.wait(poll.registry())?;
//!     poll.poll(&mut events, None)?;
//! }
//! # }
//! ```
//!
//! Wire protocol: a request is one newline-terminated line
//! `<command>[ <args>]` (a trailing `\r` is tolerated); a reply is a status
//! line `<3-digit code> <phrase>`, body lines passed through verbatim except
//! that a leading `.` is doubled, and a terminating line containing exactly
//! `.`.

pub mod buffer;
pub mod cleanup;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod ratelimit;
pub mod server;
pub mod socket;
pub mod wire;

pub use client::{Client, TransactError};
pub use command::{CommandRegistry, Handler};
pub use connection::{ConnState, Connection};
pub use server::Server;
