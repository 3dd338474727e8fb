//! Demo daemon hosting a control socket.
//!
//! Registers a few commands (`version`, `echo`, `exit`, plus the built-in
//! `help`) and drives the server from a mio poll loop until a client asks it
//! to exit:
//!
//! ```text
//! $ ctlsockd -s /tmp/demo.ctl &
//! $ ctlsock -t /tmp/demo.ctl echo hello
//! hello
//! ```

use ctlsock::config::Config;
use ctlsock::{CommandRegistry, Connection, Server};
use mio::{Events, Poll};
use std::cell::Cell;
use std::error::Error;
use std::io;
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let registry = CommandRegistry::new();
    let exiting = Rc::new(Cell::new(false));

    registry.register(
        "version",
        Rc::new(|conn: &mut Connection, _args: &str| {
            conn.reply(
                200,
                concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), "\n"),
            );
        }),
    );
    registry.register(
        "echo",
        Rc::new(|conn: &mut Connection, args: &str| {
            let mut body = String::from(args);
            body.push('\n');
            conn.reply(200, &body);
        }),
    );
    {
        let exiting = Rc::clone(&exiting);
        registry.register(
            "exit",
            Rc::new(move |conn: &mut Connection, _args: &str| {
                exiting.set(true);
                conn.reply(200, "");
            }),
        );
    }

    let mut server = Server::create(config.socket.as_deref(), registry)?;
    info!(path = %server.path().display(), "ctlsockd running");

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(64);
    while !exiting.get() {
        server.run();
        if exiting.get() {
            break;
        }
        server.wait(poll.registry())?;
        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    info!("exit requested, shutting down");
    Ok(())
}
