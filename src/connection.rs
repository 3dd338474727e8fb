//! Per-connection state machine for the control socket.
//!
//! Each accepted connection cycles Receiving → Processing → Sending →
//! Receiving. Receiving accumulates non-blocking reads until a newline
//! terminates the command line; Processing dispatches the command and must
//! produce exactly one reply; Sending flushes the reply and returns the
//! connection to Receiving. All I/O is non-blocking: `WouldBlock` out of a
//! step means "retry after the next readiness wait", every other error is
//! fatal to this one connection.

use crate::buffer::{InputBuffer, ReplyBuffer};
use crate::command::CommandRegistry;
use crate::ratelimit::RateLimit;
use crate::wire;
use mio::net::UnixStream;
use std::cell::RefCell;
use std::io::{self, Read, Write};
use tracing::warn;

/// A command exceeding this many bytes before its terminating newline kills
/// the connection.
pub const MAX_REQUEST: usize = 64 * 1024;

/// Tailroom guaranteed before each read.
const READ_CHUNK: usize = 128;

thread_local! {
    // Shared throttle for warnings a remote peer can trigger at will.
    static RL: RefCell<RateLimit> = RefCell::new(RateLimit::new(5, 5));
}

fn warn_admit() -> Option<u64> {
    RL.with(|rl| rl.borrow_mut().admit())
}

/// Position in the connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accumulating a command line.
    Receiving,
    /// Dispatching a parsed command; never blocks.
    Processing,
    /// Flushing the assembled reply.
    Sending,
}

/// One accepted control-socket connection.
pub struct Connection {
    stream: UnixStream,
    state: ConnState,
    input: InputBuffer,
    out: ReplyBuffer,
    out_pos: usize,
    /// Whether `Server::wait` has registered the stream with a poll registry.
    pub(crate) registered: bool,
}

impl Connection {
    pub(crate) fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            state: ConnState::Receiving,
            input: InputBuffer::with_capacity(READ_CHUNK),
            out: ReplyBuffer::new(),
            out_pos: 0,
            registered: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn stream_mut(&mut self) -> &mut UnixStream {
        &mut self.stream
    }

    /// Assemble the reply for the command being processed and move to
    /// Sending.
    ///
    /// # Panics
    /// Panics unless the connection is Processing: a reply can only be
    /// produced from inside a command handler, exactly once.
    pub fn reply(&mut self, code: u16, body: &str) {
        assert_eq!(
            self.state,
            ConnState::Processing,
            "reply issued outside command processing"
        );
        self.state = ConnState::Sending;
        self.out_pos = 0;
        wire::encode_reply(&mut self.out, code, body);
    }

    /// Drive the state machine until a pass leaves the state unchanged or an
    /// error (including `WouldBlock`) interrupts it.
    ///
    /// Receiving and Sending loop internally to their own completion or
    /// would-block point, and the outer loop keeps cycling while the state
    /// advances, so pipelined commands buffered by a single read are each
    /// answered — in order — within one call.
    pub(crate) fn step(&mut self, registry: &CommandRegistry) -> io::Result<()> {
        loop {
            let before = self.state;
            match self.state {
                ConnState::Receiving => self.run_input(registry)?,
                // A handler that returned without replying parks the
                // connection here; nothing more to do until teardown.
                ConnState::Processing => {}
                ConnState::Sending => self.run_output()?,
            }
            if self.state == before {
                return Ok(());
            }
        }
    }

    fn run_input(&mut self, registry: &CommandRegistry) -> io::Result<()> {
        loop {
            // Check for a terminator before reading again: an earlier read
            // may have buffered further pipelined commands.
            if let Some(pos) = self.input.as_slice().iter().position(|&b| b == b'\n') {
                let line = &self.input.as_slice()[..pos];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let line = String::from_utf8_lossy(line).into_owned();
                self.input.consume(pos + 1);
                self.process_command(&line, registry);
                return Ok(());
            }

            self.input.ensure_tailroom(READ_CHUNK);
            match self.stream.read(self.input.tail_mut()) {
                Ok(0) => {
                    if !self.input.is_empty() {
                        if let Some(dropped) = warn_admit() {
                            warn!(dropped, "connection dropped mid-command");
                        }
                    }
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Ok(n) => {
                    self.input.commit(n);
                    if self.input.len() > MAX_REQUEST {
                        if let Some(dropped) = warn_admit() {
                            warn!(dropped, "excess command length, killing connection");
                        }
                        return Err(io::ErrorKind::InvalidData.into());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(e),
                Err(e) => {
                    if let Some(dropped) = warn_admit() {
                        warn!(dropped, error = %e, "read failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn process_command(&mut self, line: &str, registry: &CommandRegistry) {
        self.state = ConnState::Processing;

        let (name, args) = match line.find(' ') {
            Some(at) => (&line[..at], line[at..].trim_start_matches(' ')),
            None => (line, ""),
        };

        match registry.lookup(name) {
            Some(handler) => handler(self, args),
            None => {
                let msg = format!("\"{name}\" is not a valid command");
                self.reply(400, &msg);
            }
        }
    }

    fn run_output(&mut self) -> io::Result<()> {
        while self.out_pos < self.out.len() {
            match self.stream.write(&self.out.as_slice()[self.out_pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.out_pos += n,
                Err(e) => return Err(e),
            }
        }
        self.state = ConnState::Receiving;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::rc::Rc;
    use std::time::Duration;

    fn pair() -> (Connection, StdUnixStream) {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        (Connection::new(UnixStream::from_std(ours)), theirs)
    }

    fn test_registry() -> CommandRegistry {
        let registry = CommandRegistry::new();
        registry.register(
            "echo",
            Rc::new(|conn: &mut Connection, args: &str| {
                let mut body = String::from(args);
                body.push('\n');
                conn.reply(200, &body);
            }),
        );
        registry
    }

    /// Read everything the connection has flushed so far.
    fn drain(peer: &mut StdUnixStream) -> Vec<u8> {
        peer.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut all = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match peer.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => all.extend_from_slice(&chunk[..n]),
                Err(_) => break,
            }
        }
        all
    }

    fn assert_would_block(result: io::Result<()>) {
        match result {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            other => panic!("expected WouldBlock, got {other:?}"),
        }
    }

    #[test]
    fn test_echo_round_trip() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(b"echo hello args\n").unwrap();

        // The step answers the command, then parks in Receiving.
        assert_would_block(conn.step(&registry));
        assert_eq!(conn.state(), ConnState::Receiving);
        assert_eq!(drain(&mut peer), b"200 OK\nhello args\n.\n");
    }

    #[test]
    fn test_carriage_return_is_stripped() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(b"echo hi\r\n").unwrap();

        assert_would_block(conn.step(&registry));
        assert_eq!(drain(&mut peer), b"200 OK\nhi\n.\n");
    }

    #[test]
    fn test_unknown_command_replies_400() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(b"bogus\n").unwrap();

        assert_would_block(conn.step(&registry));
        assert_eq!(
            drain(&mut peer),
            b"400 Bad Request\n\"bogus\" is not a valid command\n.\n"
        );
    }

    #[test]
    fn test_pipelined_commands_answered_in_order() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(b"echo one\necho two\n").unwrap();

        // Both commands arrive in one read; a single step answers both
        // without waiting for further readiness.
        assert_would_block(conn.step(&registry));
        assert_eq!(
            drain(&mut peer),
            b"200 OK\none\n.\n200 OK\ntwo\n.\n"
        );
    }

    #[test]
    fn test_help_lists_commands() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();
        registry.register("help", registry.help_handler());

        peer.write_all(b"help\n").unwrap();

        assert_would_block(conn.step(&registry));
        assert_eq!(
            drain(&mut peer),
            b"214 Help\nThe available commands are:\n\techo\n\thelp\n.\n"
        );
    }

    #[test]
    fn test_oversized_command_is_fatal() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(&vec![b'x'; MAX_REQUEST + 1024]).unwrap();

        let err = conn.step(&registry).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_clean_eof_between_commands() {
        let (mut conn, peer) = pair();
        let registry = test_registry();

        drop(peer);
        let err = conn.step(&registry).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_eof_mid_command_is_fatal() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(b"partial comman").unwrap();
        drop(peer);

        let err = conn.step(&registry).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_partial_line_waits_for_more() {
        let (mut conn, mut peer) = pair();
        let registry = test_registry();

        peer.write_all(b"echo par").unwrap();
        assert_would_block(conn.step(&registry));
        assert_eq!(conn.state(), ConnState::Receiving);
        assert!(drain(&mut peer).is_empty());

        peer.write_all(b"tial\n").unwrap();
        assert_would_block(conn.step(&registry));
        assert_eq!(drain(&mut peer), b"200 OK\npartial\n.\n");
    }

    #[test]
    #[should_panic(expected = "reply issued outside command processing")]
    fn test_reply_outside_processing_panics() {
        let (mut conn, _peer) = pair();
        conn.reply(200, "");
    }
}
