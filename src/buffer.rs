//! Growable buffers for streaming parse and reply assembly.
//!
//! `InputBuffer` accumulates bytes from non-blocking reads and hands them
//! back out from the front of a logical window, so pulling many short
//! commands off one stream never copies the remainder. `ReplyBuffer` is the
//! append-only text buffer replies are assembled into before being flushed.

use std::fmt::{self, Write as _};

/// Byte buffer with a logical window over its allocation.
///
/// Bytes are appended after the window and consumed from its front; consuming
/// advances the window start in O(1) without moving the remaining bytes. The
/// window snaps back to the start of the allocation only once fully drained.
#[derive(Debug)]
pub struct InputBuffer {
    store: Vec<u8>,
    start: usize,
    used: usize,
}

impl InputBuffer {
    /// Create a buffer with `n` bytes of initial allocation.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            store: vec![0u8; n],
            start: 0,
            used: 0,
        }
    }

    /// Number of bytes in the window.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Total allocation size (for observing growth behavior).
    pub fn capacity(&self) -> usize {
        self.store.len()
    }

    /// Free space after the window.
    pub fn tailroom(&self) -> usize {
        self.store.len() - self.start - self.used
    }

    /// The buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.store[self.start..self.start + self.used]
    }

    /// Grow the allocation if less than `n` bytes of tailroom remain.
    ///
    /// Growth at least doubles the allocation, keeping aggregate copying
    /// linear in the total bytes appended.
    pub fn ensure_tailroom(&mut self, n: usize) {
        if self.tailroom() < n {
            let need = self.start + self.used + n;
            let grown = (self.store.len() * 2).max(need);
            self.store.resize(grown, 0);
        }
    }

    /// Free tail space, for reading into directly. Call [`commit`] with the
    /// number of bytes actually written.
    ///
    /// [`commit`]: InputBuffer::commit
    pub fn tail_mut(&mut self) -> &mut [u8] {
        let tail = self.start + self.used;
        &mut self.store[tail..]
    }

    /// Account `n` bytes written into the tail.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.tailroom(), "commit past tailroom");
        self.used += n;
    }

    /// Append `bytes` after the window, growing as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_tailroom(bytes.len());
        let tail = self.start + self.used;
        self.store[tail..tail + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();
    }

    /// Remove `n` bytes from the front of the window in O(1).
    ///
    /// # Panics
    /// Panics if `n` exceeds the window length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.used, "consume past end of window");
        self.start += n;
        self.used -= n;
        if self.used == 0 {
            self.start = 0;
        }
    }
}

/// Append-only reply assembly buffer.
///
/// Growth doubles the allocation with an 8-byte floor; `clear` keeps the
/// allocation so one buffer serves a connection for its whole lifetime.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total allocation size (for observing growth behavior).
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The assembled bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Reset to empty without releasing the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Grow the allocation so it holds at least `min_len` bytes.
    pub fn reserve(&mut self, min_len: usize) {
        if min_len > self.buf.len() {
            let grown = self.buf.len() + min_len.max(self.buf.len());
            self.buf.resize(grown.max(8), 0);
        }
    }

    /// Append a single byte.
    pub fn push(&mut self, byte: u8) {
        self.reserve(self.len + 1);
        self.buf[self.len] = byte;
        self.len += 1;
    }

    /// Append a byte slice.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.reserve(self.len + bytes.len());
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Append formatted text.
    ///
    /// The first pass formats into the existing spare capacity while counting
    /// the bytes required; only if the spare room was insufficient does the
    /// buffer grow and format a second time. `fmt::Arguments` renders the
    /// same bytes on every pass, so the truncated probe output is simply
    /// overwritten.
    pub fn append_format(&mut self, args: fmt::Arguments<'_>) {
        let needed = {
            let mut w = SpareWriter {
                dst: &mut self.buf[self.len..],
                written: 0,
                needed: 0,
            };
            let _ = write!(w, "{args}");
            if w.needed == w.written {
                self.len += w.written;
                return;
            }
            w.needed
        };
        self.reserve(self.len + needed);
        let mut w = SpareWriter {
            dst: &mut self.buf[self.len..],
            written: 0,
            needed: 0,
        };
        let _ = write!(w, "{args}");
        debug_assert_eq!(w.written, needed);
        self.len += needed;
    }

    /// Shorten the buffer to `n` bytes; a no-op if it is already shorter.
    pub fn truncate(&mut self, n: usize) {
        if self.len > n {
            self.len = n;
        }
    }

    /// The final byte, if any.
    pub fn last(&self) -> Option<u8> {
        self.len.checked_sub(1).map(|i| self.buf[i])
    }

    /// Remove one trailing occurrence of `byte`, if present.
    pub fn chomp(&mut self, byte: u8) {
        if self.last() == Some(byte) {
            self.len -= 1;
        }
    }
}

/// Writer over a fixed slice that keeps counting once it runs out of room.
struct SpareWriter<'a> {
    dst: &'a mut [u8],
    written: usize,
    needed: usize,
}

impl fmt::Write for SpareWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.needed += s.len();
        let room = self.dst.len() - self.written;
        let n = room.min(s.len());
        self.dst[self.written..self.written + n].copy_from_slice(&s.as_bytes()[..n]);
        self.written += n;
        Ok(())
    }
}
