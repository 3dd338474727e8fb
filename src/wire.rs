//! Reply encoding for the control-socket wire protocol.
//!
//! A reply is a status line `<3-digit code> <phrase>\n`, zero or more body
//! lines, and a terminator line containing exactly `.`. Body lines pass
//! through verbatim except that a leading `.` is doubled, so a literal `.`
//! line in the body stays unambiguous.

use crate::buffer::ReplyBuffer;

/// Phrase for a reply code. Codes outside the table map to `"Unknown"`.
pub fn phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        211 => "System Status",
        214 => "Help",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Invalid Argument",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Encode a complete reply into `out`, replacing its contents.
///
/// A trailing newline on `body` does not produce an extra empty line; an
/// empty body produces no body lines at all.
pub fn encode_reply(out: &mut ReplyBuffer, code: u16, body: &str) {
    out.clear();
    out.append_format(format_args!("{:03} {}\n", code, phrase(code)));
    if !body.is_empty() {
        for line in body.strip_suffix('\n').unwrap_or(body).split('\n') {
            if line.as_bytes().first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend(line.as_bytes());
            out.push(b'\n');
        }
    }
    out.extend(b".\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(code: u16, body: &str) -> Vec<u8> {
        let mut out = ReplyBuffer::new();
        encode_reply(&mut out, code, body);
        out.as_slice().to_vec()
    }

    #[test]
    fn test_phrase_table() {
        assert_eq!(phrase(200), "OK");
        assert_eq!(phrase(214), "Help");
        assert_eq!(phrase(501), "Invalid Argument");
        assert_eq!(phrase(599), "Unknown");
        assert_eq!(phrase(0), "Unknown");
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(encode(200, ""), b"200 OK\n.\n");
    }

    #[test]
    fn test_code_is_zero_padded() {
        assert_eq!(encode(42, ""), b"042 Unknown\n.\n");
    }

    #[test]
    fn test_simple_body() {
        assert_eq!(encode(200, "hello\nworld\n"), b"200 OK\nhello\nworld\n.\n");
    }

    #[test]
    fn test_body_without_trailing_newline() {
        assert_eq!(encode(200, "hello"), b"200 OK\nhello\n.\n");
    }

    #[test]
    fn test_blank_body_lines_survive() {
        assert_eq!(encode(200, "a\n\nb\n"), b"200 OK\na\n\nb\n.\n");
    }

    #[test]
    fn test_leading_dot_is_doubled() {
        assert_eq!(encode(200, ".\n"), b"200 OK\n..\n.\n");
        assert_eq!(encode(200, "...\n"), b"200 OK\n....\n.\n");
        assert_eq!(encode(200, ".hidden\n"), b"200 OK\n..hidden\n.\n");
        // A dot later in the line is untouched.
        assert_eq!(encode(200, "a.b\n"), b"200 OK\na.b\n.\n");
    }

    #[test]
    fn test_replaces_previous_contents() {
        let mut out = ReplyBuffer::new();
        encode_reply(&mut out, 500, "stale\n");
        encode_reply(&mut out, 200, "fresh\n");
        assert_eq!(out.as_slice(), b"200 OK\nfresh\n.\n");
    }
}
