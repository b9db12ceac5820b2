//! Line framing for the newline-delimited wire protocol.
//!
//! Subprocess stdout arrives in arbitrary chunks; a message may be split
//! across reads or several messages may land in one read. `LineBuffer`
//! accumulates bytes and yields only complete newline-terminated lines,
//! keeping any trailing partial data buffered for the next chunk.

/// Byte accumulator that splits a chunked stream into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a chunk of bytes as read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, if one has fully arrived.
    ///
    /// The terminating newline (and a preceding carriage return, if any) is
    /// stripped. Invalid UTF-8 is replaced rather than dropped so a garbled
    /// line still surfaces as loggable noise.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop(); // the newline itself
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Number of buffered bytes not yet part of a complete line.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn whole_line_in_one_chunk() {
        let mut buf = LineBuffer::new();
        buf.push(b"{\"id\":1}\n");
        assert_eq!(buf.next_line().as_deref(), Some("{\"id\":1}"));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.pending_bytes(), 0);
    }

    #[test]
    fn partial_line_stays_buffered_until_completed() {
        let mut buf = LineBuffer::new();
        buf.push(br#"{"jsonrpc":"2.0","id""#);
        assert_eq!(buf.next_line(), None);
        assert!(buf.pending_bytes() > 0);

        buf.push(b":1,\"result\":{}}\n");
        assert_eq!(
            buf.next_line().as_deref(),
            Some(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
        );
        assert_eq!(buf.next_line(), None);
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut buf = LineBuffer::new();
        buf.push(b"first\nsecond\nthird");
        assert_eq!(buf.next_line().as_deref(), Some("first"));
        assert_eq!(buf.next_line().as_deref(), Some("second"));
        assert_eq!(buf.next_line(), None);
        buf.push(b"\n");
        assert_eq!(buf.next_line().as_deref(), Some("third"));
    }

    #[test]
    fn crlf_is_stripped() {
        let mut buf = LineBuffer::new();
        buf.push(b"hello\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("hello"));
    }

    #[test]
    fn empty_line_is_yielded() {
        let mut buf = LineBuffer::new();
        buf.push(b"\n");
        assert_eq!(buf.next_line().as_deref(), Some(""));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_lost() {
        let mut buf = LineBuffer::new();
        buf.push(b"ab\xff\xfecd\n");
        let line = buf.next_line().unwrap();
        assert!(line.starts_with("ab"));
        assert!(line.ends_with("cd"));
    }
}
