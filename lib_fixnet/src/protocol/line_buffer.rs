//! # Line Buffer
//!
//! Accumulates raw socket bytes and yields complete `\n` terminated lines.
//!
//! Lines are decoded as UTF-8 only once complete, so a multi-byte character
//! split across two reads is handled. Recovery rules:
//!
//! - A complete line that is not valid UTF-8 yields
//!   [`ProtocolError::InvalidUtf8`]; the buffer continues after that line.
//! - An unterminated line that grows past the frame limit is dropped and the
//!   buffer is reset, yielding [`ProtocolError::FrameTooLong`].

use bytes::BytesMut;

use crate::error::ProtocolError;

/// Largest accepted frame, terminator excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub struct LineBuffer {
    buf: BytesMut,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_LEN)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            limit,
        }
    }

    /// Appends `data` and returns every line it completed, in order.
    pub fn extend(&mut self, data: &[u8]) -> Vec<Result<String, ProtocolError>> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let mut body = &raw[..pos];
            if body.last() == Some(&b'\r') {
                body = &body[..body.len() - 1];
            }
            lines.push(
                std::str::from_utf8(body)
                    .map(str::to_string)
                    .map_err(|_| ProtocolError::InvalidUtf8 { len: body.len() }),
            );
        }

        if self.buf.len() > self.limit {
            self.buf.clear();
            lines.push(Err(ProtocolError::FrameTooLong { limit: self.limit }));
        }
        lines
    }

    /// Bytes of the current unterminated line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_reads() {
        let mut lb = LineBuffer::new();
        assert!(lb.extend(b"AOA;1").is_empty());
        let lines = lb.extend(b"2.3;10100\r\nIAS;9");
        assert_eq!(lines, vec![Ok("AOA;12.3;10100".to_string())]);
        assert_eq!(lb.pending(), 5);
        let lines = lb.extend(b"0\n");
        assert_eq!(lines, vec![Ok("IAS;90".to_string())]);
        assert_eq!(lb.pending(), 0);
    }

    #[test]
    fn multibyte_char_split_across_reads() {
        let mut lb = LineBuffer::new();
        let text = "OAT;12;00000;\u{b0}C\n".as_bytes();
        let (a, b) = text.split_at(text.len() - 3);
        assert!(lb.extend(a).is_empty());
        assert_eq!(lb.extend(b), vec![Ok("OAT;12;00000;\u{b0}C".to_string())]);
    }

    #[test]
    fn invalid_utf8_line_is_discarded_and_next_line_survives() {
        let mut lb = LineBuffer::new();
        let lines = lb.extend(b"AO\xff\xfeA;1\nIAS;90\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], Err(ProtocolError::InvalidUtf8 { len: 7 }));
        assert_eq!(lines[1], Ok("IAS;90".to_string()));
        assert_eq!(lb.pending(), 0);
    }

    #[test]
    fn oversized_unterminated_frame_resets_buffer() {
        let mut lb = LineBuffer::with_limit(8);
        let lines = lb.extend(b"0123456789");
        assert_eq!(lines, vec![Err(ProtocolError::FrameTooLong { limit: 8 })]);
        assert_eq!(lb.pending(), 0);
        assert_eq!(lb.extend(b"IAS;1\n"), vec![Ok("IAS;1".to_string())]);
    }
}
