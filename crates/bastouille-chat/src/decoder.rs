use tracing::warn;

/// Splits an incrementally delivered byte stream into newline-delimited lines.
///
/// Bytes after the last `\n` stay buffered until the next chunk, so a record
/// (or a multi-byte UTF-8 sequence) cut by a chunk boundary is reassembled
/// before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Appends a chunk and returns every complete, non-blank line, trimmed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            if let Some(line) = decode_line(&line[..idx]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Takes whatever is left in the buffer as a final line.
    ///
    /// The buffer is empty afterwards whether or not a line was produced.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }

    /// Drops any buffered partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of bytes waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(len = bytes.len(), "dropping non-UTF-8 stream line: {e}");
            return None;
        }
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_buffers_tail() {
        let mut decoder = LineDecoder::default();
        let lines = decoder.push_chunk(b"{\"a\":1}\n{\"b\":");
        assert_eq!(lines, vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.buffered_len(), 5);

        let lines = decoder.push_chunk(b"2}\n");
        assert_eq!(lines, vec!["{\"b\":2}".to_string()]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn skips_blank_lines_and_trims_crlf() {
        let mut decoder = LineDecoder::default();
        let lines = decoder.push_chunk(b"\n  \r\n{\"a\":1}\r\n\n");
        assert_eq!(lines, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn reassembles_utf8_split_across_chunks() {
        let text = "Bonjour ⚠️\n".as_bytes();
        let split = text.iter().position(|b| *b >= 0x80).expect("multibyte") + 1;
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(&text[..split]).is_empty());
        assert_eq!(decoder.push_chunk(&text[split..]), vec!["Bonjour ⚠️".to_string()]);
    }

    #[test]
    fn finish_returns_trailing_line_once() {
        let mut decoder = LineDecoder::default();
        decoder.push_chunk(b"{\"a\":1}");
        assert_eq!(decoder.finish(), Some("{\"a\":1}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn invalid_utf8_line_is_dropped_without_losing_the_next() {
        let mut decoder = LineDecoder::default();
        let lines = decoder.push_chunk(b"\xff\xfe\n{\"ok\":true}\n");
        assert_eq!(lines, vec!["{\"ok\":true}".to_string()]);
    }
}
