//! Incremental framing for streamed provider responses.
//!
//! Network chunks arrive at arbitrary byte boundaries. [`LineBuffer`] reassembles complete
//! lines (SSE framing), and [`JsonObjectSplitter`] reassembles complete top-level JSON objects
//! from newline-delimited or array-framed output such as Gemini's `streamGenerateContent`.

/// Accumulates bytes and yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and drain every complete line, without the terminator.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=position).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Flush whatever is left after the stream ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Reassembles top-level JSON objects from a character stream, ignoring the `[`, `,` and `]`
/// framing between them.
#[derive(Debug, Default)]
pub(crate) struct JsonObjectSplitter {
    current: String,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonObjectSplitter {
    pub(crate) fn push(&mut self, text: &str) -> Vec<String> {
        let mut objects = Vec::new();
        for ch in text.chars() {
            if self.depth == 0 {
                if ch == '{' {
                    self.depth = 1;
                    self.current.push(ch);
                }
                continue;
            }

            self.current.push(ch);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        objects.push(std::mem::take(&mut self.current));
                    }
                }
                _ => {}
            }
        }
        objects
    }

    /// Whether an object is partially buffered.
    pub(crate) fn has_partial(&self) -> bool {
        self.depth > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let lines = buffer.push(b":1}\r\ndata: [DONE]\n\npartial");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]", ""]);
        assert_eq!(buffer.finish().as_deref(), Some("partial"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_handles_multibyte_split() {
        let mut buffer = LineBuffer::default();
        let bytes = "héllo\n".as_bytes();
        assert!(buffer.push(&bytes[..2]).is_empty());
        assert_eq!(buffer.push(&bytes[2..]), vec!["héllo"]);
    }

    #[test]
    fn splitter_handles_array_framing() {
        let mut splitter = JsonObjectSplitter::default();
        let mut objects = splitter.push("[{\"text\": \"a\"}\n,");
        objects.extend(splitter.push("{\"text\": \"b}\"}\n]"));
        assert_eq!(objects, vec!["{\"text\": \"a\"}", "{\"text\": \"b}\"}"]);
        assert!(!splitter.has_partial());
    }

    #[test]
    fn splitter_handles_objects_spanning_lines_and_escapes() {
        let mut splitter = JsonObjectSplitter::default();
        assert!(splitter.push("{\"nested\": {\"q\": \"say \\\"hi\\\"\"").is_empty());
        assert!(splitter.has_partial());
        let objects = splitter.push("}}\n");
        assert_eq!(objects, vec!["{\"nested\": {\"q\": \"say \\\"hi\\\"\"}}"]);
    }
}
