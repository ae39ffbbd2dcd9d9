//! Newline-delimited message framing.
//!
//! The reader loop feeds raw stdout chunks in; complete lines come out. A
//! trailing partial line stays buffered until the bytes that finish it
//! arrive. Blank lines never produce a frame.

/// Reassembles newline-delimited messages from a byte stream.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them.
    ///
    /// Lines are trimmed of surrounding whitespace (including `\r`). Invalid
    /// UTF-8 is replaced rather than dropped, so the JSON decoder reports it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                frames.push(trimmed.to_string());
            }
            start = end + 1;
        }

        self.buffer.drain(..start);
        frames
    }

    /// Bytes held for an incomplete trailing line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drain whatever partial line remains (used at end of stream).
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}
