//! Incremental decoder for the chat backend's SSE-style framing.
//!
//! Chunks carry newline-delimited `data: <payload>` frames where the
//! payload is either a JSON delta object or the literal `[DONE]`. Chunks
//! do not align with line boundaries, so an incomplete trailing line is
//! buffered until the next chunk (or the final flush). Malformed frames
//! are skipped; only transport-level failure aborts a decode.

pub struct StreamDecoder {
    /// Raw bytes of the incomplete trailing line. Splitting happens on
    /// `\n` bytes, which never occur inside a multi-byte UTF-8 sequence,
    /// so partial characters stay buffered mid-line.
    pending: Vec<u8>,
    full_content: String,
    finished: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            full_content: String::new(),
            finished: false,
        }
    }

    /// Feed one network chunk. Returns the cumulative content after each
    /// frame that carried a delta, in arrival order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut snapshots = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(snapshot) = self.consume_line(&line) {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Re-check any unconsumed buffered line exactly once after the
    /// stream completes.
    pub fn finish(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let remainder = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&remainder).into_owned();
        self.consume_line(&line)
    }

    pub fn full_content(&self) -> &str {
        &self.full_content
    }

    fn consume_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        let payload = line.strip_prefix("data:")?.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }

        // Malformed JSON is an empty delta, not an error.
        let parsed: serde_json::Value = serde_json::from_str(payload).ok()?;
        let content = parsed
            .pointer("/choices/0/delta/content")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if content.is_empty() {
            return None;
        }

        self.full_content.push_str(content);
        Some(self.full_content.clone())
    }
}
