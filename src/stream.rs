//! Reassembly of a chat completion from a server-sent-event byte stream.
//!
//! Each significant line looks like `data: {"choices":[{"delta":{"content":"..."}}]}`;
//! the stream is closed by `data: [DONE]`. Everything else is ignored.

use serde_json::Value;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text fragment to append.
    Delta(String),
    /// The terminator; carries nothing.
    Done,
    /// A data line with no usable content: malformed JSON, a role-only
    /// delta, an empty string.
    Empty,
}

/// Classifies one event line. `None` for lines that are not data lines
/// (comments, `event:` fields, blank keep-alives).
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;

    if payload == DONE_MARKER {
        return Some(Frame::Done);
    }

    let frame = match serde_json::from_str::<Value>(payload) {
        Ok(value) => match extract_delta(&value) {
            Some(delta) => Frame::Delta(delta.to_string()),
            None => Frame::Empty,
        },
        Err(e) => {
            tracing::trace!("skipping malformed stream frame: {}", e);
            Frame::Empty
        }
    };
    Some(frame)
}

/// `choices[0].delta.content`, when it is a non-empty string.
pub fn extract_delta(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
}

/// Accumulates deltas across arbitrarily split network chunks.
///
/// A line cut by a chunk boundary is held back until its newline arrives,
/// so neither the JSON nor a multi-byte character is torn in half.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    buffer: String,
    pending: Vec<u8>,
    done_seen: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one chunk. `on_append` runs after every successful append
    /// with the whole buffer so far, once per delta.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_append: F) -> usize
    where
        F: FnMut(&str),
    {
        self.pending.extend_from_slice(chunk);

        let mut appended = 0;
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if self.apply_line(&line) {
                appended += 1;
                on_append(&self.buffer);
            }
        }
        appended
    }

    /// Flushes a final line that arrived without a trailing newline.
    pub fn finish<F>(&mut self, mut on_append: F) -> usize
    where
        F: FnMut(&str),
    {
        if self.pending.is_empty() {
            return 0;
        }
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest);
        if self.apply_line(&line) {
            on_append(&self.buffer);
            1
        } else {
            0
        }
    }

    fn apply_line(&mut self, line: &str) -> bool {
        match parse_line(line) {
            Some(Frame::Delta(delta)) => {
                self.buffer.push_str(&delta);
                true
            }
            Some(Frame::Done) => {
                self.done_seen = true;
                false
            }
            Some(Frame::Empty) | None => false,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn done_seen(&self) -> bool {
        self.done_seen
    }

    pub fn into_content(self) -> String {
        self.buffer
    }
}
