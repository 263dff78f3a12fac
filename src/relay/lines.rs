//! Newline framing for real-mode streaming.

/// Splits decoded text into complete lines, each keeping its `\n`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(idx + 1);
            lines.push(std::mem::replace(&mut self.buffer, rest));
        }
        lines
    }

    /// The trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
