//! Incremental UTF-8 decoding of a chunked body.
//!
//! Multi-byte characters may straddle chunk boundaries; incomplete trailing
//! bytes are held until the next chunk. Invalid sequences become U+FFFD.

use std::borrow::Cow;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of body.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        match String::from_utf8_lossy(&rest) {
            Cow::Borrowed(text) => text.to_string(),
            Cow::Owned(text) => text,
        }
    }
}
