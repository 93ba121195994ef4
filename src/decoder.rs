//! Incremental byte-to-text decoding for chunked response bodies.
//!
//! The backend streams raw UTF-8 text without any framing, so a multi-byte
//! code point routinely arrives split across two HTTP chunks. The decoder
//! carries the undecodable tail between [`ChunkDecoder::feed`] calls and only
//! gives up on it in [`ChunkDecoder::finish`].

/// Stateful UTF-8 decoder tolerant of code points split across chunks.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of the buffered input as possible and return the newly
    /// completed text fragment. Bytes forming an incomplete trailing sequence
    /// are held back for the next call; an invalid sequence in the interior is
    /// replaced with U+FFFD immediately.
    ///
    /// Feeding an empty slice is a no-op returning an empty fragment.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        if bytes.is_empty() {
            return String::new();
        }
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[..valid_up_to]) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(invalid_len) => {
                            // Invalid sequence in the interior, replace and keep going
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid_len);
                        }
                        None => {
                            // Incomplete trailing sequence, wait for more bytes
                            self.pending.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush the decoder. Any truly incomplete trailing sequence becomes a
    /// single U+FFFD, matching the replacement policy used for interior
    /// invalid bytes. The decoder is empty afterwards.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}
