//! Incremental byte-to-text decoding.
//!
//! Serial chunks arrive at arbitrary boundaries, so a multi-byte UTF-8
//! sequence or a line can be split across reads. [`Utf8StreamDecoder`] keeps
//! the incomplete tail between calls and [`LineDecoder`] additionally
//! accumulates text until a `\n` completes a line.

/// Drain buffered bytes into UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push(char::REPLACEMENT_CHARACTER);
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Stream-safe UTF-8 decoder.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back an incomplete trailing sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        drain_utf8_lossy(&mut self.pending)
    }

    /// Flush the decoder. An incomplete trailing sequence becomes `�`.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    /// Whether bytes of an incomplete sequence are being held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Splits a byte stream into `\n`-terminated lines.
///
/// Holds at most the trailing partial line; emitted lines are removed from
/// the buffer.
#[derive(Debug, Default)]
pub struct LineDecoder {
    decoder: Utf8StreamDecoder,
    buffer: String,
}

impl LineDecoder {
    /// Create an empty line decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, in order.
    ///
    /// Each line keeps its trailing `\n`.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = self.decoder.decode(bytes);
        self.buffer.push_str(&text);

        let mut lines = Vec::new();
        while let Some(end) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(end + 1);
            lines.push(std::mem::replace(&mut self.buffer, rest));
        }
        lines
    }

    /// Text received after the last newline.
    pub fn partial(&self) -> &str {
        &self.buffer
    }

    /// Drop any partial line and held-back bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.decoder = Utf8StreamDecoder::new();
    }
}
