//! UTF-8 aware output chunking
//!
//! Shell output arrives as arbitrary byte runs that can split a multi-byte
//! character. The chunker carries an incomplete trailing sequence over to the
//! next push and cuts text into strings of at most `max` bytes on character
//! boundaries. Invalid sequences become U+FFFD.

/// Largest `terminal_output` payload in bytes
pub const OUTPUT_CHUNK_SIZE: usize = 1024;

#[derive(Debug)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
    max: usize,
}

impl Default for Utf8Chunker {
    fn default() -> Self {
        Self::new(OUTPUT_CHUNK_SIZE)
    }
}

impl Utf8Chunker {
    pub fn new(max: usize) -> Self {
        Self {
            pending: Vec::new(),
            max: max.max(4),
        }
    }

    /// Feed bytes, returning every complete chunk
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let remainder = rest.to_vec();
        self.pending = remainder;
        split_text(&text, self.max)
    }

    /// Flush whatever is left, lossily
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(tail)
    }
}

fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }

    chunks
}
