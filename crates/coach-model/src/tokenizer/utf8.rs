/// Reassembles text from token pieces that may split multi-byte characters.
///
/// Bytes are buffered until they form complete UTF-8 sequences; invalid
/// sequences become U+FFFD instead of being dropped.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and returns whatever text is now complete.
    pub fn push(&mut self, fragment: &[u8]) -> String {
        self.pending.extend_from_slice(fragment);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete tail: wait for the next fragment.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes still waiting for the rest of their character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Flushes the buffer; a dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
