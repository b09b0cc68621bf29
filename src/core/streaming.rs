//! UTF-8 safe streaming decoder for token-by-token output.
//!
//! A token's bytes may end in the middle of a multi-byte character. The decoder
//! buffers the incomplete tail and only emits complete characters.

use super::tokenizer::{Tokenizer, TokenizerError};
use super::vocab::TokenId;

/// A streaming decoder that handles incomplete UTF-8 sequences across token boundaries.
///
/// Unknown token IDs are reported, never skipped. Byte sequences that can never
/// become valid UTF-8 are emitted as U+FFFD as soon as they are recognized.
///
/// # Example
///
/// ```ignore
/// let mut decoder = StreamingDecoder::new(&tokenizer);
///
/// for token_id in token_stream {
///     if let Some(text) = decoder.add_token(token_id)? {
///         print!("{}", text);
///     }
/// }
/// print!("{}", decoder.flush());
/// ```
#[derive(Debug)]
pub struct StreamingDecoder<'a> {
    tokenizer: &'a Tokenizer,
    buffer: Vec<u8>,
}

impl<'a> StreamingDecoder<'a> {
    pub fn new(tokenizer: &'a Tokenizer) -> Self {
        Self {
            tokenizer,
            buffer: Vec::with_capacity(16),
        }
    }

    /// Add a token and return any complete UTF-8 characters.
    ///
    /// Returns `Ok(None)` while the buffered bytes are still incomplete.
    pub fn add_token(&mut self, token_id: TokenId) -> Result<Option<String>, TokenizerError> {
        let bytes = self.tokenizer.decode_single_token_bytes(token_id)?;
        self.buffer.extend_from_slice(bytes);
        Ok(self.extract_complete_utf8())
    }

    /// Add several tokens and return any complete UTF-8 characters.
    ///
    /// On an unknown ID nothing from `token_ids` is buffered.
    pub fn add_tokens(&mut self, token_ids: &[TokenId]) -> Result<Option<String>, TokenizerError> {
        let bytes = self.tokenizer.decode_bytes(token_ids)?;
        self.buffer.extend_from_slice(&bytes);
        Ok(self.extract_complete_utf8())
    }

    /// Flush any remaining buffered bytes.
    ///
    /// An incomplete trailing sequence becomes U+FFFD.
    pub fn flush(&mut self) -> String {
        let result = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        result
    }

    /// Discard any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn extract_complete_utf8(&mut self) -> Option<String> {
        let mut out = String::new();
        let mut consumed = 0;

        while consumed < self.buffer.len() {
            let rest = &self.buffer[consumed..];
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    consumed = self.buffer.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        // Incomplete tail; wait for more bytes.
                        None => {
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.buffer.drain(..consumed);
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
