//! Mergeable vocabulary: byte sequences with a merge rank and a token ID.
//!
//! A [`Vocabulary`] is immutable once built. It answers two questions for the
//! merge engine (what is the rank of this byte sequence, and which token ID does
//! it map to) and one for the decoder (which bytes does this token ID stand for).
//!
//! # Tiktoken Format
//!
//! Vocabularies are usually shipped in the tiktoken text format, one entry per line:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! The first column is the base64-encoded byte sequence, the second its rank.
//! Tiktoken vocabularies use the rank as the token ID, which is what
//! [`Vocabulary::from_ranks`] assumes. Lower ranks merge first.

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::tokenizer::TokenizerError;

/// Merge priority of a byte sequence. Lower merges first.
pub type Rank = u32;

/// Integer identifier of a token.
pub type TokenId = u32;

/// Errors that can occur when loading vocabulary files.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding on line {line}: {source}")]
    Base64Error {
        line: usize,
        #[source]
        source: base64::DecodeError,
    },
    #[error("Invalid line format on line {line}: {reason}")]
    ParseError { line: usize, reason: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Rank and token ID stored for one mergeable byte sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenEntry {
    pub rank: Rank,
    pub id: TokenId,
}

/// Immutable byte-sequence <-> (rank, token ID) table.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    encoder: FxHashMap<Vec<u8>, TokenEntry>,
    decoder: FxHashMap<TokenId, Vec<u8>>,
}

impl Vocabulary {
    /// Build a vocabulary where every token ID equals its rank (tiktoken convention).
    pub fn from_ranks(ranks: FxHashMap<Vec<u8>, Rank>) -> Result<Self, TokenizerError> {
        Self::from_entries(ranks.into_iter().map(|(bytes, rank)| (bytes, rank, rank)))
    }

    /// Build a vocabulary from `(bytes, rank, id)` triples.
    ///
    /// Fails with [`TokenizerError::MalformedVocabulary`] if a byte sequence is
    /// empty or listed twice, or if two sequences share a token ID.
    pub fn from_entries<I>(entries: I) -> Result<Self, TokenizerError>
    where
        I: IntoIterator<Item = (Vec<u8>, Rank, TokenId)>,
    {
        let entries = entries.into_iter();
        let (lower, _) = entries.size_hint();
        let mut encoder = FxHashMap::with_capacity_and_hasher(lower, Default::default());
        let mut decoder = FxHashMap::with_capacity_and_hasher(lower, Default::default());

        for (bytes, rank, id) in entries {
            if bytes.is_empty() {
                return Err(TokenizerError::MalformedVocabulary(format!(
                    "token {id} has an empty byte sequence"
                )));
            }
            if encoder.contains_key(&bytes) {
                return Err(TokenizerError::MalformedVocabulary(format!(
                    "byte sequence {bytes:?} listed more than once"
                )));
            }
            if let Some(previous) = decoder.insert(id, bytes.clone()) {
                return Err(TokenizerError::MalformedVocabulary(format!(
                    "token id {id} assigned to both {previous:?} and {bytes:?}"
                )));
            }
            encoder.insert(bytes, TokenEntry { rank, id });
        }

        Ok(Self { encoder, decoder })
    }

    /// Check that every single byte value has a token.
    ///
    /// This is the base case the merge engine relies on: any chunk can always be
    /// expressed as a sequence of single-byte tokens.
    pub fn validate_byte_coverage(&self) -> Result<(), TokenizerError> {
        for b in 0u8..=255 {
            if !self.encoder.contains_key([b].as_slice()) {
                return Err(TokenizerError::MalformedVocabulary(format!(
                    "no token for single byte 0x{b:02x}"
                )));
            }
        }
        Ok(())
    }

    /// Look up the rank and ID of a byte sequence.
    #[inline]
    pub fn entry(&self, bytes: &[u8]) -> Option<TokenEntry> {
        self.encoder.get(bytes).copied()
    }

    #[inline]
    pub fn rank(&self, bytes: &[u8]) -> Option<Rank> {
        self.encoder.get(bytes).map(|e| e.rank)
    }

    #[inline]
    pub fn token_id(&self, bytes: &[u8]) -> Option<TokenId> {
        self.encoder.get(bytes).map(|e| e.id)
    }

    /// Bytes of an ordinary token.
    #[inline]
    pub fn token_bytes(&self, id: TokenId) -> Option<&[u8]> {
        self.decoder.get(&id).map(Vec::as_slice)
    }

    pub fn contains_id(&self, id: TokenId) -> bool {
        self.decoder.contains_key(&id)
    }

    /// Number of mergeable tokens.
    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    pub fn max_token_id(&self) -> Option<TokenId> {
        self.decoder.keys().max().copied()
    }

    /// All token byte sequences in lexicographic order.
    pub fn sorted_token_bytes(&self) -> Vec<&[u8]> {
        let mut bytes: Vec<&[u8]> = self.encoder.keys().map(Vec::as_slice).collect();
        bytes.sort_unstable();
        bytes
    }

    /// Iterate over `(bytes, entry)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], TokenEntry)> {
        self.encoder.iter().map(|(k, v)| (k.as_slice(), *v))
    }
}

/// Load a tiktoken BPE vocabulary from raw bytes.
///
/// Format: `base64_token rank\n` per line. Blank lines are skipped.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let mut ranks = FxHashMap::default();

    for (idx, line) in data.split(|&b| b == b'\n').enumerate() {
        let line_no = idx + 1;
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let space_pos =
            line.iter()
                .rposition(|&b| b == b' ')
                .ok_or_else(|| VocabError::ParseError {
                    line: line_no,
                    reason: "missing space separator".to_string(),
                })?;

        let token = STANDARD
            .decode(&line[..space_pos])
            .map_err(|source| VocabError::Base64Error {
                line: line_no,
                source,
            })?;

        let rank_str =
            std::str::from_utf8(&line[space_pos + 1..]).map_err(|_| VocabError::ParseError {
                line: line_no,
                reason: "invalid UTF-8 in rank".to_string(),
            })?;
        let rank: Rank = rank_str
            .trim()
            .parse()
            .map_err(|_| VocabError::ParseError {
                line: line_no,
                reason: format!("invalid rank: {rank_str:?}"),
            })?;

        ranks.insert(token, rank);
    }

    Ok(ranks)
}

/// Load a tiktoken BPE vocabulary from a file path.
pub fn load_tiktoken_bpe_file(
    path: impl AsRef<std::path::Path>,
) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let data = std::fs::read(path)?;
    load_tiktoken_bpe(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_tiktoken_bpe() {
        // "Hello" base64 = "SGVsbG8="
        // "World" base64 = "V29ybGQ="
        let data = b"SGVsbG8= 0\nV29ybGQ= 1\n";
        let ranks = load_tiktoken_bpe(data).unwrap();

        assert_eq!(ranks.get(b"Hello".as_slice()), Some(&0));
        assert_eq!(ranks.get(b"World".as_slice()), Some(&1));
        assert_eq!(ranks.len(), 2);
    }

    #[test]
    fn test_load_tiktoken_bpe_crlf() {
        let data = b"SGVsbG8= 0\r\n\r\nV29ybGQ= 1\r\n";
        let ranks = load_tiktoken_bpe(data).unwrap();
        assert_eq!(ranks.len(), 2);
    }

    #[test]
    fn test_load_reports_line_number() {
        let data = b"SGVsbG8= 0\nV29ybGQ=\n";
        match load_tiktoken_bpe(data) {
            Err(VocabError::ParseError { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }

        let data = b"SGVsbG8= zero\n";
        assert!(matches!(
            load_tiktoken_bpe(data),
            Err(VocabError::ParseError { line: 1, .. })
        ));

        let data = b"!!!! 0\n";
        assert!(matches!(
            load_tiktoken_bpe(data),
            Err(VocabError::Base64Error { line: 1, .. })
        ));
    }

    #[test]
    fn test_from_ranks_ids_equal_ranks() {
        let mut ranks = FxHashMap::default();
        ranks.insert(b"Hello".to_vec(), 0);
        ranks.insert(b"World".to_vec(), 1);

        let vocab = Vocabulary::from_ranks(ranks).unwrap();
        assert_eq!(vocab.token_bytes(0), Some(b"Hello".as_slice()));
        assert_eq!(vocab.token_bytes(1), Some(b"World".as_slice()));
        assert_eq!(
            vocab.entry(b"World"),
            Some(TokenEntry { rank: 1, id: 1 })
        );
        assert_eq!(vocab.max_token_id(), Some(1));
    }

    #[test]
    fn test_duplicate_id_is_malformed() {
        let entries = vec![(b"a".to_vec(), 0, 7), (b"b".to_vec(), 1, 7)];
        assert!(matches!(
            Vocabulary::from_entries(entries),
            Err(TokenizerError::MalformedVocabulary(_))
        ));
    }

    #[test]
    fn test_empty_sequence_is_malformed() {
        let entries = vec![(Vec::new(), 0, 0)];
        assert!(matches!(
            Vocabulary::from_entries(entries),
            Err(TokenizerError::MalformedVocabulary(_))
        ));
    }

    #[test]
    fn test_byte_coverage() {
        let full = Vocabulary::from_entries((0u8..=255).map(|b| (vec![b], b as u32, b as u32)))
            .unwrap();
        assert!(full.validate_byte_coverage().is_ok());

        let partial =
            Vocabulary::from_entries((0u8..255).map(|b| (vec![b], b as u32, b as u32))).unwrap();
        let err = partial.validate_byte_coverage().unwrap_err();
        assert!(err.to_string().contains("0xff"));
    }

    #[test]
    fn test_sorted_token_bytes() {
        let entries = vec![
            (b"b".to_vec(), 0, 0),
            (b"ab".to_vec(), 1, 1),
            (b"a".to_vec(), 2, 2),
        ];
        let vocab = Vocabulary::from_entries(entries).unwrap();
        assert_eq!(
            vocab.sorted_token_bytes(),
            vec![b"a".as_slice(), b"ab".as_slice(), b"b".as_slice()]
        );
    }
}
