use std::collections::BTreeSet;
use std::path::Path;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::bpe::MergeEngine;
use super::cache::ChunkCache;
use super::config::TokenizerConfig;
use super::special::{SpecialHandling, SpecialTokenSet};
use super::splitter::Splitter;
use super::vocab::{load_tiktoken_bpe, load_tiktoken_bpe_file, Rank, TokenId, VocabError, Vocabulary};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Unknown model or encoding: {0}")]
    UnknownModel(String),
    #[error("Encountered disallowed special token {token:?} at byte {position}")]
    DisallowedSpecialToken { token: String, position: usize },
    #[error("Allowed special token {0:?} is not defined by this tokenizer")]
    UnknownSpecialToken(String),
    #[error("Unknown token id: {0}")]
    UnknownTokenId(TokenId),
    #[error("Byte sequence {0:?} has no token")]
    UnknownByteSequence(Vec<u8>),
    #[error("Malformed vocabulary: {0}")]
    MalformedVocabulary(String),
    #[error("Decoding error: invalid UTF-8")]
    Utf8Error,
    #[error("Regex compilation error (regexr): {0}")]
    RegexrError(#[from] regexr::Error),
    #[cfg(feature = "pcre2")]
    #[error("Regex compilation error (PCRE2): {0}")]
    Pcre2Error(#[from] pcre2::Error),
    #[error("Vocabulary error: {0}")]
    VocabError(#[from] VocabError),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("PCRE2 feature not enabled. Compile with --features pcre2")]
    Pcre2NotEnabled,
}

/// Result of one [`Tokenizer::encode`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    pub tokens: Vec<TokenId>,

    /// Bytes of the input covered by `tokens`.
    ///
    /// After a truncation inside a chunk this may fall inside a multi-byte
    /// character; use [`Encoded::remainder`] to get the rest as bytes.
    pub consumed_bytes: usize,

    /// Whether input was left unencoded because of `max_tokens`.
    pub truncated: bool,
}

impl Encoded {
    /// The part of `text` that was not encoded.
    pub fn remainder<'a>(&self, text: &'a str) -> &'a [u8] {
        &text.as_bytes()[self.consumed_bytes.min(text.len())..]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn into_tokens(self) -> Vec<TokenId> {
        self.tokens
    }
}

/// Rank-ordered BPE tokenizer.
///
/// Encoding runs in four stages: special-token policy check over the whole
/// input, interception of allowed special literals, pattern splitting of the
/// ordinary spans in between, and a cached per-chunk merge.
///
/// A `Tokenizer` is immutable apart from its chunk cache, which is internally
/// synchronized, so one instance can be shared across threads behind an `Arc`.
///
/// # Special Tokens
///
/// Special literals in the input are never turned into control tokens unless
/// the [`SpecialHandling`] passed to the call allows them. By default any
/// special literal in the text fails the call:
///
/// ```ignore
/// let tokens = tokenizer.encode("hi<|endoftext|>", &SpecialHandling::none(), None);
/// assert!(matches!(tokens, Err(TokenizerError::DisallowedSpecialToken { .. })));
///
/// let tokens = tokenizer.encode_with_special("hi<|endoftext|>")?;
/// ```
///
/// # Truncation
///
/// With `max_tokens = Some(n)`, encoding stops as soon as `n` tokens have been
/// produced, possibly in the middle of a chunk. The returned [`Encoded`] tells
/// how many input bytes the tokens cover.
#[derive(Debug)]
pub struct Tokenizer {
    vocab: Vocabulary,
    specials: SpecialTokenSet,
    splitter: Splitter,
    cache: ChunkCache,
    heap_threshold: usize,
    /// Ordinary token IDs ordered by their bytes, for prefix lookups.
    sorted_tokens: Vec<TokenId>,
}

impl Tokenizer {
    /// Create a tokenizer with the default configuration.
    pub fn new(
        vocab: Vocabulary,
        special_tokens: FxHashMap<String, TokenId>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::with_config(vocab, special_tokens, pattern, &TokenizerConfig::default())
    }

    /// Create a tokenizer.
    ///
    /// Fails with [`TokenizerError::MalformedVocabulary`] if a single byte has no
    /// token (unless the check is disabled in `config`) or if a special token ID
    /// is also an ordinary token ID.
    pub fn with_config(
        vocab: Vocabulary,
        special_tokens: FxHashMap<String, TokenId>,
        pattern: &str,
        config: &TokenizerConfig,
    ) -> Result<Self, TokenizerError> {
        if vocab.is_empty() {
            return Err(TokenizerError::MalformedVocabulary(
                "vocabulary is empty".to_string(),
            ));
        }
        if config.require_byte_coverage {
            vocab.validate_byte_coverage()?;
        }
        if let Some((literal, id)) = special_tokens
            .iter()
            .find(|(_, id)| vocab.contains_id(**id))
        {
            return Err(TokenizerError::MalformedVocabulary(format!(
                "special token {literal:?} reuses ordinary token id {id}"
            )));
        }

        let specials = SpecialTokenSet::new(special_tokens)?;
        let splitter = Splitter::with_backend(pattern, config.use_jit, config.use_pcre2)?;

        log::debug!(
            "built tokenizer: {} ordinary tokens, {} special tokens, pcre2={}",
            vocab.len(),
            specials.len(),
            config.use_pcre2
        );

        let sorted_tokens = vocab
            .sorted_token_bytes()
            .into_iter()
            .filter_map(|bytes| vocab.token_id(bytes))
            .collect();

        Ok(Self {
            sorted_tokens,
            vocab,
            specials,
            splitter,
            cache: ChunkCache::new(config.cache_shards),
            heap_threshold: config.heap_threshold,
        })
    }

    /// Create a tokenizer from a rank map where token IDs equal ranks.
    pub fn from_ranks(
        ranks: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, TokenId>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::new(Vocabulary::from_ranks(ranks)?, special_tokens, pattern)
    }

    /// Create a tokenizer from tiktoken-format vocabulary bytes.
    pub fn from_bytes(
        vocab_data: &[u8],
        special_tokens: FxHashMap<String, TokenId>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::from_ranks(load_tiktoken_bpe(vocab_data)?, special_tokens, pattern)
    }

    /// Create a tokenizer from a tiktoken-format vocabulary file.
    pub fn from_file(
        vocab_path: impl AsRef<Path>,
        special_tokens: FxHashMap<String, TokenId>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::from_ranks(load_tiktoken_bpe_file(vocab_path)?, special_tokens, pattern)
    }

    fn engine(&self) -> MergeEngine<'_> {
        MergeEngine::new(&self.vocab).with_heap_threshold(self.heap_threshold)
    }

    /// Encode `text`.
    ///
    /// Special literals are handled according to `handling`. The policy check
    /// covers the whole text, including any part past the truncation point.
    /// `max_tokens` of `None` or `Some(0)` means no limit.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, text, handling)))]
    pub fn encode(
        &self,
        text: &str,
        handling: &SpecialHandling,
        max_tokens: Option<usize>,
    ) -> Result<Encoded, TokenizerError> {
        self.encode_tracked(text, handling, max_tokens)
            .map(|(encoded, _)| encoded)
    }

    /// [`Tokenizer::encode`], also returning how many trailing tokens came from
    /// the last ordinary chunk (0 when the output ends with a special token).
    fn encode_tracked(
        &self,
        text: &str,
        handling: &SpecialHandling,
        max_tokens: Option<usize>,
    ) -> Result<(Encoded, usize), TokenizerError> {
        self.specials.validate(handling)?;
        if let Some((token, position)) = self.specials.find_disallowed(text, handling) {
            return Err(TokenizerError::DisallowedSpecialToken { token, position });
        }

        let limit = match max_tokens {
            None | Some(0) => usize::MAX,
            Some(n) => n,
        };
        let mut out = Encoded::default();
        let mut pos = 0;
        let mut last_piece_len = 0;

        loop {
            let next = self.specials.next_allowed(text, pos, handling);
            let end = next.as_ref().map_or(text.len(), |(range, _)| range.start);

            if let Some(n) = self.encode_span(text, pos..end, limit, &mut out)? {
                last_piece_len = n;
            }
            if out.tokens.len() >= limit {
                break;
            }

            match next {
                Some((range, id)) => {
                    out.tokens.push(id);
                    out.consumed_bytes = range.end;
                    last_piece_len = 0;
                    pos = range.end;
                }
                None => break,
            }
        }

        out.truncated = out.consumed_bytes < text.len();
        Ok((out, last_piece_len))
    }

    /// Encode the ordinary text `text[span]`, stopping once `out` holds `limit` tokens.
    ///
    /// Returns the number of tokens pushed for the last chunk, if any chunk was encoded.
    fn encode_span(
        &self,
        text: &str,
        span: std::ops::Range<usize>,
        limit: usize,
        out: &mut Encoded,
    ) -> Result<Option<usize>, TokenizerError> {
        let offset = span.start;
        let engine = self.engine();
        let mut last = None;

        for chunk in self.splitter.split_ranges(&text[span]) {
            let room = limit.saturating_sub(out.tokens.len());
            if room == 0 {
                return Ok(last);
            }

            let piece = &text.as_bytes()[offset + chunk.start..offset + chunk.end];
            let ids = self.cache.get_or_compute(piece, || engine.merge(piece))?;

            if ids.len() <= room {
                out.tokens.extend_from_slice(&ids);
                out.consumed_bytes = offset + chunk.end;
                last = Some(ids.len());
            } else {
                let kept = &ids[..room];
                out.consumed_bytes += kept
                    .iter()
                    .filter_map(|&id| self.vocab.token_bytes(id))
                    .map(<[u8]>::len)
                    .sum::<usize>();
                out.tokens.extend_from_slice(kept);
                return Ok(Some(room));
            }
        }
        Ok(last)
    }

    /// Encode bytes that may not be valid UTF-8, treating special literals as text.
    ///
    /// The valid UTF-8 prefix is encoded as usual. Its last chunk, together with
    /// any whitespace tokens right before it, is joined with the remaining bytes
    /// and merged as a single piece. Decoding the result gives back `bytes`.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<Vec<TokenId>, TokenizerError> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => return self.encode_ordinary(text),
            Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()])
                .map_err(|_| TokenizerError::Utf8Error)?,
        };

        let (encoded, last) = self.encode_tracked(text, &SpecialHandling::ordinary(), None)?;
        let mut tokens = encoded.tokens;
        let last = self.widen_last_piece(&tokens, last);

        let split = tokens.len() - last;
        let mut piece = self.decode_bytes(&tokens[split..])?;
        piece.extend_from_slice(&bytes[text.len()..]);
        tokens.truncate(split);

        let engine = self.engine();
        let ids = self.cache.get_or_compute(&piece, || engine.merge(&piece))?;
        tokens.extend_from_slice(&ids);
        Ok(tokens)
    }

    /// Encode `text` into stable tokens and the token sequences its unstable tail
    /// may turn into once more text is appended.
    ///
    /// The stable tokens cover a prefix of `text`. The tail is the last ordinary
    /// chunk, widened over whitespace tokens before it; there is none when the
    /// text ends with an allowed special token. Each completion covers at least
    /// the tail's bytes. Completions come back sorted and without duplicates.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, text, handling)))]
    pub fn encode_with_unstable(
        &self,
        text: &str,
        handling: &SpecialHandling,
    ) -> Result<(Vec<TokenId>, Vec<Vec<TokenId>>), TokenizerError> {
        let (encoded, last) = self.encode_tracked(text, handling, None)?;
        let mut tokens = encoded.tokens;
        if last == 0 {
            return Ok((tokens, Vec::new()));
        }
        let last = self.widen_last_piece(&tokens, last);

        let split = tokens.len() - last;
        let unstable = self.decode_bytes(&tokens[split..])?;
        tokens.truncate(split);

        let mut completions: BTreeSet<Vec<TokenId>> = self
            .tokens_with_prefix(&unstable)
            .map(|id| vec![id])
            .collect();

        // A token may straddle the end of the text: keep `unstable[..i]` and let
        // some token starting with `unstable[i..]` complete it.
        let engine = self.engine();
        for i in 1..unstable.len() {
            let (prefix, suffix) = unstable.split_at(i);
            for id in self.tokens_with_prefix(suffix) {
                let mut possibility = prefix.to_vec();
                possibility.extend_from_slice(self.vocab.token_bytes(id).unwrap_or_default());

                // Going through the splitter keeps pattern boundaries the merge alone would miss.
                let encoded = match std::str::from_utf8(&possibility) {
                    Ok(s) => self.encode_ordinary(s)?,
                    Err(_) => engine.merge(&possibility)?,
                };

                let mut seq = Vec::new();
                let mut covered = 0;
                for token in encoded {
                    seq.push(token);
                    covered += self.token_bytes(token).map_or(0, <[u8]>::len);
                    if covered >= unstable.len() {
                        break;
                    }
                }
                completions.insert(seq);
            }
        }

        // Trailing whitespace can split off from what precedes it once text follows.
        if let Some((ch, width)) = last_char(&unstable) {
            if width < unstable.len() && ch.is_whitespace() {
                let (head, tail) = unstable.split_at(unstable.len() - width);
                let mut seq = engine.merge(head)?;
                seq.extend(engine.merge(tail)?);
                completions.insert(seq);
            }
        }

        Ok((tokens, completions.into_iter().collect()))
    }

    /// Widen the trailing `last` tokens backwards over whitespace-only tokens,
    /// since pattern splits around whitespace can move as text is appended.
    fn widen_last_piece(&self, tokens: &[TokenId], mut last: usize) -> usize {
        let all_space = |id: TokenId| {
            self.vocab
                .token_bytes(id)
                .is_some_and(|b| b.iter().all(|c| matches!(c, b' ' | b'\n' | b'\t')))
        };
        if last > 0 && all_space(tokens[tokens.len() - last]) {
            while last < tokens.len() && all_space(tokens[tokens.len() - last - 1]) {
                last += 1;
            }
        }
        last
    }

    /// Ordinary tokens whose bytes start with `prefix`, in byte order.
    fn tokens_with_prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = TokenId> + 'a {
        let start = self
            .sorted_tokens
            .partition_point(|&id| self.vocab.token_bytes(id).unwrap_or_default() < prefix);
        self.sorted_tokens[start..]
            .iter()
            .copied()
            .take_while(move |&id| {
                self.vocab
                    .token_bytes(id)
                    .is_some_and(|b| b.starts_with(prefix))
            })
    }

    /// Encode `text` treating special literals as plain text.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError> {
        self.encode(text, &SpecialHandling::ordinary(), None)
            .map(Encoded::into_tokens)
    }

    /// Encode `text` intercepting every special literal.
    pub fn encode_with_special(&self, text: &str) -> Result<Vec<TokenId>, TokenizerError> {
        self.encode(text, &SpecialHandling::all(), None)
            .map(Encoded::into_tokens)
    }

    /// Number of tokens `text` encodes to.
    pub fn count_tokens(
        &self,
        text: &str,
        handling: &SpecialHandling,
    ) -> Result<usize, TokenizerError> {
        self.encode(text, handling, None).map(|e| e.len())
    }

    /// Token ID of an exact ordinary token or special literal.
    pub fn encode_single_token(&self, bytes: &[u8]) -> Result<TokenId, TokenizerError> {
        if let Some(id) = self.vocab.token_id(bytes) {
            return Ok(id);
        }
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| self.specials.get(s))
            .ok_or_else(|| TokenizerError::UnknownByteSequence(bytes.to_vec()))
    }

    /// Encode many texts in parallel.
    pub fn encode_batch<S>(
        &self,
        texts: &[S],
        handling: &SpecialHandling,
    ) -> Result<Vec<Vec<TokenId>>, TokenizerError>
    where
        S: AsRef<str> + Sync,
    {
        texts
            .par_iter()
            .map(|text| {
                self.encode(text.as_ref(), handling, None)
                    .map(Encoded::into_tokens)
            })
            .collect()
    }

    /// Bytes of an ordinary or special token.
    #[inline]
    pub fn token_bytes(&self, id: TokenId) -> Option<&[u8]> {
        self.vocab
            .token_bytes(id)
            .or_else(|| self.specials.literal(id).map(str::as_bytes))
    }

    pub fn decode_single_token_bytes(&self, id: TokenId) -> Result<&[u8], TokenizerError> {
        self.token_bytes(id)
            .ok_or(TokenizerError::UnknownTokenId(id))
    }

    /// Decode token IDs back to bytes.
    ///
    /// Fails with [`TokenizerError::UnknownTokenId`] on the first ID that is
    /// neither an ordinary nor a special token.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, tokens)))]
    pub fn decode_bytes(&self, tokens: &[TokenId]) -> Result<Vec<u8>, TokenizerError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            result.extend_from_slice(self.decode_single_token_bytes(token)?);
        }
        Ok(result)
    }

    /// Bytes of each token, one entry per ID.
    pub fn decode_tokens_bytes(&self, tokens: &[TokenId]) -> Result<Vec<Vec<u8>>, TokenizerError> {
        tokens
            .iter()
            .map(|&id| self.decode_single_token_bytes(id).map(<[u8]>::to_vec))
            .collect()
    }

    /// Decode token IDs to a string.
    pub fn decode(&self, tokens: &[TokenId]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|_| TokenizerError::Utf8Error)
    }

    /// Decode token IDs to a string, replacing invalid UTF-8 with replacement character.
    pub fn decode_lossy(&self, tokens: &[TokenId]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Batch decode multiple token lists in parallel.
    pub fn decode_batch(
        &self,
        token_lists: &[Vec<TokenId>],
    ) -> Result<Vec<String>, TokenizerError> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode(tokens))
            .collect()
    }

    /// Total number of token ID slots, including special tokens.
    ///
    /// This is the largest token ID plus one.
    pub fn vocab_size(&self) -> usize {
        let max_id = self
            .vocab
            .max_token_id()
            .into_iter()
            .chain(self.specials.max_token_id())
            .max()
            .unwrap_or(0);
        max_id as usize + 1
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn special_tokens(&self) -> &SpecialTokenSet {
        &self.specials
    }

    /// The split pattern source.
    pub fn pattern(&self) -> &str {
        self.splitter.pattern()
    }

    pub fn splitter(&self) -> &Splitter {
        &self.splitter
    }

    /// Number of memoized chunks.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Last character of `bytes` and its width, if `bytes` ends with valid UTF-8.
fn last_char(bytes: &[u8]) -> Option<(char, usize)> {
    (1..=bytes.len().min(4)).find_map(|width| {
        let s = std::str::from_utf8(&bytes[bytes.len() - width..]).ok()?;
        let mut chars = s.chars();
        let ch = chars.next()?;
        chars.next().is_none().then_some((ch, width))
    })
}
