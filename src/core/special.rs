//! Special (control) tokens and the per-call policy for intercepting them.
//!
//! A special token's literal text is only treated as a control token when the
//! caller allows it for that call. Any other special literal found in the input
//! is an error by default, because silently tokenizing untrusted text into
//! control tokens is a prompt-injection vector.

use std::ops::Range;

use aho_corasick::{AhoCorasick, Input};
use rustc_hash::{FxHashMap, FxHashSet};

use super::tokenizer::TokenizerError;
use super::vocab::TokenId;

/// Which special literals a call may intercept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedSpecial {
    /// No special literal is intercepted.
    #[default]
    None,
    /// Every special literal of the tokenizer is intercepted.
    All,
    /// Only the listed literals are intercepted.
    Only(FxHashSet<String>),
}

impl AllowedSpecial {
    pub fn only<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(literals.into_iter().map(Into::into).collect())
    }

    #[inline]
    pub fn allows(&self, literal: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Only(set) => set.contains(literal),
        }
    }
}

/// What to do with a special literal that is present in the text but not allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisallowedSpecial {
    /// Fail with [`TokenizerError::DisallowedSpecialToken`].
    #[default]
    Raise,
    /// Tokenize the literal as ordinary text.
    EncodeAsText,
}

/// Special-token policy for one encode call.
///
/// The default allows nothing and raises on any special literal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialHandling {
    pub allowed: AllowedSpecial,
    pub disallowed: DisallowedSpecial,
}

impl SpecialHandling {
    /// Allow nothing, raise on any special literal.
    pub fn none() -> Self {
        Self::default()
    }

    /// Intercept every special literal.
    pub fn all() -> Self {
        Self {
            allowed: AllowedSpecial::All,
            disallowed: DisallowedSpecial::Raise,
        }
    }

    /// Intercept only `literals`; raise on the others.
    pub fn allow<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: AllowedSpecial::only(literals),
            disallowed: DisallowedSpecial::Raise,
        }
    }

    /// Treat all input as ordinary text.
    pub fn ordinary() -> Self {
        Self {
            allowed: AllowedSpecial::None,
            disallowed: DisallowedSpecial::EncodeAsText,
        }
    }

    /// Switch to the permissive policy for literals that are not allowed.
    pub fn encode_disallowed_as_text(self) -> Self {
        Self {
            disallowed: DisallowedSpecial::EncodeAsText,
            ..self
        }
    }
}

/// Immutable set of special literals with their reserved IDs.
#[derive(Debug, Clone)]
pub struct SpecialTokenSet {
    encoder: FxHashMap<String, TokenId>,
    decoder: FxHashMap<TokenId, String>,
    /// Pattern index -> literal.
    literals: Vec<String>,
    max_literal_len: usize,
    /// Standard-semantics automaton, searched with overlapping iteration.
    matcher: Option<AhoCorasick>,
}

impl Default for SpecialTokenSet {
    fn default() -> Self {
        Self {
            encoder: FxHashMap::default(),
            decoder: FxHashMap::default(),
            literals: Vec::new(),
            max_literal_len: 0,
            matcher: None,
        }
    }
}

impl SpecialTokenSet {
    pub fn new(special_tokens: FxHashMap<String, TokenId>) -> Result<Self, TokenizerError> {
        let mut decoder = FxHashMap::default();
        for (literal, &id) in &special_tokens {
            if literal.is_empty() {
                return Err(TokenizerError::MalformedVocabulary(format!(
                    "special token {id} has an empty literal"
                )));
            }
            if let Some(previous) = decoder.insert(id, literal.clone()) {
                return Err(TokenizerError::MalformedVocabulary(format!(
                    "special token id {id} assigned to both {previous:?} and {literal:?}"
                )));
            }
        }

        let mut literals: Vec<String> = special_tokens.keys().cloned().collect();
        literals.sort_unstable();

        let max_literal_len = literals.iter().map(String::len).max().unwrap_or(0);
        let matcher = if literals.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&literals)?)
        };

        Ok(Self {
            encoder: special_tokens,
            decoder,
            literals,
            max_literal_len,
            matcher,
        })
    }

    #[inline]
    pub fn get(&self, literal: &str) -> Option<TokenId> {
        self.encoder.get(literal).copied()
    }

    #[inline]
    pub fn literal(&self, id: TokenId) -> Option<&str> {
        self.decoder.get(&id).map(String::as_str)
    }

    pub fn contains_id(&self, id: TokenId) -> bool {
        self.decoder.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    pub fn max_token_id(&self) -> Option<TokenId> {
        self.decoder.keys().max().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TokenId)> {
        self.encoder.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Map of literal -> ID.
    pub fn as_map(&self) -> &FxHashMap<String, TokenId> {
        &self.encoder
    }

    /// Reject an allow-list naming a literal this set does not define.
    pub fn validate(&self, handling: &SpecialHandling) -> Result<(), TokenizerError> {
        if let AllowedSpecial::Only(set) = &handling.allowed {
            if let Some(unknown) = set.iter().find(|s| !self.encoder.contains_key(s.as_str())) {
                return Err(TokenizerError::UnknownSpecialToken(unknown.clone()));
            }
        }
        Ok(())
    }

    /// First special literal in `text` that `handling` forbids, with its byte position.
    ///
    /// Every occurrence counts, including one that is a prefix of a longer
    /// allowed literal. Returns `None` under the permissive policy.
    pub fn find_disallowed(&self, text: &str, handling: &SpecialHandling) -> Option<(String, usize)> {
        if handling.disallowed == DisallowedSpecial::EncodeAsText
            || handling.allowed == AllowedSpecial::All
        {
            return None;
        }
        let matcher = self.matcher.as_ref()?;

        matcher
            .find_overlapping_iter(text)
            .filter(|m| !handling.allowed.allows(&self.literals[m.pattern().as_usize()]))
            .min_by_key(|m| (m.start(), m.end()))
            .map(|m| (self.literals[m.pattern().as_usize()].clone(), m.start()))
    }

    /// Next allowed special literal at or after byte `from`.
    ///
    /// Picks the leftmost allowed occurrence, and the longest one among those
    /// sharing a start. Literals that are not allowed never hide an allowed one
    /// they overlap.
    pub fn next_allowed(
        &self,
        text: &str,
        from: usize,
        handling: &SpecialHandling,
    ) -> Option<(Range<usize>, TokenId)> {
        if handling.allowed == AllowedSpecial::None || from >= text.len() {
            return None;
        }
        let matcher = self.matcher.as_ref()?;

        let mut best: Option<(Range<usize>, usize)> = None;
        // Overlapping matches arrive ordered by end offset.
        for m in matcher.find_overlapping_iter(Input::new(text).range(from..)) {
            if let Some((range, _)) = &best {
                if m.end() > range.start + self.max_literal_len {
                    break;
                }
            }
            let pattern = m.pattern().as_usize();
            if !handling.allowed.allows(&self.literals[pattern]) {
                continue;
            }
            let better = match &best {
                None => true,
                Some((range, _)) => {
                    m.start() < range.start || (m.start() == range.start && m.end() > range.end)
                }
            };
            if better {
                best = Some((m.range(), pattern));
            }
        }

        let (range, pattern) = best?;
        let id = self.encoder.get(&self.literals[pattern]).copied()?;
        Some((range, id))
    }
}
