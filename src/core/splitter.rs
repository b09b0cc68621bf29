//! Pre-tokenization: cut text into chunks that are merged independently.
//!
//! The pattern decides how letters, digit runs, whitespace and punctuation are
//! grouped. Text the pattern leaves unmatched is still emitted, one character per
//! chunk, so the chunks always concatenate back to the input.

use std::ops::Range;

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;
use regexr::{Regex as RegexrRegex, RegexBuilder};

use super::tokenizer::TokenizerError;

/// GPT-2 / r50k_base / p50k_base split pattern.
pub const R50K_BASE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// cl100k_base split pattern (GPT-4, GPT-3.5-turbo).
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// o200k_base split pattern (GPT-4o).
pub const O200K_BASE_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Regex backend enum for switching between regexr (default) and PCRE2 (optional)
enum RegexBackend {
    Regexr(Box<RegexrRegex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

impl RegexBackend {
    fn compile(pattern: &str, use_jit: bool, use_pcre2: bool) -> Result<Self, TokenizerError> {
        if use_pcre2 {
            return Self::compile_pcre2(pattern, use_jit);
        }
        let regex = RegexBuilder::new(pattern).jit(use_jit).build()?;
        Ok(RegexBackend::Regexr(Box::new(regex)))
    }

    #[cfg(feature = "pcre2")]
    fn compile_pcre2(pattern: &str, use_jit: bool) -> Result<Self, TokenizerError> {
        let mut builder = pcre2::bytes::RegexBuilder::new();
        if use_jit {
            builder.jit_if_available(true);
        }
        builder.utf(true);
        builder.ucp(true);
        Ok(RegexBackend::Pcre2(builder.build(pattern)?))
    }

    #[cfg(not(feature = "pcre2"))]
    fn compile_pcre2(_pattern: &str, _use_jit: bool) -> Result<Self, TokenizerError> {
        Err(TokenizerError::Pcre2NotEnabled)
    }

    /// Non-empty matches in order, as byte ranges.
    fn matches(&self, text: &str) -> Vec<Range<usize>> {
        match self {
            RegexBackend::Regexr(regex) => regex
                .find_iter(text)
                .map(|m| m.start()..m.end())
                .filter(|r| !r.is_empty())
                .collect(),
            // A match error leaves a gap that the caller fills.
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => regex
                .find_iter(text.as_bytes())
                .filter_map(|m| m.ok())
                .map(|m| m.start()..m.end())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }
}

/// Compiled split pattern.
pub struct Splitter {
    regex: RegexBackend,
    pattern: String,
    use_pcre2: bool,
}

impl std::fmt::Debug for Splitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Splitter")
            .field("pattern", &self.pattern)
            .field("use_pcre2", &self.use_pcre2)
            .finish_non_exhaustive()
    }
}

impl Splitter {
    /// Compile `pattern` with the regexr backend and JIT enabled.
    pub fn new(pattern: &str) -> Result<Self, TokenizerError> {
        Self::with_backend(pattern, true, false)
    }

    /// Compile `pattern` with an explicit backend choice.
    ///
    /// Selecting PCRE2 without the `pcre2` feature fails with
    /// [`TokenizerError::Pcre2NotEnabled`].
    pub fn with_backend(
        pattern: &str,
        use_jit: bool,
        use_pcre2: bool,
    ) -> Result<Self, TokenizerError> {
        let regex = RegexBackend::compile(pattern, use_jit, use_pcre2)?;
        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            use_pcre2,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn uses_pcre2(&self) -> bool {
        self.use_pcre2
    }

    /// Byte ranges of the chunks of `text`.
    ///
    /// Ranges are contiguous, non-empty, start at 0 and end at `text.len()`.
    /// Every boundary is a char boundary.
    pub fn split_ranges(&self, text: &str) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut pos = 0;

        for m in self.regex.matches(text) {
            if m.start < pos {
                continue;
            }
            push_chars(text, pos..m.start, &mut ranges);
            pos = m.end;
            ranges.push(m);
        }
        push_chars(text, pos..text.len(), &mut ranges);

        ranges
    }

    /// Chunks of `text` as string slices.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_ranges(text)
            .into_iter()
            .map(|r| &text[r])
            .collect()
    }
}

/// One range per character of `text[gap]`.
fn push_chars(text: &str, gap: Range<usize>, out: &mut Vec<Range<usize>>) {
    if gap.is_empty() {
        return;
    }
    let base = gap.start;
    out.extend(
        text[gap]
            .char_indices()
            .map(|(i, c)| base + i..base + i + c.len_utf8()),
    );
}
