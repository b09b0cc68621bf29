//! Construction options for [`Tokenizer`](super::Tokenizer).

use std::path::PathBuf;

use super::bpe::DEFAULT_HEAP_THRESHOLD;
use super::cache::DEFAULT_CACHE_SHARDS;

/// Environment variable naming a directory of `.tiktoken` vocabulary files.
pub const VOCAB_DIR_ENV: &str = "RANKBPE_VOCAB_DIR";

/// Fallback environment variable, shared with tiktoken's on-disk cache.
pub const TIKTOKEN_CACHE_DIR_ENV: &str = "TIKTOKEN_CACHE_DIR";

/// Options applied when a tokenizer is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerConfig {
    /// Compile the split pattern with JIT when the backend supports it.
    pub use_jit: bool,

    /// Use PCRE2 instead of regexr; requires the `pcre2` feature.
    pub use_pcre2: bool,

    /// Number of independently locked chunk cache shards.
    pub cache_shards: usize,

    /// Pieces longer than this are merged with the heap strategy.
    pub heap_threshold: usize,

    /// Reject vocabularies that lack a token for some single byte.
    pub require_byte_coverage: bool,

    /// Directory holding `.tiktoken` files for pretrained encodings.
    pub vocab_dir: Option<PathBuf>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            use_jit: true,
            use_pcre2: false,
            cache_shards: DEFAULT_CACHE_SHARDS,
            heap_threshold: DEFAULT_HEAP_THRESHOLD,
            require_byte_coverage: true,
            vocab_dir: None,
        }
    }
}

impl TokenizerConfig {
    pub fn with_jit(
        self,
        use_jit: bool,
    ) -> Self {
        Self { use_jit, ..self }
    }

    pub fn with_pcre2(
        self,
        use_pcre2: bool,
    ) -> Self {
        Self { use_pcre2, ..self }
    }

    pub fn with_cache_shards(
        self,
        cache_shards: usize,
    ) -> Self {
        Self {
            cache_shards,
            ..self
        }
    }

    pub fn with_heap_threshold(
        self,
        heap_threshold: usize,
    ) -> Self {
        Self {
            heap_threshold,
            ..self
        }
    }

    /// Toy vocabularies without full byte coverage need this turned off.
    pub fn with_byte_coverage(
        self,
        require_byte_coverage: bool,
    ) -> Self {
        Self {
            require_byte_coverage,
            ..self
        }
    }

    pub fn with_vocab_dir(
        self,
        vocab_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vocab_dir: Some(vocab_dir.into()),
            ..self
        }
    }

    /// Vocabulary directory: the configured one, else `RANKBPE_VOCAB_DIR`,
    /// else `TIKTOKEN_CACHE_DIR`.
    pub fn resolve_vocab_dir(&self) -> Option<PathBuf> {
        self.vocab_dir
            .clone()
            .or_else(|| std::env::var_os(VOCAB_DIR_ENV).map(PathBuf::from))
            .or_else(|| std::env::var_os(TIKTOKEN_CACHE_DIR_ENV).map(PathBuf::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TokenizerConfig::default();
        assert!(config.use_jit);
        assert!(!config.use_pcre2);
        assert!(config.require_byte_coverage);
        assert_eq!(config.cache_shards, DEFAULT_CACHE_SHARDS);
        assert_eq!(config.heap_threshold, DEFAULT_HEAP_THRESHOLD);
    }

    #[test]
    fn test_builder() {
        let config = TokenizerConfig::default()
            .with_jit(false)
            .with_cache_shards(2)
            .with_heap_threshold(8)
            .with_byte_coverage(false)
            .with_vocab_dir("/tmp/vocab");
        assert!(!config.use_jit);
        assert_eq!(config.cache_shards, 2);
        assert_eq!(config.heap_threshold, 8);
        assert!(!config.require_byte_coverage);
        assert_eq!(config.resolve_vocab_dir(), Some(PathBuf::from("/tmp/vocab")));
    }
}
