//! rankbpe - rank-ordered byte-pair encoding tokenizer
//!
//! - Rank-ordered BPE merge with a heap-driven arena for long chunks
//! - Fail-closed special token handling: control tokens are only produced for
//!   literals the caller allows on that call
//! - Token-granular truncation that reports the consumed input boundary
//! - Sharded chunk cache shared across threads
//! - Regexr with JIT for pre-tokenization, PCRE2 behind the `pcre2` feature
//! - Rayon parallelism for batch encoding and decoding
//!
//! ```ignore
//! use rankbpe::{SpecialHandling, Tokenizer};
//!
//! let tokenizer = Tokenizer::from_pretrained("cl100k_base")?;
//! let encoded = tokenizer.encode("hello world", &SpecialHandling::none(), Some(1))?;
//! assert_eq!(encoded.tokens.len(), 1);
//! assert!(encoded.truncated);
//! ```

pub mod core;

pub use core::{
    encoding_for_model, from_pretrained, from_pretrained_with, from_pretrained_with_config,
    load_tiktoken_bpe, load_tiktoken_bpe_file, AllowedSpecial, DisallowedSpecial, Encoded,
    PretrainedEncoding, Rank, SpecialHandling, SpecialTokenSet, StreamingDecoder, TokenId,
    Tokenizer, TokenizerConfig, TokenizerError, VocabError, Vocabulary, CL100K_BASE_PATTERN,
    O200K_BASE_PATTERN, R50K_BASE_PATTERN,
};
