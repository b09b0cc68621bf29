//! Core tokenization engine for rankbpe.
//!
//! # Architecture
//!
//! - [`Vocabulary`]: immutable byte-sequence <-> (rank, token ID) table, loaded
//!   from the tiktoken text format
//! - [`SpecialTokenSet`]: control tokens and the per-call [`SpecialHandling`]
//!   policy, matched with Aho-Corasick
//! - [`Splitter`]: pattern-based pre-tokenization (regexr with JIT, optional PCRE2)
//! - [`MergeEngine`]: rank-ordered byte-pair merge over a single chunk
//! - [`ChunkCache`]: sharded, insert-if-absent chunk memoization
//! - [`Tokenizer`]: encode/decode/count on top of the above, with Rayon batch APIs
//! - [`StreamingDecoder`]: UTF-8 safe token-by-token decoding
//! - [`pretrained`]: OpenAI encodings and model-name resolution

mod bpe;
mod cache;
mod config;
pub mod pretrained;
mod special;
mod splitter;
mod streaming;
mod tokenizer;
mod vocab;

pub use bpe::{byte_pair_encode, byte_pair_split, MergeEngine, DEFAULT_HEAP_THRESHOLD};
pub use cache::{ChunkCache, DEFAULT_CACHE_SHARDS};
pub use config::{TokenizerConfig, TIKTOKEN_CACHE_DIR_ENV, VOCAB_DIR_ENV};
pub use pretrained::{
    encoding_for_model, from_pretrained, from_pretrained_with, from_pretrained_with_config,
    DirectorySource, EncodingSpec, PretrainedEncoding, VocabSource,
};
pub use special::{AllowedSpecial, DisallowedSpecial, SpecialHandling, SpecialTokenSet};
pub use splitter::{Splitter, CL100K_BASE_PATTERN, O200K_BASE_PATTERN, R50K_BASE_PATTERN};
pub use streaming::StreamingDecoder;
pub use tokenizer::{Encoded, Tokenizer, TokenizerError};
pub use vocab::{
    load_tiktoken_bpe, load_tiktoken_bpe_file, Rank, TokenEntry, TokenId, VocabError, Vocabulary,
};
