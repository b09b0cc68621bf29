//! Registry of the OpenAI encodings and model-name resolution.
//!
//! Vocabulary files are not bundled. They are read through a [`VocabSource`],
//! by default a directory of `.tiktoken` files or a tiktoken download cache (see
//! [`TokenizerConfig::resolve_vocab_dir`]). Nothing here touches the network.
//!
//! # Example
//!
//! ```ignore
//! use rankbpe::{Tokenizer, TokenizerConfig};
//!
//! let config = TokenizerConfig::default().with_vocab_dir("/opt/vocabs");
//! let tokenizer = rankbpe::from_pretrained_with_config("gpt-4", &config)?;
//! ```

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};

use super::config::TokenizerConfig;
use super::splitter::{CL100K_BASE_PATTERN, O200K_BASE_PATTERN, R50K_BASE_PATTERN};
use super::tokenizer::{Tokenizer, TokenizerError};
use super::vocab::{load_tiktoken_bpe, TokenId, VocabError, Vocabulary};

pub const ENDOFTEXT: &str = "<|endoftext|>";
pub const FIM_PREFIX: &str = "<|fim_prefix|>";
pub const FIM_MIDDLE: &str = "<|fim_middle|>";
pub const FIM_SUFFIX: &str = "<|fim_suffix|>";
pub const ENDOFPROMPT: &str = "<|endofprompt|>";

/// Static description of one encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingSpec {
    pub name: &'static str,
    pub pattern: &'static str,
    /// File name of the tiktoken vocabulary.
    pub vocab_file: &'static str,
    /// Published location of the vocabulary; tiktoken caches it under the SHA-1 of this URL.
    pub blob_url: &'static str,
    pub special_tokens: &'static [(&'static str, TokenId)],
    /// Expected number of ordinary plus special tokens, when published.
    pub explicit_n_vocab: Option<usize>,
}

impl EncodingSpec {
    pub fn special_tokens_map(&self) -> FxHashMap<String, TokenId> {
        self.special_tokens
            .iter()
            .map(|&(literal, id)| (literal.to_string(), id))
            .collect()
    }

    /// File name tiktoken's download cache stores this vocabulary under.
    pub fn cache_key(&self) -> String {
        format!("{:x}", Sha1::digest(self.blob_url.as_bytes()))
    }
}

/// Supported encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PretrainedEncoding {
    /// GPT-2 (same ranks as r50k_base)
    Gpt2,
    /// GPT-3 era models (davinci, curie, ...)
    R50kBase,
    /// Codex and text-davinci-002/003
    P50kBase,
    /// p50k_base plus fill-in-the-middle tokens
    P50kEdit,
    /// GPT-4, GPT-3.5-turbo, text-embedding-ada-002
    Cl100kBase,
    /// GPT-4o
    O200kBase,
}

const GPT2: EncodingSpec = EncodingSpec {
    name: "gpt2",
    pattern: R50K_BASE_PATTERN,
    vocab_file: "r50k_base.tiktoken",
    blob_url: "https://openaipublic.blob.core.windows.net/encodings/r50k_base.tiktoken",
    special_tokens: &[(ENDOFTEXT, 50256)],
    explicit_n_vocab: Some(50257),
};

const R50K_BASE: EncodingSpec = EncodingSpec {
    name: "r50k_base",
    pattern: R50K_BASE_PATTERN,
    vocab_file: "r50k_base.tiktoken",
    blob_url: "https://openaipublic.blob.core.windows.net/encodings/r50k_base.tiktoken",
    special_tokens: &[(ENDOFTEXT, 50256)],
    explicit_n_vocab: Some(50257),
};

const P50K_BASE: EncodingSpec = EncodingSpec {
    name: "p50k_base",
    pattern: R50K_BASE_PATTERN,
    vocab_file: "p50k_base.tiktoken",
    blob_url: "https://openaipublic.blob.core.windows.net/encodings/p50k_base.tiktoken",
    special_tokens: &[(ENDOFTEXT, 50256)],
    explicit_n_vocab: Some(50281),
};

const P50K_EDIT: EncodingSpec = EncodingSpec {
    name: "p50k_edit",
    pattern: R50K_BASE_PATTERN,
    vocab_file: "p50k_base.tiktoken",
    blob_url: "https://openaipublic.blob.core.windows.net/encodings/p50k_base.tiktoken",
    special_tokens: &[
        (ENDOFTEXT, 50256),
        (FIM_PREFIX, 50281),
        (FIM_MIDDLE, 50282),
        (FIM_SUFFIX, 50283),
    ],
    explicit_n_vocab: None,
};

const CL100K_BASE: EncodingSpec = EncodingSpec {
    name: "cl100k_base",
    pattern: CL100K_BASE_PATTERN,
    vocab_file: "cl100k_base.tiktoken",
    blob_url: "https://openaipublic.blob.core.windows.net/encodings/cl100k_base.tiktoken",
    special_tokens: &[
        (ENDOFTEXT, 100257),
        (FIM_PREFIX, 100258),
        (FIM_MIDDLE, 100259),
        (FIM_SUFFIX, 100260),
        (ENDOFPROMPT, 100276),
    ],
    explicit_n_vocab: None,
};

const O200K_BASE: EncodingSpec = EncodingSpec {
    name: "o200k_base",
    pattern: O200K_BASE_PATTERN,
    vocab_file: "o200k_base.tiktoken",
    blob_url: "https://openaipublic.blob.core.windows.net/encodings/o200k_base.tiktoken",
    special_tokens: &[(ENDOFTEXT, 199999), (ENDOFPROMPT, 200018)],
    explicit_n_vocab: None,
};

impl PretrainedEncoding {
    pub const ALL: [PretrainedEncoding; 6] = [
        Self::Gpt2,
        Self::R50kBase,
        Self::P50kBase,
        Self::P50kEdit,
        Self::Cl100kBase,
        Self::O200kBase,
    ];

    /// Parse an encoding name such as `cl100k_base`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn spec(self) -> &'static EncodingSpec {
        match self {
            Self::Gpt2 => &GPT2,
            Self::R50kBase => &R50K_BASE,
            Self::P50kBase => &P50K_BASE,
            Self::P50kEdit => &P50K_EDIT,
            Self::Cl100kBase => &CL100K_BASE,
            Self::O200kBase => &O200K_BASE,
        }
    }

    /// ID of `<|endoftext|>`.
    pub fn eos_token_id(self) -> TokenId {
        match self {
            Self::Gpt2 | Self::R50kBase | Self::P50kBase | Self::P50kEdit => 50256,
            Self::Cl100kBase => 100257,
            Self::O200kBase => 199999,
        }
    }
}

use PretrainedEncoding::*;

const MODEL_TO_ENCODING: &[(&str, PretrainedEncoding)] = &[
    // chat
    ("gpt-4o", O200kBase),
    ("gpt-4o-mini", O200kBase),
    ("gpt-4", Cl100kBase),
    ("gpt-4-turbo", Cl100kBase),
    ("gpt-3.5-turbo", Cl100kBase),
    ("gpt-35-turbo", Cl100kBase),
    // text
    ("text-davinci-003", P50kBase),
    ("text-davinci-002", P50kBase),
    ("text-davinci-001", R50kBase),
    ("text-curie-001", R50kBase),
    ("text-babbage-001", R50kBase),
    ("text-ada-001", R50kBase),
    ("davinci", R50kBase),
    ("curie", R50kBase),
    ("babbage", R50kBase),
    ("ada", R50kBase),
    // code
    ("code-davinci-002", P50kBase),
    ("code-davinci-001", P50kBase),
    ("code-cushman-002", P50kBase),
    ("code-cushman-001", P50kBase),
    ("davinci-codex", P50kBase),
    ("cushman-codex", P50kBase),
    // edit
    ("text-davinci-edit-001", P50kEdit),
    ("code-davinci-edit-001", P50kEdit),
    // embeddings
    ("text-embedding-ada-002", Cl100kBase),
    ("text-embedding-3-small", Cl100kBase),
    ("text-embedding-3-large", Cl100kBase),
    // old embeddings
    ("text-similarity-davinci-001", R50kBase),
    ("text-similarity-curie-001", R50kBase),
    ("text-similarity-babbage-001", R50kBase),
    ("text-similarity-ada-001", R50kBase),
    ("text-search-davinci-doc-001", R50kBase),
    ("text-search-curie-doc-001", R50kBase),
    ("text-search-babbage-doc-001", R50kBase),
    ("text-search-ada-doc-001", R50kBase),
    ("code-search-babbage-code-001", R50kBase),
    ("code-search-ada-code-001", R50kBase),
    // open source
    ("gpt2", Gpt2),
];

// Checked in order; more specific prefixes first.
const MODEL_PREFIX_TO_ENCODING: &[(&str, PretrainedEncoding)] = &[
    ("gpt-4o-", O200kBase),
    ("gpt-4-", Cl100kBase),
    ("gpt-3.5-turbo-", Cl100kBase),
    ("gpt-35-turbo-", Cl100kBase),
];

/// Resolve a model or encoding name.
///
/// Encoding names are accepted as-is, then exact model names, then model name
/// prefixes such as `gpt-4-0613`.
pub fn encoding_for_model(model: &str) -> Result<PretrainedEncoding, TokenizerError> {
    if let Some(encoding) = PretrainedEncoding::from_name(model) {
        return Ok(encoding);
    }
    if let Some(&(_, encoding)) = MODEL_TO_ENCODING.iter().find(|(m, _)| *m == model) {
        return Ok(encoding);
    }
    MODEL_PREFIX_TO_ENCODING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|&(_, encoding)| encoding)
        .ok_or_else(|| TokenizerError::UnknownModel(model.to_string()))
}

/// Supplies raw tiktoken vocabulary bytes for an encoding.
pub trait VocabSource {
    fn load(&self, spec: &EncodingSpec) -> Result<Vec<u8>, TokenizerError>;
}

impl<F> VocabSource for F
where
    F: Fn(&EncodingSpec) -> Result<Vec<u8>, TokenizerError>,
{
    fn load(&self, spec: &EncodingSpec) -> Result<Vec<u8>, TokenizerError> {
        self(spec)
    }
}

/// Reads a vocabulary from a directory.
///
/// The tiktoken cache name (`<dir>/<sha1 of blob_url>`) is tried first, then
/// `<dir>/<vocab_file>`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl VocabSource for DirectorySource {
    fn load(&self, spec: &EncodingSpec) -> Result<Vec<u8>, TokenizerError> {
        let cached = self.dir.join(spec.cache_key());
        match std::fs::read(&cached) {
            Ok(data) => {
                log::debug!("loading {} vocabulary from {}", spec.name, cached.display());
                return Ok(data);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VocabError::from(e).into()),
        }

        let path = self.dir.join(spec.vocab_file);
        log::debug!("loading {} vocabulary from {}", spec.name, path.display());
        Ok(std::fs::read(&path).map_err(VocabError::from)?)
    }
}

/// Build the tokenizer for a model or encoding name with the default configuration.
pub fn from_pretrained(name: &str) -> Result<Tokenizer, TokenizerError> {
    from_pretrained_with_config(name, &TokenizerConfig::default())
}

/// Build the tokenizer for a model or encoding name, reading vocabularies from
/// the directory `config` resolves to.
pub fn from_pretrained_with_config(
    name: &str,
    config: &TokenizerConfig,
) -> Result<Tokenizer, TokenizerError> {
    // Resolve the name first so an unknown model is reported as such.
    encoding_for_model(name)?;
    let dir = config.resolve_vocab_dir().ok_or_else(|| {
        VocabError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no vocabulary directory configured",
        ))
    })?;
    from_pretrained_with(name, &DirectorySource::new(dir), config)
}

/// Build the tokenizer for a model or encoding name from an explicit source.
pub fn from_pretrained_with(
    name: &str,
    source: &impl VocabSource,
    config: &TokenizerConfig,
) -> Result<Tokenizer, TokenizerError> {
    let encoding = encoding_for_model(name)?;
    let spec = encoding.spec();
    log::debug!("model {name:?} resolved to encoding {}", spec.name);

    let data = source.load(spec)?;
    let vocab = Vocabulary::from_ranks(load_tiktoken_bpe(&data)?)?;
    let special_tokens = spec.special_tokens_map();

    if let Some(expected) = spec.explicit_n_vocab {
        let actual = vocab.len() + special_tokens.len();
        if actual != expected {
            return Err(TokenizerError::MalformedVocabulary(format!(
                "{} expects {expected} tokens, found {actual}",
                spec.name
            )));
        }
    }

    Tokenizer::with_config(vocab, special_tokens, spec.pattern, config)
}

impl Tokenizer {
    /// Shorthand for [`from_pretrained`].
    pub fn from_pretrained(name: &str) -> Result<Self, TokenizerError> {
        from_pretrained(name)
    }
}
