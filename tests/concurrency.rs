//! Concurrent use of one tokenizer from many threads.

use std::sync::Arc;
use std::thread;

use rankbpe::{Rank, SpecialHandling, Tokenizer, R50K_BASE_PATTERN};
use rustc_hash::FxHashMap;

/// Threads sharing a cold cache produce the same tokens as a single thread.
#[test]
fn test_shared_tokenizer_across_threads() {
    let reference = create_tokenizer();
    let shared = Arc::new(create_tokenizer());
    let texts: Vec<String> = (0..32)
        .map(|i| format!("the cat sat on mat number {} and the hat {}", i % 7, i))
        .collect();
    let expected: Vec<Vec<u32>> = texts
        .iter()
        .map(|t| reference.encode_ordinary(t).unwrap())
        .collect();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tokenizer = Arc::clone(&shared);
            let texts = texts.clone();
            thread::spawn(move || {
                texts
                    .iter()
                    .map(|t| tokenizer.encode_ordinary(t).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
    assert_eq!(shared.cache_len(), reference.cache_len());
}

/// Batch encoding matches per-text encoding and decodes back.
#[test]
fn test_encode_batch_matches_sequential() {
    let tokenizer = create_tokenizer();
    let texts: Vec<String> = (0..100).map(|i| format!("batch item {i}: the cat")).collect();

    let batch = tokenizer
        .encode_batch(&texts, &SpecialHandling::none())
        .unwrap();
    for (text, tokens) in texts.iter().zip(&batch) {
        assert_eq!(tokens, &tokenizer.encode_ordinary(text).unwrap());
    }
    assert_eq!(tokenizer.decode_batch(&batch).unwrap(), texts);
}

/// One failing text fails the whole batch.
#[test]
fn test_encode_batch_propagates_errors() {
    let tokenizer = create_tokenizer();
    let texts = ["fine", "not <|endoftext|> fine"];
    assert!(tokenizer
        .encode_batch(&texts, &SpecialHandling::none())
        .is_err());
}

fn create_tokenizer() -> Tokenizer {
    let merges: [&[u8]; 6] = [b"th", b"the", b" c", b"at", b" cat", b" the"];
    let mut ranks: FxHashMap<Vec<u8>, Rank> = (0u8..=255).map(|b| (vec![b], b as Rank)).collect();
    for (i, m) in merges.iter().enumerate() {
        ranks.insert(m.to_vec(), 256 + i as Rank);
    }
    let mut special = FxHashMap::default();
    special.insert("<|endoftext|>".to_string(), 50256);
    Tokenizer::from_ranks(ranks, special, R50K_BASE_PATTERN).unwrap()
}
