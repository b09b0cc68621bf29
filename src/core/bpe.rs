//! Byte-pair merge over a single chunk.
//!
//! Each chunk starts as one group per byte. At every step the adjacent pair whose
//! concatenation has the lowest rank in the [`Vocabulary`] is merged; ties go to
//! the leftmost pair. Merging stops when no adjacent pair is in the vocabulary.
//!
//! [`MergeEngine::merge`] first looks the whole chunk up and returns its token
//! directly on a hit; the merge below only runs on a miss.
//!
//! Two strategies produce identical groupings:
//!
//! - a linear scan over a vector of pair ranks, which wins for short chunks
//!   thanks to cache locality, and
//! - an arena linked list (groups addressed by their start offset, with
//!   `next`/`prev` indices) driven by a min-heap of `(rank, position)` with lazy
//!   invalidation, which keeps long chunks from going quadratic.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Range;

use super::tokenizer::TokenizerError;
use super::vocab::{Rank, TokenId, Vocabulary};

/// Chunks longer than this many bytes use the heap strategy.
pub const DEFAULT_HEAP_THRESHOLD: usize = 128;

const NIL: usize = usize::MAX;

/// BPE merge engine bound to one vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine<'v> {
    vocab: &'v Vocabulary,
    heap_threshold: usize,
}

impl<'v> MergeEngine<'v> {
    pub fn new(vocab: &'v Vocabulary) -> Self {
        Self {
            vocab,
            heap_threshold: DEFAULT_HEAP_THRESHOLD,
        }
    }

    /// Set the chunk length above which the heap strategy is used.
    pub fn with_heap_threshold(mut self, heap_threshold: usize) -> Self {
        self.heap_threshold = heap_threshold;
        self
    }

    /// Merge `piece` and return the byte range of every final group.
    pub fn merge_ranges(&self, piece: &[u8]) -> Vec<Range<usize>> {
        match piece.len() {
            0 => Vec::new(),
            1 => vec![0..1],
            n if self.uses_heap(n) => merge_with_heap(piece, self.vocab),
            _ => merge_with_scan(piece, self.vocab),
        }
    }

    /// Whether a piece of `len` bytes is merged with the heap strategy.
    #[inline]
    pub fn uses_heap(&self, len: usize) -> bool {
        len > self.heap_threshold
    }

    /// Merge `piece` and map each final group to its token ID.
    ///
    /// A piece that is itself a vocabulary entry maps straight to that token,
    /// even when the pair merge could not build it.
    ///
    /// Fails with [`TokenizerError::UnknownByteSequence`] only when a final group
    /// has no token, which means the vocabulary lacks a single-byte base token.
    pub fn merge(&self, piece: &[u8]) -> Result<Vec<TokenId>, TokenizerError> {
        if let Some(id) = self.vocab.token_id(piece) {
            return Ok(vec![id]);
        }
        self.merge_ranges(piece)
            .into_iter()
            .map(|r| {
                let group = &piece[r];
                self.vocab
                    .token_id(group)
                    .ok_or_else(|| TokenizerError::UnknownByteSequence(group.to_vec()))
            })
            .collect()
    }

    /// Merge `piece` and return the final groups as byte slices.
    pub fn split<'a>(&self, piece: &'a [u8]) -> Vec<&'a [u8]> {
        self.merge_ranges(piece)
            .into_iter()
            .map(|r| &piece[r])
            .collect()
    }
}

/// Encode one chunk with the default strategy selection.
pub fn byte_pair_encode(piece: &[u8], vocab: &Vocabulary) -> Result<Vec<TokenId>, TokenizerError> {
    MergeEngine::new(vocab).merge(piece)
}

/// Split one chunk into its final merged groups.
pub fn byte_pair_split<'a>(piece: &'a [u8], vocab: &Vocabulary) -> Vec<&'a [u8]> {
    MergeEngine::new(vocab).split(piece)
}

/// Linear scan. `parts[i]` holds the start of group `i` and the rank of the pair
/// formed by groups `i` and `i + 1`; the trailing entry marks the end of the piece.
fn merge_with_scan(piece: &[u8], vocab: &Vocabulary) -> Vec<Range<usize>> {
    let mut parts: Vec<(usize, Option<Rank>)> = (0..=piece.len()).map(|i| (i, None)).collect();

    // Rank of the group starting at `parts[i]` joined with the next `skip + 1` groups.
    let pair_rank = |parts: &[(usize, Option<Rank>)], i: usize, skip: usize| -> Option<Rank> {
        let end = i + skip + 2;
        if end < parts.len() {
            vocab.rank(&piece[parts[i].0..parts[end].0])
        } else {
            None
        }
    };

    for i in 0..parts.len() - 2 {
        parts[i].1 = pair_rank(&parts, i, 0);
    }

    while parts.len() > 2 {
        let mut min: Option<(Rank, usize)> = None;
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if let Some(rank) = rank {
                if min.map_or(true, |(m, _)| rank < m) {
                    min = Some((rank, i));
                }
            }
        }

        let Some((_, i)) = min else {
            break;
        };

        // parts[i + 1] is about to be removed; recompute neighbours as if it
        // already were, then drop it.
        parts[i].1 = pair_rank(&parts, i, 1);
        if i > 0 {
            parts[i - 1].1 = pair_rank(&parts, i - 1, 1);
        }
        parts.remove(i + 1);
    }

    parts.windows(2).map(|w| w[0].0..w[1].0).collect()
}

/// Heap-driven merge over an index-linked arena of groups.
///
/// Group identity is its start offset, which never changes: groups only grow to
/// the right by absorbing their successor. A heap entry `(rank, left, right,
/// right_end)` is live while `left` still links to `right` and `right` still
/// ends at `right_end`.
fn merge_with_heap(piece: &[u8], vocab: &Vocabulary) -> Vec<Range<usize>> {
    let n = piece.len();
    let mut next: Vec<usize> = (1..=n).collect();
    let mut prev: Vec<usize> = (0..n).map(|i| if i == 0 { NIL } else { i - 1 }).collect();
    let mut alive = vec![true; n];
    let mut heap: BinaryHeap<Reverse<(Rank, usize, usize, usize)>> = BinaryHeap::with_capacity(n);

    let push_pair =
        |heap: &mut BinaryHeap<Reverse<(Rank, usize, usize, usize)>>, next: &[usize], left: usize| {
            let right = next[left];
            if right >= n {
                return;
            }
            let right_end = next[right];
            if let Some(rank) = vocab.rank(&piece[left..right_end]) {
                heap.push(Reverse((rank, left, right, right_end)));
            }
        };

    for left in 0..n - 1 {
        push_pair(&mut heap, &next, left);
    }

    while let Some(Reverse((_, left, right, right_end))) = heap.pop() {
        if !alive[left] || next[left] != right || !alive[right] || next[right] != right_end {
            continue;
        }

        next[left] = right_end;
        alive[right] = false;
        if right_end < n {
            prev[right_end] = left;
        }

        push_pair(&mut heap, &next, left);
        if prev[left] != NIL {
            push_pair(&mut heap, &next, prev[left]);
        }
    }

    let mut ranges = Vec::new();
    let mut start = 0;
    while start < n {
        let end = next[start];
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn ranks_vocab(pairs: &[(&[u8], u32)]) -> Vocabulary {
        let mut ranks = FxHashMap::default();
        for &(bytes, rank) in pairs {
            ranks.insert(bytes.to_vec(), rank);
        }
        Vocabulary::from_ranks(ranks).unwrap()
    }

    /// All single bytes at ranks 0..=255 plus the given merges.
    fn byte_vocab(merges: &[&[u8]]) -> Vocabulary {
        let mut entries: Vec<(Vec<u8>, u32, u32)> =
            (0u8..=255).map(|b| (vec![b], b as u32, b as u32)).collect();
        for (i, m) in merges.iter().enumerate() {
            let id = 256 + i as u32;
            entries.push((m.to_vec(), id, id));
        }
        Vocabulary::from_entries(entries).unwrap()
    }

    #[test]
    fn very_simple_test() {
        let vocab = ranks_vocab(&[(b"ab", 1), (b"cd", 2)]);
        let res = byte_pair_split(b"abcd", &vocab);
        assert_eq!(res, vec![b"ab".as_slice(), b"cd".as_slice()]);
    }

    #[test]
    fn test_toy_vocabulary() {
        let vocab = Vocabulary::from_entries(vec![
            (b"a".to_vec(), 0, 1),
            (b"b".to_vec(), 0, 2),
            (b"ab".to_vec(), 1, 3),
        ])
        .unwrap();

        assert_eq!(byte_pair_encode(b"ab", &vocab).unwrap(), vec![3]);
        assert_eq!(byte_pair_encode(b"ba", &vocab).unwrap(), vec![2, 1]);
        assert_eq!(byte_pair_encode(b"abab", &vocab).unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_lowest_rank_merges_first() {
        // "bc" outranks "ab", so "abc" becomes a + bc even though "ab" is leftmost.
        let vocab = byte_vocab(&[b"bc", b"ab"]);
        assert_eq!(
            byte_pair_split(b"abc", &vocab),
            vec![b"a".as_slice(), b"bc".as_slice()]
        );
    }

    #[test]
    fn test_ties_go_leftmost() {
        let vocab = byte_vocab(&[b"aa"]);
        assert_eq!(
            byte_pair_split(b"aaa", &vocab),
            vec![b"aa".as_slice(), b"a".as_slice()]
        );
        assert_eq!(
            byte_pair_split(b"aaaaa", &vocab),
            vec![b"aa".as_slice(), b"aa".as_slice(), b"a".as_slice()]
        );
    }

    #[test]
    fn test_never_merges_absent_pair() {
        // "abc" is in the vocabulary but neither "ab" nor "bc" is, so the pair
        // merge cannot build it.
        let vocab = byte_vocab(&[b"abc"]);
        assert_eq!(
            byte_pair_split(b"abc", &vocab),
            vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]
        );
        assert_eq!(
            byte_pair_encode(b"xabc", &vocab).unwrap(),
            vec![b'x' as u32, b'a' as u32, b'b' as u32, b'c' as u32]
        );
    }

    #[test]
    fn test_whole_piece_entry_is_one_token() {
        let vocab = byte_vocab(&[b"abc"]);
        assert_eq!(byte_pair_encode(b"abc", &vocab).unwrap(), vec![256]);

        let heap = MergeEngine::new(&vocab).with_heap_threshold(0);
        assert_eq!(heap.merge(b"abc").unwrap(), vec![256]);
    }

    #[test]
    fn test_reachable_token_resolves_to_single_id() {
        let vocab = byte_vocab(&[b"ab", b"abc"]);
        assert_eq!(byte_pair_encode(b"abc", &vocab).unwrap(), vec![257]);
    }

    #[test]
    fn test_missing_base_byte() {
        let vocab = ranks_vocab(&[(b"a", 0)]);
        match byte_pair_encode(b"ax", &vocab) {
            Err(TokenizerError::UnknownByteSequence(bytes)) => assert_eq!(bytes, b"x".to_vec()),
            other => panic!("expected UnknownByteSequence, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_piece() {
        let vocab = byte_vocab(&[]);
        assert!(byte_pair_encode(b"", &vocab).unwrap().is_empty());
    }

    #[test]
    fn test_heap_matches_scan() {
        let vocab = byte_vocab(&[
            b"ab", b"ba", b"aa", b"bb", b"abab", b"aab", b"bba", b"ca", b"cab", b"abc", b"bc",
            b"cc", b"ccc", b"abba",
        ]);

        // Deterministic LCG so the piece set is reproducible.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for len in 1..200usize {
            let piece: Vec<u8> = (0..len)
                .map(|_| {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    b"abc"[(state >> 33) as usize % 3]
                })
                .collect();

            let scan = merge_with_scan(&piece, &vocab);
            let heap = merge_with_heap(&piece, &vocab);
            assert_eq!(scan, heap, "strategies disagree on {:?}", piece);
        }
    }

    #[test]
    fn test_threshold_does_not_change_output() {
        let vocab = byte_vocab(&[b"ab", b"bc", b"abc", b"ca"]);
        let piece = b"abcabcabcaabbccabcab".repeat(3);
        let scan = MergeEngine::new(&vocab)
            .with_heap_threshold(usize::MAX)
            .merge(&piece)
            .unwrap();
        let heap = MergeEngine::new(&vocab)
            .with_heap_threshold(1)
            .merge(&piece)
            .unwrap();
        assert_eq!(scan, heap);
    }

    #[test]
    fn test_heap_only_above_threshold() {
        let vocab = byte_vocab(&[]);
        let engine = MergeEngine::new(&vocab).with_heap_threshold(4);
        assert!(!engine.uses_heap(4));
        assert!(engine.uses_heap(5));
        assert!(!MergeEngine::new(&vocab).uses_heap(DEFAULT_HEAP_THRESHOLD));
    }

    #[test]
    fn test_groups_cover_piece() {
        let vocab = byte_vocab(&[b"he", b"ll", b"llo", b"hello"]);
        let piece = "hello, héllo".as_bytes();
        let groups = byte_pair_split(piece, &vocab);
        assert_eq!(groups.concat(), piece.to_vec());
    }
}
