//! Boundary-preferring text chunker with exact character overlap.
//!
//! Splits loader [`Segment`]s into [`Chunk`]s no larger than
//! `chunk_size` characters. Splitting walks a separator ladder from
//! coarse to fine — paragraph (`"\n\n"`), line (`"\n"`), sentence
//! (`". "`), word (`" "`), then raw character cuts — recursing on any
//! piece still too large with the next-finer separator. Separators stay
//! attached to the preceding piece, so piece concatenation reproduces
//! the segment text.
//!
//! Pieces are then packed into overlapping windows: every window after
//! the first begins with exactly the trailing `overlap_size` characters
//! of the previous window. Pieces are split to fit a window's fresh
//! capacity (`chunk_size - overlap_size`) so every window, overlap
//! included, stays within `chunk_size`.
//!
//! Chunk indices are 1-based and assigned sequentially across the whole
//! document in segment order. Given identical input and parameters the
//! output sequence is byte-for-byte identical — required for idempotent
//! reprocessing.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, Segment};

/// Separator ladder, coarsest first. Raw character cuts are the
/// implicit final level.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Chunking parameters. `overlap_size` must be strictly smaller than
/// `chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Maximum characters per chunk, overlap included.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of one segment.
    pub overlap_size: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidChunkConfig(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if overlap_size >= chunk_size {
            return Err(Error::InvalidChunkConfig(format!(
                "overlap_size ({}) must be < chunk_size ({})",
                overlap_size, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap_size,
        })
    }
}

/// Split segments into chunks with contiguous 1-based indices across
/// the whole document in segment order.
///
/// Configuration is validated before any chunk is produced. Each chunk
/// inherits its segment's metadata unmodified. Empty segments yield no
/// chunks.
pub fn chunk_segments(
    document_id: &str,
    segments: &[Segment],
    params: ChunkParams,
) -> Result<Vec<Chunk>> {
    // Re-validate so direct callers get the same contract as `new`.
    let params = ChunkParams::new(params.chunk_size, params.overlap_size)?;

    let mut chunks = Vec::new();
    let mut index: i64 = 1;
    for segment in segments {
        for window in split_windows(&segment.text, params) {
            chunks.push(make_chunk(document_id, index, window, segment));
            index += 1;
        }
    }
    Ok(chunks)
}

/// Split one segment's text into overlapping windows of at most
/// `chunk_size` characters.
///
/// A segment that fits in a single chunk is returned whole, with no
/// overlap applied.
fn split_windows(text: &str, params: ChunkParams) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= params.chunk_size {
        return vec![text.to_string()];
    }

    let piece_budget = params.chunk_size - params.overlap_size;
    let mut pieces = Vec::new();
    split_recursive(text, piece_budget, 0, &mut pieces);
    pack_windows(&pieces, params)
}

/// Recursively split `text` into pieces of at most `budget` characters,
/// preferring the coarsest separator level that fits.
fn split_recursive(text: &str, budget: usize, level: usize, out: &mut Vec<String>) {
    if char_len(text) <= budget {
        out.push(text.to_string());
        return;
    }

    if level >= SEPARATORS.len() {
        // Raw character cuts, snapped to UTF-8 boundaries by charwise
        // indexing.
        let mut rest = text;
        while char_len(rest) > budget {
            let cut = byte_index_of_char(rest, budget);
            out.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        if !rest.is_empty() {
            out.push(rest.to_string());
        }
        return;
    }

    let parts: Vec<&str> = text.split_inclusive(SEPARATORS[level]).collect();
    if parts.len() == 1 {
        split_recursive(text, budget, level + 1, out);
        return;
    }
    for part in parts {
        if char_len(part) <= budget {
            out.push(part.to_string());
        } else {
            split_recursive(part, budget, level + 1, out);
        }
    }
}

/// Pack pieces into windows of at most `chunk_size` characters, carrying
/// exactly the trailing `overlap_size` characters of each emitted window
/// into the next.
fn pack_windows(pieces: &[String], params: ChunkParams) -> Vec<String> {
    let mut windows = Vec::new();
    let mut cur = String::new();
    let mut cur_chars = 0usize;

    for piece in pieces {
        let piece_chars = char_len(piece);
        if cur_chars > 0 && cur_chars + piece_chars > params.chunk_size {
            let carry = tail_chars(&cur, params.overlap_size);
            windows.push(std::mem::take(&mut cur));
            cur_chars = char_len(&carry);
            cur = carry;
        }
        cur.push_str(piece);
        cur_chars += piece_chars;
    }
    if !cur.is_empty() {
        windows.push(cur);
    }
    windows
}

fn make_chunk(document_id: &str, index: i64, text: String, segment: &Segment) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        char_len: char_len(&text),
        text,
        page: segment.page,
        source_name: segment.source_name.clone(),
        hash,
        model: None,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte index of the `n`-th character (== `s.len()` when out of range).
fn byte_index_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// The last `n` characters of `s` (all of `s` when shorter).
fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let count = char_len(s);
    if count <= n {
        return s.to_string();
    }
    let start = byte_index_of_char(s, count - n);
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str) -> Segment {
        Segment {
            text: text.to_string(),
            page: None,
            source_name: "test.txt".to_string(),
        }
    }

    fn params(chunk_size: usize, overlap_size: usize) -> ChunkParams {
        ChunkParams::new(chunk_size, overlap_size).unwrap()
    }

    #[test]
    fn short_segment_yields_single_chunk_without_overlap() {
        let chunks = chunk_segments("doc1", &[seg("Hello, world!")], params(100, 10)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn invalid_config_rejected_before_chunking() {
        assert!(matches!(
            ChunkParams::new(0, 0),
            Err(Error::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            ChunkParams::new(100, 100),
            Err(Error::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            ChunkParams::new(100, 250),
            Err(Error::InvalidChunkConfig(_))
        ));
        assert!(ChunkParams::new(100, 0).is_ok());
    }

    #[test]
    fn twentyfive_hundred_chars_three_chunks_with_exact_overlap() {
        // 500 five-character words: 2500 characters total.
        let text = "word ".repeat(500);
        assert_eq!(text.chars().count(), 2500);

        let chunks = chunk_segments("doc1", &[seg(&text)], params(1000, 20)).unwrap();
        assert_eq!(chunks.len(), 3);

        for c in &chunks {
            assert!(c.char_len <= 1000, "chunk exceeds budget: {}", c.char_len);
        }

        let tail: String = chunks[0]
            .text
            .chars()
            .skip(chunks[0].char_len - 20)
            .collect();
        let head: String = chunks[1].text.chars().take(20).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn overlap_property_holds_for_all_consecutive_chunks() {
        let text = "alpha beta gamma delta epsilon zeta ".repeat(40);
        let p = params(120, 15);
        let chunks = chunk_segments("doc1", &[seg(&text)], p).unwrap();
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.char_len > 15 && b.char_len > 15 {
                let tail: String = a.text.chars().skip(a.char_len - 15).collect();
                let head: String = b.text.chars().take(15).collect();
                assert_eq!(tail, head);
            }
        }
    }

    #[test]
    fn indices_are_contiguous_across_segments() {
        let segments = vec![
            Segment {
                text: "first page ".repeat(30),
                page: Some(1),
                source_name: "doc.pdf".to_string(),
            },
            Segment {
                text: "second page ".repeat(30),
                page: Some(2),
                source_name: "doc.pdf".to_string(),
            },
        ];
        let chunks = chunk_segments("doc1", &segments, params(100, 10)).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64 + 1);
        }
        // Metadata inherited from the owning segment.
        assert_eq!(chunks.first().unwrap().page, Some(1));
        assert_eq!(chunks.last().unwrap().page, Some(2));
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = chunk_segments("doc1", &[seg(&text)], params(100, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(60)));
        assert_eq!(chunks[1].text, "b".repeat(60));
    }

    #[test]
    fn pieces_concatenate_to_input() {
        let text = "One sentence. Another sentence follows here.\n\nA new paragraph with \
                    several more words in it. And a final one.";
        let mut pieces = Vec::new();
        split_recursive(text, 20, 0, &mut pieces);
        assert_eq!(pieces.concat(), text);
        for p in &pieces {
            assert!(p.chars().count() <= 20);
        }
    }

    #[test]
    fn raw_cut_handles_unbroken_text() {
        let text = "x".repeat(250);
        let chunks = chunk_segments("doc1", &[seg(&text)], params(100, 10)).unwrap();
        assert!(chunks.len() >= 3);
        let total_fresh: usize = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { c.char_len } else { c.char_len - 10 })
            .sum();
        assert_eq!(total_fresh, 250);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "héllø wörld ünïcode ".repeat(30);
        let chunks = chunk_segments("doc1", &[seg(&text)], params(50, 5)).unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.char_len <= 50);
            assert_eq!(c.char_len, c.text.chars().count());
        }
    }

    #[test]
    fn deterministic_output() {
        let text = "Alpha bravo charlie. Delta echo foxtrot.\n\nGolf hotel india juliett kilo \
                    lima mike november oscar papa."
            .repeat(10);
        let a = chunk_segments("doc1", &[seg(&text)], params(80, 12)).unwrap();
        let b = chunk_segments("doc1", &[seg(&text)], params(80, 12)).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }

    #[test]
    fn zero_overlap_windows_are_disjoint() {
        let text = "word ".repeat(100);
        let chunks = chunk_segments("doc1", &[seg(&text)], params(100, 0)).unwrap();
        let rejoined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn empty_segment_yields_no_chunks() {
        let chunks = chunk_segments("doc1", &[seg("")], params(100, 10)).unwrap();
        assert!(chunks.is_empty());
    }
}
