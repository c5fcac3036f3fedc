//! Recursive character text splitter.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters
//! with roughly `chunk_overlap` characters repeated between neighbours.
//!
//! # Algorithm
//!
//! 1. Pick the first separator in [`SEPARATORS`] that occurs in the text
//!    (the empty separator always matches and splits into characters).
//! 2. Split on it, keeping each separator attached to the start of the
//!    piece that follows it.
//! 3. Pieces shorter than `chunk_size` are merged greedily into chunks;
//!    when a chunk is flushed, pieces are dropped from its front until at
//!    most `chunk_overlap` characters remain to seed the next chunk.
//! 4. Pieces that are still too long are split recursively with the
//!    remaining, finer separators.
//!
//! Lengths are measured in characters, not bytes. Chunks are trimmed and
//! empty chunks are dropped. A piece can only exceed `chunk_size` when it
//! was produced by the empty separator path, which never happens since it
//! yields single characters.
//!
//! # Example
//!
//! ```rust
//! use ragserve::chunk::split_text;
//!
//! let chunks = split_text("Hello world.\n\nSecond paragraph.", 500, 50);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// A split point, tried in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Literal(&'static str),
    /// Zero-width split right after a `". "` sentence end.
    SentenceEnd,
    /// Split into single characters.
    Char,
}

/// Paragraph break, line break, sentence end, space, characters.
pub const SEPARATORS: [Separator; 5] = [
    Separator::Literal("\n\n"),
    Separator::Literal("\n"),
    Separator::SentenceEnd,
    Separator::Literal(" "),
    Separator::Char,
];

const SENTENCE_END: &str = ". ";

impl Separator {
    fn occurs_in(&self, text: &str) -> bool {
        match self {
            Separator::Literal(s) => text.contains(s),
            Separator::SentenceEnd => text.contains(SENTENCE_END),
            Separator::Char => true,
        }
    }

    /// Split `text`, keeping separators at the start of the following piece.
    /// Empty pieces are dropped.
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let cuts: Vec<usize> = match self {
            Separator::Literal(sep) => text.match_indices(sep).map(|(i, _)| i).collect(),
            Separator::SentenceEnd => text
                .match_indices(SENTENCE_END)
                .map(|(i, _)| i + SENTENCE_END.len())
                .collect(),
            Separator::Char => text.char_indices().map(|(i, _)| i).collect(),
        };

        let mut pieces = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts {
            if cut > start {
                pieces.push(&text[start..cut]);
                start = cut;
            }
        }
        if start < text.len() {
            pieces.push(&text[start..]);
        }
        pieces
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks using the default separator priority.
///
/// Returns chunks with contiguous indices starting at 0. An empty or
/// whitespace-only text yields no chunks.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    split_pieces(text, &SEPARATORS, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(index, text))
        .collect()
}

fn split_pieces(
    text: &str,
    separators: &[Separator],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let (separator, finer) = match separators.iter().position(|s| s.occurs_in(text)) {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => (Separator::Char, &[][..]),
    };

    let mut out = Vec::new();
    let mut good: Vec<&str> = Vec::new();

    for piece in separator.split(text) {
        if char_len(piece) < chunk_size {
            good.push(piece);
            continue;
        }
        if !good.is_empty() {
            out.extend(merge_pieces(&good, chunk_size, chunk_overlap));
            good.clear();
        }
        if finer.is_empty() {
            if let Some(t) = trimmed(piece) {
                out.push(t);
            }
        } else {
            out.extend(split_pieces(piece, finer, chunk_size, chunk_overlap));
        }
    }
    if !good.is_empty() {
        out.extend(merge_pieces(&good, chunk_size, chunk_overlap));
    }
    out
}

/// Greedily join small pieces into chunks no longer than `chunk_size`,
/// carrying up to `chunk_overlap` characters from the tail of each chunk
/// into the next.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: std::collections::VecDeque<(&str, usize)> = Default::default();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > chunk_size && !window.is_empty() {
            if let Some(t) = trimmed(&join(&window)) {
                chunks.push(t);
            }
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, front_len)) => total -= front_len,
                    None => break,
                }
            }
        }
        window.push_back((piece, len));
        total += len;
    }

    if let Some(t) = trimmed(&join(&window)) {
        chunks.push(t);
    }
    chunks
}

fn join(window: &std::collections::VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(s, _)| *s).collect()
}

fn trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn make_chunk(index: usize, text: String) -> Chunk {
    Chunk {
        index,
        hash: content_hash(&text),
        text,
    }
}

/// SHA-256 of `text`, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_text("", 500, 50).is_empty());
        assert!(split_text("  \n\n  ", 500, 50).is_empty());
    }

    #[test]
    fn paragraphs_merge_until_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_text(text, 500, 50);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("First paragraph."));
        assert!(chunks[0].text.ends_with("Third paragraph."));
    }

    #[test]
    fn chunks_never_exceed_size() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} talks about something. ", i))
            .collect::<String>();
        let text = format!("{}\n\n{}\nTail line", text, "word ".repeat(300));
        for chunk in split_text(&text, 500, 50) {
            assert!(
                chunk.text.chars().count() <= 500,
                "chunk {} has {} chars",
                chunk.index,
                chunk.text.chars().count()
            );
        }
    }

    #[test]
    fn indices_contiguous() {
        let text = (0..80)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_text(&text, 60, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = (0..100)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 40, 10);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_word = pair[0].text.split(' ').last().unwrap();
            assert!(
                pair[1].text.contains(last_word),
                "{:?} should carry {:?}",
                pair[1].text,
                last_word
            );
        }
    }

    #[test]
    fn sentence_boundary_preferred_over_space() {
        let sentence = format!("{}. ", "a".repeat(30));
        let text = sentence.repeat(4);
        let chunks = split_text(&text, 70, 0);
        for chunk in &chunks {
            assert!(chunk.text.ends_with('.'), "{:?}", chunk.text);
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(1200);
        let chunks = split_text(&text, 500, 50);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 500));
    }

    #[test]
    fn multibyte_text_is_measured_in_chars() {
        let text = "가".repeat(450);
        let chunks = split_text(&text, 500, 50);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn deterministic_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = split_text(text, 8, 0);
        let c2 = split_text(text, 8, 0);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
    }

    #[test]
    fn sentence_split_keeps_terminator_on_left() {
        let pieces = Separator::SentenceEnd.split("One. Two. Three");
        assert_eq!(pieces, vec!["One. ", "Two. ", "Three"]);
    }

    #[test]
    fn literal_split_keeps_separator_on_right() {
        let pieces = Separator::Literal("\n").split("a\nb\nc");
        assert_eq!(pieces, vec!["a", "\nb", "\nc"]);
    }
}
