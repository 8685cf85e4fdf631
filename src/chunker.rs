//! Hierarchical chunking over a document-global coordinate space
//!
//! Page texts are concatenated with a single `'\n'` separator into one
//! corpus; every offset stored on a chunk refers to that corpus, measured in
//! Unicode scalar values (chars). Parents are cut with a fixed-width sliding
//! window, children re-cut each parent with a smaller window, and a page
//! offset table maps any `[char_start, char_end)` range back to a page range.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingSettings;
use crate::types::{ChildChunk, Page, ParentChunk};

/// Parent and child chunks produced for one document
#[derive(Debug, Clone, Default)]
pub struct ChunkSet {
    pub parents: Vec<ParentChunk>,
    pub children: Vec<ChildChunk>,
}

/// Entry of the page offset table: the half-open char range a page occupies
/// in the global coordinate space. Separators live between entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageSpan {
    number: u32,
    start: usize,
    end: usize,
}

/// Splits page-structured text into parent and child windows
pub struct Chunker {
    settings: ChunkingSettings,
}

impl Chunker {
    pub fn new(settings: ChunkingSettings) -> Self {
        Self { settings }
    }

    /// Chunk a document's pages into parents and children.
    ///
    /// Windows whose trimmed text is empty are dropped. A document with no
    /// pages or no text produces an empty set.
    pub fn chunk_document(&self, doc_id: Uuid, pages: &[Page]) -> ChunkSet {
        let (corpus, spans) = build_corpus(pages);
        if corpus.is_empty() {
            return ChunkSet::default();
        }

        let mut set = ChunkSet::default();

        for (start, end) in sliding_windows(
            corpus.len(),
            self.settings.parent_chunk_chars,
            self.settings.parent_overlap_chars,
        ) {
            let text: String = corpus[start..end].iter().collect();
            if text.trim().is_empty() {
                continue;
            }

            let (page_start, page_end) = page_range(&spans, start, end);
            let parent = ParentChunk {
                id: Uuid::new_v4(),
                doc_id,
                page_start,
                page_end,
                char_start: start,
                char_end: end,
                chunk_hash: chunk_hash(&text),
                text,
            };

            self.chunk_children(&parent, &corpus[start..end], &spans, &mut set.children);
            set.parents.push(parent);
        }

        set
    }

    /// Cut one parent into children. Offsets are reported in the global
    /// space (`parent.char_start` + local offset), not parent-relative.
    fn chunk_children(
        &self,
        parent: &ParentChunk,
        parent_chars: &[char],
        spans: &[PageSpan],
        out: &mut Vec<ChildChunk>,
    ) {
        for (local_start, local_end) in sliding_windows(
            parent_chars.len(),
            self.settings.child_chunk_chars,
            self.settings.child_overlap_chars,
        ) {
            let text: String = parent_chars[local_start..local_end].iter().collect();
            if text.trim().is_empty() {
                continue;
            }

            let char_start = parent.char_start + local_start;
            let char_end = parent.char_start + local_end;
            let (page_start, page_end) = page_range(spans, char_start, char_end);

            out.push(ChildChunk {
                id: Uuid::new_v4(),
                doc_id: parent.doc_id,
                parent_id: parent.id,
                page_start,
                page_end,
                char_start,
                char_end,
                chunk_hash: chunk_hash(&text),
                text,
            });
        }
    }
}

/// SHA-256 of the chunk text, lowercase hex
pub fn chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract a window of up to `max_chars` characters from `text`, centered on
/// the (char-offset) `span` when one is given, clamped to the text bounds.
/// Without a span the leading window is taken. The result is
/// whitespace-trimmed.
pub fn centered_window(text: &str, span: Option<(usize, usize)>, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.trim().to_string();
    }

    let (start, end) = match span {
        Some((span_start, span_end)) => {
            let center = span_start.saturating_add(span_end) / 2;
            let start = center.saturating_sub(max_chars / 2);
            let end = (start + max_chars).min(chars.len());
            // Hitting the right bound shifts the window left instead of
            // shrinking it
            (end.saturating_sub(max_chars), end)
        }
        None => (0, max_chars),
    };

    chars[start..end].iter().collect::<String>().trim().to_string()
}

/// Concatenate page texts into the global char corpus with a single `'\n'`
/// between pages, and record each page's span. Empty pages contribute zero
/// characters plus the separator. NUL characters are dropped here so the
/// coordinate space is built over the sanitized text.
fn build_corpus(pages: &[Page]) -> (Vec<char>, Vec<PageSpan>) {
    let mut corpus = Vec::new();
    let mut spans = Vec::with_capacity(pages.len());

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            corpus.push('\n');
        }
        let start = corpus.len();
        corpus.extend(page.text.chars().filter(|&c| c != '\0'));
        spans.push(PageSpan {
            number: page.number,
            start,
            end: corpus.len(),
        });
    }

    // A lone empty page yields an empty corpus; treat it as no text at all
    if corpus.is_empty() {
        spans.clear();
    }

    (corpus, spans)
}

/// Map a `[char_start, char_end)` range to the pages it touches:
/// `page_start` is the first page whose end exceeds `char_start`, `page_end`
/// the last page whose start precedes `char_end`.
fn page_range(spans: &[PageSpan], char_start: usize, char_end: usize) -> (u32, u32) {
    let first = spans
        .iter()
        .find(|s| s.end > char_start)
        .or_else(|| spans.last());
    let last = spans
        .iter()
        .rev()
        .find(|s| s.start < char_end)
        .or_else(|| spans.first());

    match (first, last) {
        (Some(first), Some(last)) => (first.number, last.number),
        _ => (1, 1),
    }
}

/// Fixed-width sliding windows over `len` items, advancing by
/// `max(size - overlap, 1)`. The final window is truncated at `len`.
fn sliding_windows(len: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    if len == 0 || size == 0 {
        return Vec::new();
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(len);
        windows.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunker(parent: usize, parent_overlap: usize, child: usize, child_overlap: usize) -> Chunker {
        Chunker::new(ChunkingSettings {
            parent_chunk_chars: parent,
            parent_overlap_chars: parent_overlap,
            child_chunk_chars: child,
            child_overlap_chars: child_overlap,
        })
    }

    #[test]
    fn test_empty_document() {
        let c = chunker(100, 10, 50, 5);
        assert!(c.chunk_document(Uuid::new_v4(), &[]).parents.is_empty());

        let set = c.chunk_document(Uuid::new_v4(), &[Page::new(1, "")]);
        assert!(set.parents.is_empty());
        assert!(set.children.is_empty());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let c = chunker(100, 10, 50, 5);
        let set = c.chunk_document(Uuid::new_v4(), &[Page::new(1, "short text")]);

        assert_eq!(set.parents.len(), 1);
        assert_eq!(set.children.len(), 1);
        assert_eq!(set.parents[0].text, "short text");
        assert_eq!(set.parents[0].char_start, 0);
        assert_eq!(set.parents[0].char_end, 10);
        assert_eq!(set.parents[0].page_start, 1);
        assert_eq!(set.parents[0].page_end, 1);
    }

    #[test]
    fn test_pages_joined_with_separator() {
        let c = chunker(100, 10, 50, 5);
        let pages = vec![Page::new(1, "alpha"), Page::new(2, "beta")];
        let set = c.chunk_document(Uuid::new_v4(), &pages);

        assert_eq!(set.parents[0].text, "alpha\nbeta");
        assert_eq!(set.parents[0].page_start, 1);
        assert_eq!(set.parents[0].page_end, 2);
    }

    #[test]
    fn test_page_range_spans_window() {
        let c = chunker(8, 0, 8, 0);
        // Page 1 occupies chars 0..5, page 2 chars 6..10
        let pages = vec![Page::new(1, "aaaaa"), Page::new(2, "bbbbb")];
        let set = c.chunk_document(Uuid::new_v4(), &pages);

        assert_eq!(set.parents.len(), 2);
        // First window [0, 8) touches both pages
        assert_eq!(set.parents[0].page_start, 1);
        assert_eq!(set.parents[0].page_end, 2);
        // Second window [8, 11) is entirely inside page 2
        assert_eq!(set.parents[1].page_start, 2);
        assert_eq!(set.parents[1].page_end, 2);
    }

    #[test]
    fn test_child_offsets_are_global() {
        let c = chunker(10, 2, 4, 1);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let set = c.chunk_document(Uuid::new_v4(), &[Page::new(1, text)]);

        let corpus: Vec<char> = text.chars().collect();
        for child in &set.children {
            let expected: String = corpus[child.char_start..child.char_end].iter().collect();
            assert_eq!(child.text, expected);

            let parent = set
                .parents
                .iter()
                .find(|p| p.id == child.parent_id)
                .expect("child references a parent of the same document");
            assert!(child.char_start >= parent.char_start);
            assert!(child.char_end <= parent.char_end);
        }
    }

    #[test]
    fn test_whitespace_window_dropped() {
        let c = chunker(5, 0, 5, 0);
        let set = c.chunk_document(Uuid::new_v4(), &[Page::new(1, "abcde     abcde")]);
        // The middle window is all spaces and must not be emitted
        assert_eq!(set.parents.len(), 2);
    }

    #[test]
    fn test_chunk_hash_stable() {
        assert_eq!(chunk_hash("hello"), chunk_hash("hello"));
        assert_ne!(chunk_hash("hello"), chunk_hash("hello!"));
        // Lowercase hex, 32 bytes
        let hash = chunk_hash("hello");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_multibyte_text_offsets() {
        let c = chunker(4, 1, 2, 0);
        let text = "héllo wörld ∑∫";
        let set = c.chunk_document(Uuid::new_v4(), &[Page::new(1, text)]);

        let corpus: Vec<char> = text.chars().collect();
        for parent in &set.parents {
            let expected: String = corpus[parent.char_start..parent.char_end].iter().collect();
            assert_eq!(parent.text, expected);
        }
    }

    #[test]
    fn test_centered_window_short_text() {
        assert_eq!(centered_window("  hello  ", Some((1, 3)), 100), "hello");
    }

    #[test]
    fn test_centered_window_centers_on_span() {
        let text: String = ('a'..='z').collect();
        // Span in the middle: window of 10 centered near char 13
        let window = centered_window(&text, Some((12, 14)), 10);
        assert_eq!(window.chars().count(), 10);
        assert!(window.contains('m'));
        assert!(window.contains('n'));
    }

    #[test]
    fn test_centered_window_clamps_at_bounds() {
        let text: String = ('a'..='z').collect();

        // Span at the very start: window pinned to the left edge
        let left = centered_window(&text, Some((0, 2)), 10);
        assert!(left.starts_with('a'));
        assert_eq!(left.chars().count(), 10);

        // Span at the very end: window pinned to the right edge
        let right = centered_window(&text, Some((24, 26)), 10);
        assert!(right.ends_with('z'));
        assert_eq!(right.chars().count(), 10);
    }

    #[test]
    fn test_centered_window_without_span_takes_lead() {
        let text: String = ('a'..='z').collect();
        assert_eq!(centered_window(&text, None, 5), "abcde");
    }

    proptest! {
        /// Parents cover the corpus: every char position falls inside some
        /// parent window, and consecutive windows overlap by exactly the
        /// configured amount (except the truncated final window).
        #[test]
        fn prop_parent_windows_cover_and_overlap(len in 1usize..500, size in 2usize..60, overlap_frac in 0usize..100) {
            let overlap = overlap_frac * (size - 1) / 100;
            let windows = sliding_windows(len, size, overlap);

            prop_assert!(!windows.is_empty());
            prop_assert_eq!(windows[0].0, 0);
            prop_assert_eq!(windows.last().unwrap().1, len);

            for pair in windows.windows(2) {
                let (a_start, a_end) = pair[0];
                let (b_start, b_end) = pair[1];
                prop_assert!(b_start > a_start, "windows always advance");
                prop_assert!(b_start <= a_end, "no gap between windows");
                prop_assert!(b_end >= a_end);
                // Full-width windows overlap by exactly `overlap`
                if a_end - a_start == size {
                    prop_assert_eq!(a_end - b_start, overlap.min(size - 1));
                }
            }
        }

        /// Every child's text is the substring of its parent at the
        /// corresponding relative offsets.
        #[test]
        fn prop_child_text_matches_parent_slice(text in "\\PC{0,400}") {
            let c = chunker(50, 10, 20, 5);
            let set = c.chunk_document(Uuid::new_v4(), &[Page::new(1, text)]);

            for child in &set.children {
                let parent = set.parents.iter().find(|p| p.id == child.parent_id).unwrap();
                let parent_chars: Vec<char> = parent.text.chars().collect();
                let rel_start = child.char_start - parent.char_start;
                let rel_end = child.char_end - parent.char_start;
                let expected: String = parent_chars[rel_start..rel_end].iter().collect();
                prop_assert_eq!(&child.text, &expected);
            }
        }

        /// Hashes only depend on the text.
        #[test]
        fn prop_hash_stable(text in "\\PC{0,100}") {
            prop_assert_eq!(chunk_hash(&text), chunk_hash(&text));
        }
    }
}
