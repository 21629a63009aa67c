//! Structure-aware markdown chunking.
//!
//! Splits a page into size-bounded pieces with a greedy forward scan.
//! Within each window the first rule that yields a break wins, and the
//! rightmost candidate for that rule is taken:
//!
//! 1. markdown header (`##` and deeper)
//! 2. paragraph separator (`\n\n`)
//! 3. single newline
//! 4. sentence-ending punctuation followed by whitespace
//! 5. forced split at the window edge
//!
//! Offsets are character offsets (not bytes); the concatenation of all
//! pieces' source slices reproduces the input exactly.

mod context;

pub use context::{embedding_input, header_path, is_contextual, wrap_with_context};

use crate::types::BreakType;

/// One chunk of a page: exact source slice plus boundary metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    /// Half-open character offsets into the source markdown.
    pub start: usize,
    pub end: usize,
    /// The exact `[start, end)` slice of the source.
    pub content: String,
    pub break_type: BreakType,
}

/// Split markdown into chunks of at most `chunk_size` characters.
///
/// Empty input yields an empty list. A document that fits in one window
/// yields a single chunk tagged `paragraph` (or `force` when the text holds
/// no paragraph separator). The final chunk of a longer document carries the
/// break type of the boundary that opened it.
pub fn chunk_markdown(text: &str, chunk_size: usize) -> Vec<ChunkPiece> {
    if text.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    let byte_of: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let byte_at = |ci: usize| if ci >= n { text.len() } else { byte_of[ci] };

    let mut pieces = Vec::new();
    let mut last_break: Option<BreakType> = None;
    let mut start = 0usize;

    while start < n {
        if n - start <= chunk_size {
            let break_type = last_break.unwrap_or(if text.contains("\n\n") {
                BreakType::Paragraph
            } else {
                BreakType::Force
            });
            pieces.push(ChunkPiece {
                start,
                end: n,
                content: text[byte_at(start)..].to_string(),
                break_type,
            });
            break;
        }

        let (end, break_type) = find_break(&chars, start, start + chunk_size);
        pieces.push(ChunkPiece {
            start,
            end,
            content: text[byte_at(start)..byte_at(end)].to_string(),
            break_type,
        });
        last_break = Some(break_type);
        start = end;
    }

    pieces
}

/// Locate the break position for the window `[start, end_limit)`.
///
/// Returns the character index the next chunk begins at. Every rule
/// guarantees progress (`position > start`); the forced split is the
/// fallback when no acceptable boundary exists in the window.
fn find_break(chars: &[char], start: usize, end_limit: usize) -> (usize, BreakType) {
    // Rule 1: just before a line starting with `##`, excluding a header at
    // the window's first character.
    for p in (start + 1..end_limit).rev() {
        if chars[p] == '#' && chars[p - 1] == '\n' && chars.get(p + 1) == Some(&'#') {
            return (p, BreakType::MarkdownHeader);
        }
    }

    // Rule 2: after the rightmost blank-line separator.
    if end_limit >= 2 {
        for p in (start..end_limit - 1).rev() {
            if chars[p] == '\n' && chars[p + 1] == '\n' {
                return (p + 2, BreakType::Paragraph);
            }
        }
    }

    // Rule 3: after the last newline.
    for p in (start..end_limit).rev() {
        if chars[p] == '\n' {
            return (p + 1, BreakType::Newline);
        }
    }

    // Rule 4: after the last sentence end followed by whitespace.
    if end_limit >= 2 {
        for p in (start..end_limit - 1).rev() {
            if matches!(chars[p], '.' | '!' | '?') && chars[p + 1].is_whitespace() {
                return (p + 2, BreakType::Sentence);
            }
        }
    }

    (end_limit, BreakType::Force)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad_to(s: &mut String, target_chars: usize, filler: char) {
        let mut len = s.chars().count();
        while len < target_chars {
            s.push(filler);
            len += 1;
        }
    }

    /// 12 000-char document with `##` headers at offsets 0, 4000 and 8500.
    fn doc_with_headers() -> String {
        let mut s = String::from("## Intro\n");
        pad_to(&mut s, 3999, 'a');
        s.push('\n');
        s.push_str("## Middle\n");
        pad_to(&mut s, 8499, 'b');
        s.push('\n');
        s.push_str("## Tail\n");
        pad_to(&mut s, 12000, 'c');
        s
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_markdown("", 5000).is_empty());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let pieces = chunk_markdown(text, 5000);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].start, 0);
        assert_eq!(pieces[0].end, text.chars().count());
        assert_eq!(pieces[0].break_type, BreakType::Paragraph);
        assert_eq!(pieces[0].content, text);
    }

    #[test]
    fn test_short_document_without_breaks_is_forced() {
        let pieces = chunk_markdown("no separators here", 5000);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].break_type, BreakType::Force);
    }

    #[test]
    fn test_header_splits_at_exact_offsets() {
        let doc = doc_with_headers();
        let pieces = chunk_markdown(&doc, 5000);

        assert_eq!(pieces.len(), 3);
        assert_eq!((pieces[0].start, pieces[0].end), (0, 4000));
        assert_eq!((pieces[1].start, pieces[1].end), (4000, 8500));
        assert_eq!((pieces[2].start, pieces[2].end), (8500, 12000));
        for piece in &pieces {
            assert_eq!(piece.break_type, BreakType::MarkdownHeader);
        }
        assert!(pieces[1].content.starts_with("## Middle"));
        assert!(pieces[2].content.starts_with("## Tail"));
    }

    #[test]
    fn test_header_at_window_start_is_not_a_break() {
        // Only header sits at position 0; the window must fall through to
        // the paragraph rule instead of producing an empty chunk.
        let mut doc = String::from("## Only\n");
        doc.push_str("alpha\n\nbeta");
        while doc.chars().count() < 30 {
            doc.push('x');
        }
        let pieces = chunk_markdown(&doc, 20);
        assert!(pieces[0].start == 0 && pieces[0].end > 0);
        assert_eq!(pieces[0].break_type, BreakType::Paragraph);
    }

    #[test]
    fn test_paragraph_break_position() {
        let text = "one one one\n\ntwo two two two two two";
        let pieces = chunk_markdown(text, 20);
        // Break lands just after the blank-line separator.
        assert_eq!(pieces[0].end, 13);
        assert_eq!(pieces[0].break_type, BreakType::Paragraph);
        assert!(pieces[1].content.starts_with("two"));
    }

    #[test]
    fn test_newline_break() {
        let text = "line one\nline two\nline three and more text";
        let pieces = chunk_markdown(text, 15);
        assert_eq!(pieces[0].break_type, BreakType::Newline);
        assert_eq!(pieces[0].content, "line one\n");
    }

    #[test]
    fn test_sentence_break() {
        let text = "Hello world. Goodbye world and then some more words";
        let pieces = chunk_markdown(text, 20);
        assert_eq!(pieces[0].break_type, BreakType::Sentence);
        assert_eq!(pieces[0].content, "Hello world. ");
    }

    #[test]
    fn test_force_break() {
        let text = "abcdefghijklmnop";
        let pieces = chunk_markdown(text, 4);
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0].break_type, BreakType::Force);
        assert_eq!(pieces[0].content, "abcd");
        // Tail inherits the forced boundary that opened it.
        assert_eq!(pieces[3].break_type, BreakType::Force);
    }

    #[test]
    fn test_coverage_reassembles_source() {
        let docs = [
            doc_with_headers(),
            "short".to_string(),
            "a. b. c. d. e. f. g. h.".to_string(),
            "multi\nline\n\ntext with ünïcode ✓ characters\nand more".repeat(40),
        ];
        for doc in &docs {
            for chunk_size in [7, 64, 5000] {
                let pieces = chunk_markdown(doc, chunk_size);
                let rebuilt: String = pieces.iter().map(|p| p.content.as_str()).collect();
                assert_eq!(&rebuilt, doc, "chunk_size={chunk_size}");

                // Offsets are contiguous and bounded by the window size.
                let mut expected_start = 0;
                for piece in &pieces {
                    assert_eq!(piece.start, expected_start);
                    assert!(piece.end - piece.start <= chunk_size.max(1));
                    expected_start = piece.end;
                }
                assert_eq!(expected_start, doc.chars().count());
            }
        }
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let text = "héllo wörld. ünïcode text here and then some";
        let pieces = chunk_markdown(text, 20);
        assert_eq!(pieces[0].end, 13);
        assert_eq!(pieces[0].content, "héllo wörld. ");
    }
}
