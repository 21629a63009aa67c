//! Contextual chunk annotation.
//!
//! When enabled, each chunk is wrapped as a small JSON object
//! `{"context": <enclosing header path>, "content": <raw chunk>}`.
//! Embeddings are always produced over the concatenation
//! `context + "\n\n" + content`; the wrapper itself is never embedded.

use serde::Deserialize;
use serde_json::json;

use super::ChunkPiece;

/// The `#`-heading trail enclosing a character offset, e.g.
/// `"SwiftUI > Views > Layout"`.
///
/// Only lines ending strictly before `char_start` contribute; a heading that
/// opens the chunk is its own content, not enclosing context.
pub fn header_path(text: &str, char_start: usize) -> String {
    let mut trail: Vec<(usize, String)> = Vec::new();
    let mut consumed = 0usize;

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();
        if consumed + line_chars > char_start {
            break;
        }
        consumed += line_chars;

        let trimmed = line.trim_end_matches(['\n', '\r']);
        let level = trimmed.bytes().take_while(|b| *b == b'#').count();
        if level == 0 || level > 6 {
            continue;
        }
        let Some(rest) = trimmed.get(level..) else {
            continue;
        };
        if !rest.starts_with(' ') {
            continue;
        }
        let title = rest.trim().to_string();
        trail.retain(|(l, _)| *l < level);
        trail.push((level, title));
    }

    trail
        .into_iter()
        .map(|(_, title)| title)
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Wrap a chunk as the `{"context", "content"}` JSON object.
pub fn wrap_with_context(source: &str, piece: &ChunkPiece) -> String {
    let context = header_path(source, piece.start);
    json!({ "context": context, "content": piece.content }).to_string()
}

#[derive(Deserialize)]
struct Wrapped {
    context: String,
    content: String,
}

/// Whether a stored chunk carries the contextual wrapper.
pub fn is_contextual(stored_content: &str) -> bool {
    stored_content.starts_with('{')
        && serde_json::from_str::<Wrapped>(stored_content).is_ok()
}

/// The text an embedding is produced over.
///
/// Wrapped chunks embed `context + "\n\n" + content`; plain chunks embed
/// their content verbatim. Retrieval stays transparent either way.
pub fn embedding_input(stored_content: &str) -> String {
    if stored_content.starts_with('{') {
        if let Ok(wrapped) = serde_json::from_str::<Wrapped>(stored_content) {
            return format!("{}\n\n{}", wrapped.context, wrapped.content);
        }
    }
    stored_content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk_markdown;

    const DOC: &str = "# Framework\nintro text\n\n## Views\nabout views\n\n### Layout\nlayout details go here\n";

    #[test]
    fn test_header_path_tracks_nesting() {
        let offset = DOC.find("layout details").unwrap(); // ASCII doc: bytes == chars
        assert_eq!(header_path(DOC, offset), "Framework > Views > Layout");
    }

    #[test]
    fn test_header_path_pops_siblings() {
        let doc = "# Top\n## First\nbody\n## Second\nmore body\n";
        let offset = doc.find("more body").unwrap();
        assert_eq!(header_path(doc, offset), "Top > Second");
    }

    #[test]
    fn test_header_opening_a_chunk_is_not_context() {
        let offset = DOC.find("## Views").unwrap();
        assert_eq!(header_path(DOC, offset), "Framework");
    }

    #[test]
    fn test_wrap_and_embedding_input_round_trip() {
        let pieces = chunk_markdown(DOC, 5000);
        let wrapped = wrap_with_context(DOC, &pieces[0]);

        let parsed: serde_json::Value = serde_json::from_str(&wrapped).unwrap();
        assert!(parsed.get("context").is_some());
        assert_eq!(parsed["content"].as_str().unwrap(), pieces[0].content);

        let input = embedding_input(&wrapped);
        assert!(input.ends_with(&pieces[0].content));
    }

    #[test]
    fn test_is_contextual() {
        assert!(is_contextual(r#"{"context":"A > B","content":"body"}"#));
        assert!(!is_contextual("plain chunk text"));
        assert!(!is_contextual("{ not json }"));
    }

    #[test]
    fn test_embedding_input_passes_plain_text_through() {
        assert_eq!(embedding_input("plain chunk text"), "plain chunk text");
        // A brace-leading chunk that is not the wrapper stays untouched.
        assert_eq!(embedding_input("{ not: json }"), "{ not: json }");
    }
}
