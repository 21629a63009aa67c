//! Chunk rows and break-point metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The rule that produced a chunk's trailing boundary.
///
/// Ordered by the chunker's priority: a header break is always preferred
/// over a paragraph break within the same window, and so on down to the
/// forced split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    /// Split just before a `##`-or-deeper markdown heading line
    MarkdownHeader,
    /// Split after a blank-line paragraph separator
    Paragraph,
    /// Split after a single newline
    Newline,
    /// Split after sentence-ending punctuation followed by whitespace
    Sentence,
    /// Forced split at exactly `chunk_size`
    Force,
}

impl BreakType {
    /// Stable database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkdownHeader => "markdown_header",
            Self::Paragraph => "paragraph",
            Self::Newline => "newline",
            Self::Sentence => "sentence",
            Self::Force => "force",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "markdown_header" => Some(Self::MarkdownHeader),
            "paragraph" => Some(Self::Paragraph),
            "newline" => Some(Self::Newline),
            "sentence" => Some(Self::Sentence),
            "force" => Some(Self::Force),
            _ => None,
        }
    }
}

impl std::fmt::Display for BreakType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk ready for insertion: everything except the row id and timestamp,
/// which the store assigns.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// 0-based position within the page; contiguous per page.
    pub ordinal: i32,

    /// The chunk payload. Plain text, or a JSON object
    /// `{"context": ..., "content": ...}` when contextual annotation is on.
    pub content: String,

    pub break_type: BreakType,

    /// Half-open character offsets into the page markdown at production time.
    pub char_start: i32,
    pub char_end: i32,

    /// L2-normalized embedding, length = configured dimension.
    pub embedding: Vec<f32>,
}

/// A persisted chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub page_url: String,
    pub ordinal: i32,
    pub content: String,
    pub break_type: BreakType,
    pub char_start: i32,
    pub char_end: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_type_round_trip() {
        for bt in [
            BreakType::MarkdownHeader,
            BreakType::Paragraph,
            BreakType::Newline,
            BreakType::Sentence,
            BreakType::Force,
        ] {
            assert_eq!(BreakType::parse(bt.as_str()), Some(bt));
        }
        assert_eq!(BreakType::parse("banana"), None);
    }
}
