//! HTML → clean markdown extraction.
//!
//! Stage 1 selects the documentation content root with a CSS selector and
//! strips navigational chrome, then converts to markdown with `htmd`.
//! Stages 2–5 are the line-level pollution filter:
//!
//! 2. drop lines containing a blacklisted substring (pure data table)
//! 3. drop lines that are exactly a markdown image reference
//! 4. truncate at the first "See Also" line
//! 5. unlink heading titles (`## [Title](url)` → `## Title`)
//!
//! The only permitted transformations are whole-line drops and the heading
//! rewrite: retained lines keep their leading and trailing whitespace
//! byte-for-byte, so code-block indentation survives every stage.

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// Navigation-chrome substrings dropped by stage 2. A pure data table:
/// extending it is a configuration change, not a code change.
pub const DEFAULT_POLLUTION_PATTERNS: &[&str] = &[
    "Skip Navigation",
    "Global Nav Open Menu",
    "Global Nav Close Menu",
    "Search Developer",
    "Quick Links",
    "To navigate the symbols, press",
    "symbols inside <root>",
    "Open Technology Picker",
    "Select a language:",
];

/// Anchor hosts treated as social chrome and removed in stage 1.
const SOCIAL_HOSTS: &[&str] = &[
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
];

/// Extractor configuration; the pattern table is data, not code.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// CSS selector for the documentation content root.
    pub content_selector: String,
    /// Stage-2 substring blacklist.
    pub pollution_patterns: Vec<String>,
    /// Match the blacklist case-insensitively.
    pub case_insensitive: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            content_selector: "#app-main".to_string(),
            pollution_patterns: DEFAULT_POLLUTION_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            case_insensitive: false,
        }
    }
}

/// Deterministic HTML → markdown extractor.
pub struct ContentExtractor {
    config: ExtractorConfig,
    image_line: Regex,
    heading_link: Regex,
}

impl ContentExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            image_line: Regex::new(r"^!\[[^\]]*\]\([^)]*\)$").expect("static regex"),
            heading_link: Regex::new(r"^(\s*)(#{1,6})\s*\[(.*?)\]\((.*?)\)")
                .expect("static regex"),
        }
    }

    /// Run the full pipeline: content-root selection, markdown conversion,
    /// pollution filter.
    pub fn extract(&self, html: &str) -> String {
        let root_html = self.select_content_root(html);
        let markdown = html_to_markdown(&root_html);
        let filtered = self.filter_markdown(&markdown);

        let original = markdown.chars().count().max(1);
        let retained = filtered.chars().count();
        debug!(
            original_chars = original,
            retained_chars = retained,
            retention_ratio = retained as f64 / original as f64,
            "content extraction complete"
        );
        filtered
    }

    /// Stage 1: isolate the content root and strip navigational chrome.
    fn select_content_root(&self, html: &str) -> String {
        let document = Html::parse_document(html);

        let mut root = None;
        for selector_str in [self.config.content_selector.as_str(), "main", "article", "body"] {
            if let Ok(selector) = Selector::parse(selector_str) {
                if let Some(element) = document.select(&selector).next() {
                    root = Some(element.html());
                    break;
                }
            }
        }
        let root = root.unwrap_or_else(|| document.html());

        strip_chrome(&root)
    }

    /// Stages 2–5 on already-converted markdown. Pure and idempotent: each
    /// stage is a fixed point on its own output.
    pub fn filter_markdown(&self, markdown: &str) -> String {
        let mut kept: Vec<String> = Vec::new();
        for line in markdown.split('\n') {
            // Stage 2: substring blacklist.
            if self.is_polluted(line) {
                continue;
            }
            // Stage 3: whole-line image references.
            if self.image_line.is_match(line) {
                continue;
            }
            kept.push(line.to_string());
        }

        // Stage 4: cut at the first surviving "See Also" line.
        if let Some(cut) = kept
            .iter()
            .position(|line| line.to_lowercase().contains("see also"))
        {
            kept.truncate(cut);
        }

        // Stage 5: unlink heading titles, keeping indentation and level.
        for line in &mut kept {
            let rewritten = self
                .heading_link
                .captures(line)
                .map(|caps| format!("{}{} {}", &caps[1], &caps[2], &caps[3]));
            if let Some(rewritten) = rewritten {
                *line = rewritten;
            }
        }

        kept.join("\n")
    }

    fn is_polluted(&self, line: &str) -> bool {
        if self.config.case_insensitive {
            let lower = line.to_lowercase();
            self.config
                .pollution_patterns
                .iter()
                .any(|p| lower.contains(&p.to_lowercase()))
        } else {
            self.config
                .pollution_patterns
                .iter()
                .any(|p| line.contains(p.as_str()))
        }
    }
}

/// Remove nav/header/footer/aside elements and social-link anchors from an
/// HTML fragment by excising their serialized form.
fn strip_chrome(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();

    for selector_str in ["header", "footer", "nav", "aside"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in fragment.select(&selector) {
                result = result.replace(&element.html(), "");
            }
        }
    }

    if let Ok(anchors) = Selector::parse("a[href]") {
        for element in fragment.select(&anchors) {
            let href = element.value().attr("href").unwrap_or_default();
            if SOCIAL_HOSTS.iter().any(|host| href.contains(host)) {
                result = result.replace(&element.html(), "");
            }
        }
    }

    result
}

/// Convert HTML to markdown, falling back to bare text when conversion
/// fails.
fn html_to_markdown(html: &str) -> String {
    htmd::convert(html).unwrap_or_else(|_| {
        let document = Html::parse_document(html);
        document.root_element().text().collect::<String>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(ExtractorConfig::default())
    }

    #[test]
    fn test_keyboard_navigation_help_is_dropped() {
        let md = "# Framework\n\
                  To navigate the symbols, press Up Arrow, Down Arrow, Left Arrow or Right Arrow\n\
                  Real documentation text.";
        let out = extractor().filter_markdown(md);
        assert!(!out.contains("To navigate the symbols"));
        assert!(out.contains("Real documentation text."));
    }

    #[test]
    fn test_code_indentation_survives_verbatim() {
        let md = "Some prose\n```\nWindowGroup {\n  Modules()\n    .environment(model)\n}\n```\nmore prose";
        let out = extractor().filter_markdown(md);
        assert!(out.contains("\n  Modules()\n"));
        assert!(out.contains("\n    .environment(model)\n"));
        assert_eq!(out, md);
    }

    #[test]
    fn test_image_lines_dropped_inline_images_kept() {
        let md = "before\n![diagram](https://example.com/d.png)\ntext with ![icon](x.png) inline";
        let out = extractor().filter_markdown(md);
        assert!(!out.contains("diagram"));
        // Only whole-line image references are dropped.
        assert!(out.contains("text with ![icon](x.png) inline"));
    }

    #[test]
    fn test_see_also_truncation_is_case_insensitive() {
        let md = "intro\nmiddle\n## SEE ALSO\ntrailing link one\ntrailing link two";
        let out = extractor().filter_markdown(md);
        assert_eq!(out, "intro\nmiddle");
    }

    #[test]
    fn test_heading_link_rewrite_keeps_indent_and_level() {
        let md = "  ### [Scene Phases](https://example.com/scenephase)";
        let out = extractor().filter_markdown(md);
        assert_eq!(out, "  ### Scene Phases");
    }

    #[test]
    fn test_filter_is_idempotent() {
        let md = "# Title\n\
                  Skip Navigation\n\
                  ## [Linked](https://example.com)\n\
                  ![img](a.png)\n\
                  body text\n\
                  see also\n\
                  dropped";
        let ex = extractor();
        let once = ex.filter_markdown(md);
        let twice = ex.filter_markdown(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_retained_lines_are_never_trimmed() {
        let md = "    indented code line\n\ttabbed line\nplain";
        let out = extractor().filter_markdown(md);
        assert_eq!(out, md);
    }

    #[test]
    fn test_case_insensitive_blacklist_option() {
        let config = ExtractorConfig {
            case_insensitive: true,
            ..ExtractorConfig::default()
        };
        let ex = ContentExtractor::new(config);
        let out = ex.filter_markdown("SKIP NAVIGATION\nkept");
        assert_eq!(out, "kept");
    }

    #[test]
    fn test_content_root_selection() {
        let html = r#"<html><body>
            <nav>site nav</nav>
            <div id="app-main"><h1>Doc Title</h1><p>Body text.</p></div>
            <footer>footer text</footer>
        </body></html>"#;
        let out = extractor().extract(html);
        assert!(out.contains("Doc Title"));
        assert!(out.contains("Body text."));
        assert!(!out.contains("site nav"));
        assert!(!out.contains("footer text"));
    }

    #[test]
    fn test_social_anchors_removed() {
        let html = r#"<div id="app-main">
            <p>Keep this.</p>
            <a href="https://twitter.com/example">Follow us</a>
        </div>"#;
        let out = extractor().extract(html);
        assert!(out.contains("Keep this."));
        assert!(!out.contains("Follow us"));
    }
}
