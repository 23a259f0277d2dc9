//! Visible-text extraction from HTML pages.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node};

/// Elements whose text never reaches the reader (or is page chrome).
const HIDDEN_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "iframe", "nav", "header", "footer",
];

/// Extract readable text from an HTML document, one text run per line,
/// truncated to `max_chars` characters.
pub fn visible_text(html: &str, max_chars: usize) -> String {
    let doc = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(el) => HIDDEN_TAGS.contains(&el.name()),
            _ => false,
        });
        if hidden {
            continue;
        }

        let line = collapse_whitespace(text);
        if !line.is_empty() {
            lines.push(line);
        }
    }

    truncate_chars(&lines.join("\n"), max_chars)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(s.trim(), " ").into_owned()
}

/// Truncate on a character boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
