//! Clean-text extraction from fetched HTML.
//!
//! Boilerplate elements (scripts, styles, navigation, chrome) are skipped
//! during traversal, the main content container is preferred over the full
//! body, whitespace is collapsed, and the result is capped in length.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Elements whose entire subtree is boilerplate.
const STRIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "form", "iframe", "svg",
];

/// Content containers tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    ".content",
    ".post-content",
    ".entry-content",
    "#content",
];

/// A container must yield at least this much text to win over `<body>`.
const MIN_CONTAINER_CHARS: usize = 200;

/// Extracted page text plus its title, if any.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub title: Option<String>,
    pub content: String,
}

/// Extract clean text from an HTML document, capped at `max_chars`.
pub fn extract_text(html: &str, max_chars: usize) -> ExtractedText {
    let doc = Html::parse_document(html);

    let title = extract_title(&doc);

    let mut content = String::new();
    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(container) = doc.select(&selector).next() {
            let text = collect_text(container);
            if text.len() >= MIN_CONTAINER_CHARS {
                content = text;
                break;
            }
        }
    }

    if content.is_empty() {
        let body_sel = Selector::parse("body").expect("valid selector");
        if let Some(body) = doc.select(&body_sel).next() {
            content = collect_text(body);
        }
    }

    ExtractedText {
        title,
        content: truncate_chars(&content, max_chars),
    }
}

/// Page title: `<title>` first, `<h1>` as fallback.
fn extract_title(doc: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        let selector = Selector::parse(selector_str).expect("valid selector");
        if let Some(el) = doc.select(&selector).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Collect the text of an element, skipping boilerplate subtrees and
/// collapsing whitespace runs.
fn collect_text(root: ElementRef<'_>) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let mut out = String::new();
    walk(root, &mut out);
    WS_RE.replace_all(out.trim(), " ").into_owned()
}

fn walk(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if STRIP_TAGS.contains(&child_el.value().name()) {
                continue;
            }
            walk(child_el, out);
        }
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_chrome() {
        let html = r#"<html><head><title>Test Page</title></head><body>
            <nav>Home | About</nav>
            <script>var tracking = true;</script>
            <main><p>Actual article text goes here.</p></main>
            <footer>Copyright</footer>
        </body></html>"#;
        let extracted = extract_text(html, 10_000);
        assert!(extracted.content.contains("Actual article text"));
        assert!(!extracted.content.contains("tracking"));
        assert!(!extracted.content.contains("Copyright"));
        assert_eq!(extracted.title.as_deref(), Some("Test Page"));
    }

    #[test]
    fn prefers_article_container_when_substantial() {
        let filler = "word ".repeat(100);
        let html = format!(
            "<html><body><div class=\"sidebar\">sidebar junk</div>\
             <article>{filler}</article></body></html>"
        );
        let extracted = extract_text(&html, 10_000);
        assert!(extracted.content.contains("word"));
        assert!(!extracted.content.contains("sidebar junk"));
    }

    #[test]
    fn falls_back_to_body_for_thin_containers() {
        let html = r#"<html><body>
            <article>tiny</article>
            <p>The rest of the page has the real text content of the document.</p>
        </body></html>"#;
        let extracted = extract_text(html, 10_000);
        assert!(extracted.content.contains("real text content"));
    }

    #[test]
    fn collapses_whitespace() {
        let html = "<html><body><main><p>one\n\n   two\t\tthree</p></main></body></html>";
        let extracted = extract_text(html, 10_000);
        assert!(extracted.content.contains("one two three"));
    }

    #[test]
    fn caps_length_on_char_boundary() {
        let html = format!("<html><body><p>{}</p></body></html>", "é".repeat(500));
        let extracted = extract_text(&html, 100);
        assert_eq!(extracted.content.chars().count(), 100);
    }

    #[test]
    fn h1_title_fallback() {
        let html = "<html><body><h1>Heading Title</h1><p>text</p></body></html>";
        let extracted = extract_text(html, 10_000);
        assert_eq!(extracted.title.as_deref(), Some("Heading Title"));
    }
}
