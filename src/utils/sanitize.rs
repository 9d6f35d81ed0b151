use ammonia::Builder;
use std::collections::HashSet;

/// Tags kept in imported message bodies.
const MESSAGE_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "br", "caption", "cite", "code", "col", "colgroup",
    "dd", "del", "div", "dl", "dt", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i",
    "img", "ins", "li", "mark", "ol", "p", "pre", "q", "s", "small", "span", "strike",
    "strong", "sub", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "u", "ul",
];

/// Clean an email body before it is stored. Scripts, event handlers and
/// non-http(s)/mailto/data URLs are removed; ordinary formatting survives.
pub fn sanitize_message_html(html: &str) -> String {
    let mut builder = Builder::default();

    builder.tags(MESSAGE_TAGS.iter().copied().collect::<HashSet<_>>());
    builder.link_rel(Some("noopener noreferrer"));
    builder.url_schemes(["http", "https", "mailto", "data"].into_iter().collect());

    builder.clean(html).to_string()
}

/// Strip every tag, leaving only text. Used to derive a plain-text body when
/// an import only supplies HTML.
pub fn strip_html_tags(html: &str) -> String {
    let mut builder = Builder::default();
    builder.tags(HashSet::new());
    let text = builder.clean(html).to_string();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_removes_script_tags() {
        let malicious = "<p>Hello</p><script>alert('XSS')</script>";
        let sanitized = sanitize_message_html(malicious);
        assert!(!sanitized.contains("<script>"));
        assert!(!sanitized.contains("alert"));
        assert!(sanitized.contains("<p>Hello</p>"));
    }

    #[test]
    fn test_sanitize_removes_onclick_and_javascript_urls() {
        let malicious = "<a href='javascript:alert(1)' onclick='alert(1)'>Click</a>";
        let sanitized = sanitize_message_html(malicious);
        assert!(!sanitized.contains("onclick"));
        assert!(!sanitized.contains("javascript:"));
        assert!(sanitized.contains("Click"));
    }

    #[test]
    fn test_sanitize_keeps_email_formatting() {
        let html = "<p>Hi team,</p><ul><li>Core features</li></ul><table><tr><td>Cell</td></tr></table>";
        let sanitized = sanitize_message_html(html);
        assert!(sanitized.contains("<ul>"));
        assert!(sanitized.contains("<li>Core features</li>"));
        assert!(sanitized.contains("<td>Cell</td>"));
    }

    #[test]
    fn test_plain_text_is_untouched() {
        assert_eq!(sanitize_message_html("Just text"), "Just text");
    }

    #[test]
    fn test_strip_html_tags_collapses_whitespace() {
        let html = "<p>Hello <strong>world</strong></p>\n<p>Second   line</p>";
        assert_eq!(strip_html_tags(html), "Hello world Second line");
    }
}
