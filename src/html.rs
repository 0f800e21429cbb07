//! Structural cleanup of alert email HTML.
//!
//! Emails carry a lot of markup nobody reads: style blocks, Outlook
//! conditional comments, hidden preheader text, tracking pixels. Parsers and
//! sample fixtures only want the visible structure.

use std::fmt::Write as _;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use crate::canonical::sanitize_job_url;

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: [&str; 7] =
    ["style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext"];

/// A parsed, stripped email body.
///
/// Text nodes can be rewritten in place. Attribute rewrites (redacted `alt`
/// text, sanitized links) are recorded and applied whenever the document is
/// rendered, so `html()` still exposes the original attribute values.
pub struct EmailDocument {
    html: Html,
    attribute_patterns: Vec<(Regex, &'static str)>,
    sanitize_links: bool,
}

impl EmailDocument {
    pub fn new(html: Html) -> Self {
        Self {
            html,
            attribute_patterns: Vec::new(),
            sanitize_links: false,
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Replace every link target with its tracking-free form on render.
    pub fn sanitize_links(&mut self) {
        self.sanitize_links = true;
    }

    /// Rewrite `alt` and `<a href>` values matching `pattern` on render.
    pub(crate) fn redact_attributes(&mut self, pattern: Regex, replacement: &'static str) {
        self.attribute_patterns.push((pattern, replacement));
    }

    /// Apply `rewrite` to every attached text node; `None` leaves it as is.
    pub(crate) fn rewrite_text_nodes<F>(&mut self, rewrite: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let updates: Vec<_> = self
            .html
            .tree
            .root()
            .descendants()
            .filter_map(|node| match node.value() {
                Node::Text(text) => {
                    let current: &str = &text.text;
                    rewrite(current).map(|new| (node.id(), new))
                }
                _ => None,
            })
            .collect();

        for (id, new) in updates {
            if let Some(mut node) = self.html.tree.get_mut(id) {
                if let Node::Text(text) = node.value() {
                    text.text = new.as_str().into();
                }
            }
        }
    }

    /// Visible text, whitespace collapsed.
    pub fn text(&self) -> String {
        collapse_whitespace(&self.html.root_element().text().collect::<Vec<_>>().join(" "))
    }

    /// Faithful serialization of the stripped tree.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.html.tree.root().children() {
            if let Some(element) = ElementRef::wrap(child) {
                self.write_element(element, &mut out);
                continue;
            }
            match child.value() {
                Node::Doctype(doctype) => {
                    let _ = write!(out, "<!DOCTYPE {}>", doctype.name());
                }
                Node::Comment(comment) => {
                    let _ = write!(out, "<!--{}-->", &*comment.comment);
                }
                Node::Text(text) => out.push_str(&escape_text(&text.text)),
                _ => {}
            }
        }
        out
    }

    /// One node per line, one space of indent per level. Whitespace-only
    /// text is dropped, so this is for reading, not for round-tripping.
    pub fn prettify(&self) -> String {
        let mut out = String::new();
        for child in self.html.tree.root().children() {
            if let Some(element) = ElementRef::wrap(child) {
                self.write_pretty(element, 0, &mut out);
                continue;
            }
            if let Node::Doctype(doctype) = child.value() {
                let _ = writeln!(out, "<!DOCTYPE {}>", doctype.name());
            }
        }
        out
    }

    fn write_element(&self, element: ElementRef<'_>, out: &mut String) {
        let name = element.value().name();
        self.write_open_tag(element, out);
        if VOID_ELEMENTS.contains(&name) {
            return;
        }

        let raw = RAW_TEXT_ELEMENTS.contains(&name);
        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                self.write_element(child_element, out);
                continue;
            }
            match child.value() {
                Node::Text(text) if raw => out.push_str(&text.text),
                Node::Text(text) => out.push_str(&escape_text(&text.text)),
                Node::Comment(comment) => {
                    let _ = write!(out, "<!--{}-->", &*comment.comment);
                }
                _ => {}
            }
        }
        let _ = write!(out, "</{name}>");
    }

    fn write_pretty(&self, element: ElementRef<'_>, depth: usize, out: &mut String) {
        let name = element.value().name();
        let indent = " ".repeat(depth);
        out.push_str(&indent);
        self.write_open_tag(element, out);
        out.push('\n');
        if VOID_ELEMENTS.contains(&name) {
            return;
        }

        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                self.write_pretty(child_element, depth + 1, out);
                continue;
            }
            if let Node::Text(text) = child.value() {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    let _ = writeln!(out, "{indent} {}", escape_text(trimmed));
                }
            }
        }
        let _ = writeln!(out, "{indent}</{name}>");
    }

    fn write_open_tag(&self, element: ElementRef<'_>, out: &mut String) {
        let tag = element.value();
        let _ = write!(out, "<{}", tag.name());
        for (attr, value) in tag.attrs() {
            let rendered = self.render_attribute(tag.name(), attr, value);
            let _ = write!(out, " {attr}=\"{}\"", escape_attribute(&rendered));
        }
        out.push('>');
    }

    fn render_attribute(&self, tag: &str, attr: &str, value: &str) -> String {
        let is_link = tag == "a" && attr == "href";
        let mut rendered = if is_link && self.sanitize_links {
            sanitize_job_url(value)
        } else {
            value.to_string()
        };
        if is_link || attr == "alt" {
            for (pattern, replacement) in &self.attribute_patterns {
                rendered = pattern.replace_all(&rendered, *replacement).into_owned();
            }
        }
        rendered
    }
}

/// Parse `raw` and detach everything that is not readable content.
pub fn strip_structure(raw: &str) -> EmailDocument {
    let mut html = Html::parse_document(raw);

    let doomed: Vec<_> = html
        .tree
        .root()
        .descendants()
        .filter(|node| is_noise(node.value()))
        .map(|node| node.id())
        .collect();

    for id in doomed {
        if let Some(mut node) = html.tree.get_mut(id) {
            node.detach();
        }
    }

    EmailDocument::new(html)
}

fn is_noise(node: &Node) -> bool {
    match node {
        Node::Comment(_) => true,
        Node::Element(element) => match element.name() {
            "style" | "meta" | "script" => true,
            "div" => element.attr("style").is_some_and(is_hidden_style),
            "img" => ["width", "height"]
                .iter()
                .any(|attr| element.attr(attr).is_some_and(is_pixel_dimension)),
            _ => false,
        },
        _ => false,
    }
}

/// `display:none`, `height:0` or `max-height:0` in an inline style.
fn is_hidden_style(style: &str) -> bool {
    style.split(';').filter_map(|decl| decl.split_once(':')).any(|(prop, value)| {
        let prop = prop.trim().to_ascii_lowercase();
        let value = style_signature(value);
        let value = value.trim_end_matches("!important");
        match prop.as_str() {
            "display" => value == "none",
            "height" | "max-height" => matches!(value, "0" | "0px"),
            _ => false,
        }
    })
}

fn is_pixel_dimension(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "1" | "1px")
}

/// Inline style with all whitespace removed and lowercased, for substring
/// matching that survives `font-size: 16px` vs `FONT-SIZE:16px`.
pub fn style_signature(style: &str) -> String {
    style
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn has_style(element: ElementRef<'_>, fragment: &str) -> bool {
    element
        .value()
        .attr("style")
        .is_some_and(|style| style_signature(style).contains(&style_signature(fragment)))
}

/// Text content with whitespace runs collapsed to one space.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOISY: &str = r#"<!DOCTYPE html>
<html><head>
<meta charset="utf-8"><style>.x { color: red }</style>
<script>track()</script>
</head><body>
<!--[if mso]><table><tr><td>outlook</td></tr></table><![endif]-->
<div style="display: none; max-height:0px">Preheader you never see</div>
<div style="MAX-HEIGHT: 0">also hidden</div>
<div style="color:#333">Visible block</div>
<img src="https://t.example.com/open.gif" width="1" height="1">
<img src="https://cdn.example.com/logo.png" width="120" alt="Logo">
<p>Hello &amp; welcome</p>
</body></html>"#;

    #[test]
    fn test_strip_removes_noise() {
        let doc = strip_structure(NOISY);
        let out = doc.to_html();
        assert!(!out.contains("<style"));
        assert!(!out.contains("<script"));
        assert!(!out.contains("<meta"));
        assert!(!out.contains("<!--"));
        assert!(!out.contains("outlook"));
        assert!(!out.contains("Preheader"));
        assert!(!out.contains("also hidden"));
        assert!(!out.contains("open.gif"));
    }

    #[test]
    fn test_strip_preserves_content() {
        let doc = strip_structure(NOISY);
        let out = doc.to_html();
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains(r#"<div style="color:#333">Visible block</div>"#));
        assert!(out.contains("logo.png"));
        assert!(out.contains(r#"alt="Logo""#));
        assert!(out.contains("<p>Hello &amp; welcome</p>"));
        assert_eq!(doc.text(), "Visible block Hello & welcome");
    }

    #[test]
    fn test_strip_never_fails_on_broken_markup() {
        let doc = strip_structure("<table><tr><td>unclosed <b>bold");
        assert!(doc.text().contains("unclosed bold"));
    }

    #[test]
    fn test_hidden_style_parsing() {
        assert!(is_hidden_style("display:none"));
        assert!(is_hidden_style("color:red; DISPLAY : None !important"));
        assert!(is_hidden_style("height: 0px"));
        assert!(!is_hidden_style("line-height:0"));
        assert!(!is_hidden_style("max-height:10px"));
        assert!(!is_hidden_style("display:block"));
    }

    #[test]
    fn test_pixel_dimension() {
        assert!(is_pixel_dimension("1"));
        assert!(is_pixel_dimension("0"));
        assert!(is_pixel_dimension("1PX"));
        assert!(!is_pixel_dimension("10"));
        assert!(!is_pixel_dimension(""));
    }

    #[test]
    fn test_prettify_one_node_per_line() {
        let doc = strip_structure("<html><body><p>Hi <b>there</b></p></body></html>");
        let pretty = doc.prettify();
        let lines: Vec<&str> = pretty.lines().collect();
        assert!(lines.contains(&"  <p>"));
        assert!(lines.contains(&"   Hi"));
        assert!(lines.contains(&"   <b>"));
        assert!(lines.contains(&"    there"));
        assert!(lines.contains(&"  </p>"));
    }

    #[test]
    fn test_sanitize_links_on_render() {
        let mut doc = strip_structure(
            r#"<a href="https://indeed.com/rc/clk?jk=abc123&amp;tk=me">job</a><a href="https://x.com/u?t=1">x</a>"#,
        );
        doc.sanitize_links();
        let out = doc.to_html();
        assert!(out.contains(r#"href="https://indeed.com/viewjob?jk=abc123""#));
        assert!(out.contains(r#"href="https://x.com/u""#));
        // the tree itself is untouched
        let sel = scraper::Selector::parse("a").expect("selector");
        let first = doc.html().select(&sel).next().and_then(|a| a.value().attr("href"));
        assert_eq!(first, Some("https://indeed.com/rc/clk?jk=abc123&tk=me"));
    }

    #[test]
    fn test_style_signature_and_element_text() {
        assert_eq!(
            style_signature("Font-Size: 16px; LINE-HEIGHT: 1.25"),
            "font-size:16px;line-height:1.25"
        );
        let html = Html::parse_fragment(r#"<div style="font-size: 16px">  Backend
            <b>Engineer</b> </div>"#);
        let sel = scraper::Selector::parse("div").expect("selector");
        let div = html.select(&sel).next().expect("div");
        assert!(has_style(div, "font-size:16px"));
        assert_eq!(element_text(div), "Backend Engineer");
    }
}
