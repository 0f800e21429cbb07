//! Canonical comparable forms for scraped text and URLs.
//!
//! Both functions feed the identity hashes, so they must stay stable across
//! releases. Changing them means bumping `OPPORTUNITY_KEY_VERSION`.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Lowercase, accent-fold and strip incidental punctuation.
///
/// Word characters, whitespace and `+ # . / & -` survive because they carry
/// meaning in job titles (`C++`, `C#`, `Node.js`, `R&D`, `Full-stack`).
/// `None`, `""` and punctuation-only input all normalize to `None`.
pub fn normalize_text(value: Option<&str>) -> Option<String> {
    let lowered = value?.trim().to_lowercase();

    let folded: String = lowered
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| is_semantic_char(*c))
        .collect();

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn is_semantic_char(c: char) -> bool {
    c.is_alphanumeric()
        || c == '_'
        || c.is_whitespace()
        || matches!(c, '+' | '#' | '.' | '/' | '&' | '-')
}

/// Lowercase scheme and host, drop one trailing slash from the path.
/// Query and fragment are kept verbatim.
pub fn normalize_url(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }

    let parts = UrlParts::split(value);
    let mut out = String::with_capacity(value.len());
    if let Some(scheme) = parts.scheme {
        out.push_str(&scheme.to_ascii_lowercase());
        out.push(':');
    }
    if let Some(authority) = parts.authority {
        out.push_str("//");
        out.push_str(&authority.to_lowercase());
    }
    out.push_str(parts.path.strip_suffix('/').unwrap_or(parts.path));
    out.push_str(parts.tail);

    Some(out)
}

/// Borrowed view over the pieces of a URL, split the way browsers read
/// `scheme://authority/path?query#fragment`. No percent-decoding happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UrlParts<'a> {
    pub scheme: Option<&'a str>,
    pub authority: Option<&'a str>,
    pub path: &'a str,
    /// `?query#fragment`, including the leading delimiter.
    pub tail: &'a str,
}

impl<'a> UrlParts<'a> {
    pub fn split(url: &'a str) -> Self {
        let (scheme, rest) = match url.split_once(':') {
            Some((scheme, rest)) if is_scheme(scheme) => (Some(scheme), rest),
            _ => (None, url),
        };

        let (authority, rest) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find(['/', '?', '#']).unwrap_or(after.len());
                (Some(&after[..end]), &after[end..])
            }
            None => (None, rest),
        };

        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        Self {
            scheme,
            authority,
            path: &rest[..end],
            tail: &rest[end..],
        }
    }

    /// Host without userinfo or port, lowercased.
    pub fn host(&self) -> Option<String> {
        let authority = self.authority?;
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = host_port.split(':').next().unwrap_or(host_port);
        Some(host.to_ascii_lowercase())
    }

    /// Query string without the leading `?` and without the fragment.
    pub fn query(&self) -> Option<&'a str> {
        let query = self.tail.strip_prefix('?')?;
        Some(query.split('#').next().unwrap_or(query))
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_none_empty_and_blank_are_equivalent() {
        assert_eq!(normalize_text(None), None);
        assert_eq!(normalize_text(Some("")), None);
        assert_eq!(normalize_text(Some("   ")), None);
        assert_eq!(normalize_text(Some("!!!")), None);
    }

    #[test]
    fn test_normalize_text_case_accents_and_whitespace() {
        assert_eq!(normalize_text(Some("Backend Engineer")).as_deref(), Some("backend engineer"));
        assert_eq!(normalize_text(Some("café ingénieur")).as_deref(), Some("cafe ingenieur"));
        assert_eq!(normalize_text(Some("Café   Ingénieur!")).as_deref(), Some("cafe ingenieur"));
        assert_eq!(
            normalize_text(Some("  Backend \t\n Engineer  ")).as_deref(),
            Some("backend engineer")
        );
        assert_eq!(
            normalize_text(Some("Paris, Île-de-France")).as_deref(),
            Some("paris ile-de-france")
        );
    }

    #[test]
    fn test_normalize_text_removes_incidental_punctuation() {
        assert_eq!(normalize_text(Some("Python Developer!")).as_deref(), Some("python developer"));
        assert_eq!(normalize_text(Some("Python Developer?")).as_deref(), Some("python developer"));
        assert_eq!(
            normalize_text(Some("Cloud Devops (Go - Python)")).as_deref(),
            Some("cloud devops go - python")
        );
        // Removing a lone symbol must not leave a double space behind
        assert_eq!(normalize_text(Some("Data ! Engineer")).as_deref(), Some("data engineer"));
    }

    #[test]
    fn test_normalize_text_keeps_semantic_symbols() {
        assert_eq!(normalize_text(Some("C++ Developer")).as_deref(), Some("c++ developer"));
        assert_eq!(normalize_text(Some("C# Developer")).as_deref(), Some("c# developer"));
        assert_eq!(normalize_text(Some("Node.js Developer")).as_deref(), Some("node.js developer"));
        assert_eq!(normalize_text(Some("R&D / QA_Lead")).as_deref(), Some("r&d / qa_lead"));
    }

    #[test]
    fn test_normalize_text_is_idempotent() {
        for input in ["Café   Ingénieur!", "C++ / Rust-Dev", "  ÉCOLE  "] {
            let once = normalize_text(Some(input));
            assert_eq!(normalize_text(once.as_deref()), once);
        }
    }

    #[test]
    fn test_normalize_url_scheme_host_and_trailing_slash() {
        assert_eq!(
            normalize_url(Some("HTTPS://Example.COM/Job/1/")).as_deref(),
            Some("https://example.com/Job/1")
        );
        assert_eq!(
            normalize_url(Some("https://example.com/")).as_deref(),
            Some("https://example.com")
        );
        // Only one trailing slash goes
        assert_eq!(
            normalize_url(Some("https://example.com/a//")).as_deref(),
            Some("https://example.com/a/")
        );
    }

    #[test]
    fn test_normalize_url_keeps_query_and_fragment() {
        assert_eq!(
            normalize_url(Some("https://Indeed.com/viewjob/?jk=AbC#Top")).as_deref(),
            Some("https://indeed.com/viewjob?jk=AbC#Top")
        );
    }

    #[test]
    fn test_normalize_url_blank_is_none() {
        assert_eq!(normalize_url(None), None);
        assert_eq!(normalize_url(Some("")), None);
        assert_eq!(normalize_url(Some("  ")), None);
    }

    #[test]
    fn test_normalize_url_without_scheme_is_a_path() {
        assert_eq!(normalize_url(Some("jobs/view/1/")).as_deref(), Some("jobs/view/1"));
    }

    #[test]
    fn test_url_parts_host_and_query() {
        let parts = UrlParts::split("https://user@WWW.LinkedIn.com:443/jobs/view/42?ref=x#frag");
        assert_eq!(parts.scheme, Some("https"));
        assert_eq!(parts.host().as_deref(), Some("www.linkedin.com"));
        assert_eq!(parts.path, "/jobs/view/42");
        assert_eq!(parts.query(), Some("ref=x"));
    }
}
