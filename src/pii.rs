//! Removal of the mailbox owner's identity from email samples.

use std::collections::BTreeMap;

use regex::Regex;

use crate::config::Settings;
use crate::error::ConfigError;
use crate::html::EmailDocument;

pub type HeaderMap = BTreeMap<String, String>;

pub const HTML_REPLACEMENT: &str = "[REDACTED]";
/// Headers are short single-line values; a marker would just be noise there.
pub const HEADER_REPLACEMENT: &str = "";

const ALLOWED_HEADERS: [&str; 12] = [
    "from",
    "subject",
    "date",
    "message-id",
    "mime-version",
    "content-type",
    // Indeed
    "preheader",
    "x-indeed-content-type",
    "x-indeed-client-app",
    "x-campaign-id",
    // LinkedIn
    "x-linkedin-class",
    "x-linkedin-template",
];

/// Compiled identity patterns for one mailbox owner.
#[derive(Debug, Clone)]
pub struct PiiPatterns {
    pub name: Regex,
    pub email: Regex,
}

impl PiiPatterns {
    /// Fails closed: all three identity fields are required.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            name: build_name_pattern(
                settings.user_first_name.as_deref(),
                settings.user_last_name.as_deref(),
            )?,
            email: build_email_pattern(settings.email_address.as_deref())?,
        })
    }

    pub fn redact_document(&self, document: &mut EmailDocument) {
        redact_pii(document, Some(&self.name), Some(&self.email));
    }

    /// Plain-text counterpart of `redact_document`, for values lifted out of
    /// the HTML such as parsed job fields.
    pub fn redact_text(&self, text: &str) -> String {
        let redacted = self.email.replace_all(text, HTML_REPLACEMENT);
        self.name.replace_all(&redacted, HTML_REPLACEMENT).into_owned()
    }

    pub fn sanitize_headers(&self, headers: &HeaderMap) -> HeaderMap {
        sanitize_headers(headers, Some(&self.name), Some(&self.email))
    }
}

/// Whole-word, case-insensitive match on either name.
pub fn build_name_pattern(first: Option<&str>, last: Option<&str>) -> Result<Regex, ConfigError> {
    let first = required(first, "user first name")?;
    let last = required(last, "user last name")?;
    let pattern = format!(r"(?i)\b(?:{}|{})\b", regex::escape(first), regex::escape(last));
    Ok(Regex::new(&pattern)?)
}

/// Matches the address bare, in angle brackets, and URL-encoded.
pub fn build_email_pattern(email: Option<&str>) -> Result<Regex, ConfigError> {
    let email = required(email, "email address")?;
    let escaped = regex::escape(email);
    let encoded = regex::escape(&email.replace('@', "%40"));
    let pattern = format!("(?i)(?:<{escaped}>|{escaped}|{encoded})");
    Ok(Regex::new(&pattern)?)
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingIdentity(field))
}

/// Replace identity matches with `[REDACTED]` in text nodes, `alt`
/// attributes and link targets. An absent pattern is skipped.
pub fn redact_pii(document: &mut EmailDocument, name: Option<&Regex>, email: Option<&Regex>) {
    let patterns: Vec<&Regex> = [email, name].into_iter().flatten().collect();
    if patterns.is_empty() {
        return;
    }

    document.rewrite_text_nodes(|text| {
        if !patterns.iter().any(|p| p.is_match(text)) {
            return None;
        }
        let mut redacted = text.to_string();
        for pattern in &patterns {
            redacted = pattern.replace_all(&redacted, HTML_REPLACEMENT).into_owned();
        }
        Some(redacted)
    });

    for pattern in patterns {
        document.redact_attributes(pattern.clone(), HTML_REPLACEMENT);
    }
}

/// Keep only the allowed headers; keys are lowercased and `content-type`
/// loses its parameters (boundaries are random noise).
pub fn whitelist_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(key, value)| {
            let key = key.trim().to_lowercase();
            if !ALLOWED_HEADERS.contains(&key.as_str()) {
                return None;
            }
            let value = if key == "content-type" {
                value.split(';').next().unwrap_or_default().trim().to_string()
            } else {
                value.clone()
            };
            Some((key, value))
        })
        .collect()
}

pub fn redact_headers(
    headers: HeaderMap,
    name: Option<&Regex>,
    email: Option<&Regex>,
) -> HeaderMap {
    headers
        .into_iter()
        .map(|(key, mut value)| {
            // Email first so the name pattern cannot split an address
            for pattern in [email, name].into_iter().flatten() {
                value = pattern.replace_all(&value, HEADER_REPLACEMENT).into_owned();
            }
            (key, value)
        })
        .collect()
}

pub fn sanitize_headers(
    headers: &HeaderMap,
    name: Option<&Regex>,
    email: Option<&Regex>,
) -> HeaderMap {
    redact_headers(whitelist_headers(headers), name, email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::strip_structure;

    fn patterns() -> PiiPatterns {
        let settings = Settings {
            user_first_name: Some("Jane".to_string()),
            user_last_name: Some("Doe".to_string()),
            email_address: Some("jane.doe@example.com".to_string()),
            ..Settings::default()
        };
        PiiPatterns::from_settings(&settings).expect("patterns")
    }

    #[test]
    fn test_name_pattern_whole_word_case_insensitive() {
        let re = build_name_pattern(Some("Jane"), Some("Doe")).expect("pattern");
        assert!(re.is_match("Hello JANE"));
        assert!(re.is_match("doe, jane"));
        assert!(!re.is_match("Janet Doesburg"));
    }

    #[test]
    fn test_name_pattern_escapes_metacharacters() {
        let re = build_name_pattern(Some("J.R"), Some("O'Neil")).expect("pattern");
        assert!(re.is_match("Dear J.R"));
        assert!(!re.is_match("Dear JxR"));
    }

    #[test]
    fn test_missing_identity_fails_closed() {
        assert!(matches!(
            build_name_pattern(Some("Jane"), None),
            Err(ConfigError::MissingIdentity(_))
        ));
        assert!(matches!(
            build_name_pattern(Some("  "), Some("Doe")),
            Err(ConfigError::MissingIdentity(_))
        ));
        assert!(matches!(build_email_pattern(None), Err(ConfigError::MissingIdentity(_))));
        assert!(PiiPatterns::from_settings(&Settings::default()).is_err());
    }

    #[test]
    fn test_email_pattern_variants() {
        let re = build_email_pattern(Some("jane.doe@example.com")).expect("pattern");
        assert_eq!(re.replace_all("To: <Jane.Doe@Example.com>", ""), "To: ");
        assert_eq!(re.replace_all("u=jane.doe%40example.com&x=1", ""), "u=&x=1");
        assert!(!re.is_match("janeXdoe@example.com"));
    }

    #[test]
    fn test_redact_document_text_alt_and_href() {
        let mut doc = strip_structure(
            r#"<p>Hi Jane, here are jobs for jane.doe@example.com</p>
            <img src="a.png" width="80" alt="Photo of Jane Doe">
            <a href="https://x.com/settings?u=jane.doe%40example.com">Manage</a>"#,
        );
        patterns().redact_document(&mut doc);
        let out = doc.to_html();
        assert!(out.contains("Hi [REDACTED], here are jobs for [REDACTED]"));
        assert!(out.contains(r#"alt="Photo of [REDACTED] [REDACTED]""#));
        assert!(out.contains("u=[REDACTED]"));
        assert!(!out.to_lowercase().contains("jane"));
    }

    #[test]
    fn test_redact_pii_skips_absent_patterns() {
        let mut doc = strip_structure("<p>Jane</p>");
        redact_pii(&mut doc, None, None);
        assert!(doc.to_html().contains("<p>Jane</p>"));
    }

    #[test]
    fn test_whitelist_headers() {
        let raw: HeaderMap = [
            ("From", "Indeed <alert@indeed.com>"),
            ("Received", "from mx.example.com"),
            ("DKIM-Signature", "v=1"),
            (" Content-Type ", "multipart/alternative; boundary=\"XYZ\""),
            ("X-LinkedIn-Template", "jobs_alert"),
            ("List-Unsubscribe", "<https://x.com/u?id=1>"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cleaned = whitelist_headers(&raw);
        assert_eq!(cleaned.len(), 3);
        assert_eq!(cleaned["from"], "Indeed <alert@indeed.com>");
        assert_eq!(cleaned["content-type"], "multipart/alternative");
        assert_eq!(cleaned["x-linkedin-template"], "jobs_alert");
    }

    #[test]
    fn test_sanitize_headers_uses_empty_replacement() {
        let raw: HeaderMap = [
            ("subject", "Jane, 12 new Python jobs"),
            ("to", "Jane Doe <jane.doe@example.com>"),
            ("message-id", "<abc@mail>"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cleaned = patterns().sanitize_headers(&raw);
        assert_eq!(cleaned.get("to"), None);
        assert_eq!(cleaned["subject"], ", 12 new Python jobs");
        assert_eq!(cleaned["message-id"], "<abc@mail>");
    }
}
