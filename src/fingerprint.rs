use sha2::{Digest, Sha256};

use crate::normalize::{normalize_text, normalize_url};

/// Posting-level identity.
///
/// Every component goes through the normalizer, so an absent value and an
/// empty string hash the same. The parts are JSON-encoded rather than joined
/// so no delimiter inside a field can collide with another split.
pub fn compute_fingerprint(
    platform: Option<&str>,
    job_key: Option<&str>,
    canonical_url: Option<&str>,
    title: Option<&str>,
    company: Option<&str>,
    location: Option<&str>,
) -> String {
    let payload = [
        normalize_text(platform),
        normalize_text(job_key),
        normalize_url(canonical_url),
        normalize_text(title),
        normalize_text(company),
        normalize_text(location),
    ];
    sha256_json(&payload)
}

/// Hex SHA-256 of the compact JSON encoding of `payload`.
pub(crate) fn sha256_json<T: serde::Serialize + ?Sized>(payload: &T) -> String {
    // Serializing plain strings, numbers and nulls cannot fail
    let encoded = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(title: &str, company: &str, location: Option<&str>) -> String {
        compute_fingerprint(
            Some("indeed"),
            Some("abc123"),
            Some("https://indeed.com/viewjob?jk=abc123"),
            Some(title),
            Some(company),
            location,
        )
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex_sha256() {
        let value = fp("Backend Engineer", "ACME", Some("Paris"));
        assert_eq!(value.len(), 64);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_ignores_case_whitespace_and_punctuation() {
        assert_eq!(
            fp("Backend Engineer", "ACME", Some("Paris")),
            fp("  backend   ENGINEER!", "acme", Some("paris"))
        );
    }

    #[test]
    fn test_fingerprint_none_and_empty_are_equivalent() {
        let with_none =
            compute_fingerprint(Some("linkedin"), None, None, Some("Dev"), Some("X"), None);
        let with_empty = compute_fingerprint(
            Some("linkedin"),
            Some(""),
            Some(""),
            Some("Dev"),
            Some("X"),
            Some(""),
        );
        assert_eq!(with_none, with_empty);
    }

    #[test]
    fn test_fingerprint_sensitive_to_each_component() {
        let parts = [
            "indeed",
            "abc123",
            "https://indeed.com/viewjob?jk=abc123",
            "Backend Engineer",
            "ACME",
            "Paris",
        ];
        let hash = |p: [&str; 6]| {
            compute_fingerprint(
                Some(p[0]),
                Some(p[1]),
                Some(p[2]),
                Some(p[3]),
                Some(p[4]),
                Some(p[5]),
            )
        };
        let base = hash(parts);
        let replacements = [
            "linkedin",
            "def456",
            "https://indeed.com/viewjob?jk=def456",
            "Frontend Engineer",
            "Initech",
            "Lyon",
        ];
        for (i, replacement) in replacements.into_iter().enumerate() {
            let mut changed = parts;
            changed[i] = replacement;
            assert_ne!(base, hash(changed), "component {i} did not affect the digest");
        }
    }

    #[test]
    fn test_fingerprint_no_delimiter_collisions() {
        let a = compute_fingerprint(Some("indeed"), None, None, Some("a b"), Some("c"), None);
        let b = compute_fingerprint(Some("indeed"), None, None, Some("a"), Some("b c"), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_url_case_in_host_only() {
        let url = |u: &str| compute_fingerprint(Some("x"), None, Some(u), Some("t"), None, None);
        let lower = url("https://ex.com/Job/");
        assert_eq!(lower, url("HTTPS://EX.COM/Job"));
        assert_ne!(lower, url("https://ex.com/job"));
    }

    #[test]
    fn test_sha256_json_known_vector() {
        // sha256 of `[]`
        assert_eq!(
            sha256_json::<[u8]>(&[]),
            "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945"
        );
    }
}
