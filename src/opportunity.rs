//! Grouping key for postings that describe the same real-world opening.

use serde_json::json;

use crate::fingerprint::sha256_json;
use crate::normalize::normalize_text;

/// Bump when the key composition or the normalizer changes, so keys from
/// different schemes never compare equal.
pub const OPPORTUNITY_KEY_VERSION: u32 = 1;

pub fn compute_opportunity_key(title: &str, company: &str, location: Option<&str>) -> String {
    compute_opportunity_key_with_version(OPPORTUNITY_KEY_VERSION, title, company, location)
}

pub fn compute_opportunity_key_with_version(
    version: u32,
    title: &str,
    company: &str,
    location: Option<&str>,
) -> String {
    let payload = json!([
        version,
        normalize_text(Some(title)),
        normalize_text(Some(company)),
        normalize_text(location),
    ]);
    sha256_json(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_key() {
        assert_eq!(
            compute_opportunity_key("Backend Engineer", "ACME", Some("Paris")),
            "1bc099f70be9687cec72d5c5da77f4f2aa726eb1788120545c74f752c57a7293"
        );
    }

    #[test]
    fn test_equivalent_inputs_share_key() {
        assert_eq!(
            compute_opportunity_key("Backend Engineer", "ACME", Some("Île-de-France")),
            compute_opportunity_key("backend  engineer!", "acme", Some("ile-de-france"))
        );
        assert_eq!(
            compute_opportunity_key("Dev", "X", None),
            compute_opportunity_key("Dev", "X", Some(""))
        );
    }

    #[test]
    fn test_different_location_different_key() {
        assert_ne!(
            compute_opportunity_key("Python Developer", "ACME", Some("Montreal")),
            compute_opportunity_key("Python Developer", "ACME", Some("Ottawa"))
        );
    }

    #[test]
    fn test_version_changes_key() {
        assert_ne!(
            compute_opportunity_key_with_version(1, "Dev", "X", None),
            compute_opportunity_key_with_version(2, "Dev", "X", None)
        );
    }
}
