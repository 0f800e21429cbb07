//! Platform-specific extraction of job listings from alert email HTML.

mod indeed;
mod linkedin;

pub use indeed::IndeedParser;
pub use linkedin::LinkedInParser;

use scraper::Html;

use crate::config::DEFAULT_ALERT_KEYWORDS;
use crate::models::RawJobRecord;

pub const INDEED: &str = "indeed";
pub const LINKEDIN: &str = "linkedin";

/// One alert format. Implementations are stateless apart from their
/// configured subject keywords.
pub trait JobAlertParser: Send + Sync {
    /// Stable platform identifier stored on every record.
    fn platform(&self) -> &'static str;

    /// Lowercased subject keywords; empty means every alert from the sender.
    fn keywords(&self) -> &[String];

    fn matches(&self, sender: &str, subject: &str) -> bool {
        let sender = sender.to_lowercase();
        if !sender.contains(self.platform()) {
            return false;
        }
        let subject = subject.to_lowercase();
        self.keywords().is_empty() || self.keywords().iter().any(|kw| subject.contains(kw.as_str()))
    }

    /// Listings found in the document. Listings missing a required field
    /// are skipped, never reported as errors.
    fn parse(&self, document: &Html) -> Vec<RawJobRecord>;
}

pub(crate) fn default_keywords() -> Vec<String> {
    DEFAULT_ALERT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

/// Ordered set of parsers; the first one that claims an email wins.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<Box<dyn JobAlertParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indeed then LinkedIn, both filtering subjects on `keywords`.
    pub fn with_defaults(keywords: &[String]) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(IndeedParser::new(keywords.to_vec())));
        registry.register(Box::new(LinkedInParser::new(keywords.to_vec())));
        registry
    }

    pub fn register(&mut self, parser: Box<dyn JobAlertParser>) {
        self.parsers.push(parser);
    }

    pub fn classify(&self, sender: &str, subject: &str) -> Option<&dyn JobAlertParser> {
        self.parsers
            .iter()
            .find(|p| p.matches(sender, subject))
            .map(|p| p.as_ref())
    }

    pub fn for_platform(&self, platform: &str) -> Option<&dyn JobAlertParser> {
        self.parsers
            .iter()
            .find(|p| p.platform() == platform)
            .map(|p| p.as_ref())
    }

    pub fn platforms(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.platform()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticParser;

    impl JobAlertParser for StaticParser {
        fn platform(&self) -> &'static str {
            "welcometothejungle"
        }

        fn keywords(&self) -> &[String] {
            &[]
        }

        fn parse(&self, _document: &Html) -> Vec<RawJobRecord> {
            Vec::new()
        }
    }

    #[test]
    fn test_classify_by_sender_and_subject() {
        let registry = ParserRegistry::with_defaults(&default_keywords());
        let indeed = registry.classify("Indeed <alert@indeed.com>", "12 new Python jobs in Paris");
        assert_eq!(indeed.map(|p| p.platform()), Some(INDEED));

        let linkedin = registry.classify(
            "LinkedIn Job Alerts <jobalerts-noreply@linkedin.com>",
            "Data Engineer: Acme and more",
        );
        assert_eq!(linkedin.map(|p| p.platform()), Some(LINKEDIN));
    }

    #[test]
    fn test_classify_rejects_unknown_sender_or_subject() {
        let registry = ParserRegistry::with_defaults(&default_keywords());
        assert!(registry.classify("Monster <jobs@monster.com>", "Python jobs").is_none());
        assert!(registry.classify("Indeed <alert@indeed.com>", "Your weekly digest").is_none());
    }

    #[test]
    fn test_empty_keywords_accept_any_subject() {
        let registry = ParserRegistry::with_defaults(&[]);
        assert!(registry.classify("alert@indeed.com", "anything").is_some());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ParserRegistry::with_defaults(&default_keywords());
        registry.register(Box::new(StaticParser));
        assert_eq!(registry.platforms(), vec![INDEED, LINKEDIN, "welcometothejungle"]);
        assert!(registry.for_platform("welcometothejungle").is_some());
        assert!(registry.for_platform("monster").is_none());
        assert_eq!(
            registry
                .classify("hello@welcometothejungle.com", "whatever")
                .map(|p| p.platform()),
            Some("welcometothejungle")
        );
    }
}
