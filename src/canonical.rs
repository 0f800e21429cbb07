//! Stable job identifiers from platform URLs.
//!
//! Alert emails wrap the same listing in different tracking redirects; the
//! canonical form keeps only what identifies the job on its platform.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::CanonicalJobUrl;
use crate::normalize::UrlParts;

static INDEED_JOB_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|&)jk=(\w+)").expect("static regex"));

static LINKEDIN_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/jobs/view/(\d+)").expect("static regex"));

/// Canonicalize a known platform URL, `None` for anything else.
pub fn normalize_job_url(raw_url: &str) -> Option<CanonicalJobUrl> {
    let parts = UrlParts::split(raw_url.trim());
    let host = parts.host()?;

    if host.contains("indeed.com") {
        let query = parts.query()?;
        let job_key = INDEED_JOB_KEY.captures(query)?.get(1)?.as_str().to_string();
        let canonical_url = format!("https://indeed.com/viewjob?jk={job_key}");
        return Some(CanonicalJobUrl {
            job_key,
            canonical_url,
        });
    }

    if host.contains("linkedin.com") {
        let job_key = LINKEDIN_JOB_ID
            .captures(parts.path)?
            .get(1)?
            .as_str()
            .to_string();
        let canonical_url = format!("https://www.linkedin.com/jobs/view/{job_key}");
        return Some(CanonicalJobUrl {
            job_key,
            canonical_url,
        });
    }

    None
}

/// URL safe to publish in samples: the canonical form when the platform is
/// known, otherwise the URL without query or fragment, which is where
/// recipient tracking tokens live.
pub fn sanitize_job_url(raw_url: &str) -> String {
    if let Some(canonical) = normalize_job_url(raw_url) {
        return canonical.canonical_url;
    }
    let trimmed = raw_url.trim();
    let parts = UrlParts::split(trimmed);
    trimmed[..trimmed.len() - parts.tail.len()].to_string()
}
