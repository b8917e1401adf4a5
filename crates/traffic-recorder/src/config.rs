//! Configuration types for the traffic recorder.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Inactivity window after which a page counts as quiet.
    pub quiet_window_ms: u64,
    /// Minimum spacing between summary publications.
    pub min_publish_interval_ms: u64,
    /// Tick interval of the maintenance loop re-evaluating quiet timeouts.
    pub maintenance_interval_ms: u64,
    /// Response bodies beyond this size are truncated.
    pub max_body_bytes: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: 1000,
            min_publish_interval_ms: 500,
            maintenance_interval_ms: 250,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// URL capture filter. Empty lists capture everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UrlFilter {
    pub contains: Vec<String>,
    pub matches: Vec<String>,
}

impl UrlFilter {
    pub fn is_empty(&self) -> bool {
        self.contains.is_empty() && self.matches.is_empty()
    }

    /// A URL is captured when both lists are empty, when any contains-pattern is
    /// a substring, or when any matches-pattern equals the URL exactly.
    pub fn should_capture(&self, url: &str) -> bool {
        if self.is_empty() {
            return true;
        }

        if self.contains.iter().any(|pattern| url.contains(pattern)) {
            return true;
        }

        self.matches.iter().any(|pattern| pattern == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_captures_everything() {
        let filter = UrlFilter::default();
        assert!(filter.should_capture("https://example.com/api"));
    }

    #[test]
    fn contains_filter_is_substring_match() {
        let filter = UrlFilter {
            contains: vec!["/graphql".into()],
            matches: vec![],
        };
        assert!(filter.should_capture("https://example.com/graphql?op=feed"));
        assert!(!filter.should_capture("https://example.com/rest"));
    }

    #[test]
    fn matches_filter_is_exact() {
        let filter = UrlFilter {
            contains: vec![],
            matches: vec!["https://example.com/ping".into()],
        };
        assert!(filter.should_capture("https://example.com/ping"));
        assert!(!filter.should_capture("https://example.com/ping?x=1"));
    }

    #[test]
    fn either_list_is_sufficient() {
        let filter = UrlFilter {
            contains: vec!["/api/".into()],
            matches: vec!["https://example.com/exact".into()],
        };
        assert!(filter.should_capture("https://example.com/api/v2"));
        assert!(filter.should_capture("https://example.com/exact"));
        assert!(!filter.should_capture("https://example.com/other"));
    }
}
