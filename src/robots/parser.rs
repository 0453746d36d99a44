//! Robots.txt policy wrapper
//!
//! Thin wrapper over the robotstxt crate with an explicit allow-all fallback
//! used when robots.txt cannot be fetched.

use robotstxt::DefaultMatcher;

/// A parsed robots.txt policy for one origin
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    /// Raw robots.txt content (empty means allow all)
    content: String,
    allow_all: bool,
}

impl RobotsPolicy {
    /// Creates a policy from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Creates a permissive policy that allows everything
    ///
    /// Used as the fallback when robots.txt cannot be fetched or returns a
    /// non-success status.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    /// Checks whether a URL is allowed for the given user agent
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_permits_everything() {
        let policy = RobotsPolicy::allow_all();
        assert!(policy.is_allowed("https://example.com/private", "TestBot"));
    }

    #[test]
    fn test_disallow_rule() {
        let policy = RobotsPolicy::from_content("User-agent: *\nDisallow: /private");
        assert!(!policy.is_allowed("https://example.com/private/page", "TestBot"));
        assert!(policy.is_allowed("https://example.com/public", "TestBot"));
    }

    #[test]
    fn test_empty_content_allows() {
        let policy = RobotsPolicy::from_content("");
        assert!(policy.is_allowed("https://example.com/anything", "TestBot"));
    }

    #[test]
    fn test_agent_specific_rule() {
        let policy =
            RobotsPolicy::from_content("User-agent: BadBot\nDisallow: /\n\nUser-agent: *\nAllow: /");
        assert!(!policy.is_allowed("https://example.com/page", "BadBot"));
        assert!(policy.is_allowed("https://example.com/page", "GoodBot"));
    }
}
