//! Per-source URL scope: which discovered links are worth fetching.

use newscrawl_shared::SourceConfig;
use url::Url;

/// Determines which URLs are "in scope" for a source.
#[derive(Debug)]
pub struct UrlScope {
    /// Hosts that URLs must match.
    hosts: Vec<String>,
    /// Include patterns (if non-empty, URL path must match at least one).
    include_patterns: Vec<regex::Regex>,
    /// Exclude patterns (if URL path matches any, it's excluded).
    exclude_patterns: Vec<regex::Regex>,
}

impl UrlScope {
    pub fn new(base_url: &Url, include: &[String], exclude: &[String]) -> Self {
        Self {
            hosts: base_url.host_str().map(str::to_string).into_iter().collect(),
            include_patterns: include.iter().filter_map(|p| glob_to_regex(p)).collect(),
            exclude_patterns: exclude.iter().filter_map(|p| glob_to_regex(p)).collect(),
        }
    }

    /// Scope for a configured source.
    pub fn for_source(base_url: &Url, source: &SourceConfig) -> Self {
        Self::new(base_url, &source.include_patterns, &source.exclude_patterns)
    }

    /// Also accept links on the host `url` lives on (e.g. a listing that
    /// redirected from the apex domain to `www.`).
    pub fn allow_host_of(mut self, url: &Url) -> Self {
        if let Some(host) = url.host_str() {
            if !self.hosts.iter().any(|h| h == host) {
                self.hosts.push(host.to_string());
            }
        }
        self
    }

    pub fn in_scope(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        match url.host_str() {
            Some(host) if self.hosts.iter().any(|h| h == host) => {}
            _ => return false,
        }

        let path = url.path();

        if self.exclude_patterns.iter().any(|p| p.is_match(path)) {
            return false;
        }

        if !self.include_patterns.is_empty() {
            return self.include_patterns.iter().any(|p| p.is_match(path));
        }

        true
    }
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}
