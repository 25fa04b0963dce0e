//! String-backed scalar kinds: paths, URLs, hosts, schemes and names.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("invalid path '{0}': must start with /, ./ or ../")]
    InvalidPath(String),
    #[error("invalid path pattern '{0}'")]
    InvalidPathPattern(String),
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    #[error("invalid host '{0}': expected [scheme]://hostname[:port]")]
    InvalidHost(String),
    #[error("invalid host pattern '{0}'")]
    InvalidHostPattern(String),
    #[error("invalid scheme '{0}'")]
    InvalidScheme(String),
    #[error("invalid email address '{0}'")]
    InvalidEmailAddress(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid mimetype '{0}'")]
    InvalidMimetype(String),
}

/// An absolute or relative filesystem path value (`/a/b`, `./x`, `../y`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(String);

impl Path {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if s.starts_with('/') || s.starts_with("./") || s.starts_with("../") {
            Ok(Self(s))
        } else {
            Err(PrimitiveError::InvalidPath(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory paths end with a slash.
    pub fn is_dir_path(&self) -> bool {
        self.0.ends_with('/')
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// The path with a single trailing slash removed, for prefix comparisons.
    pub fn without_trailing_slash(&self) -> &str {
        if self.0.len() > 1 {
            self.0.strip_suffix('/').unwrap_or(&self.0)
        } else {
            &self.0
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path set: either a `/dir/...` prefix form matching the directory and all
/// of its descendants, or a glob where `*` matches within a single segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if s.starts_with('/') || s.starts_with("./") || s.starts_with("../") {
            Ok(Self(s))
        } else {
            Err(PrimitiveError::InvalidPathPattern(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `/a/b/...` — matches `/a/b` and any descendant.
    pub fn is_prefix_pattern(&self) -> bool {
        self.0.ends_with("/...")
    }

    /// The prefix of a `/...` pattern, without the suffix.
    pub fn prefix(&self) -> &str {
        self.0.strip_suffix("/...").unwrap_or(&self.0)
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        if self.is_prefix_pattern() {
            let prefix = self.prefix();
            let candidate = path.without_trailing_slash();
            return candidate == prefix
                || (candidate.starts_with(prefix)
                    && candidate[prefix.len()..].starts_with('/'));
        }
        if self.0.contains('*') {
            return glob_segments_match(&self.0, path.as_str());
        }
        self.0 == path.as_str()
    }

    /// Pattern-over-pattern inclusion, used by the permission algebra.
    pub fn includes_pattern(&self, other: &PathPattern) -> bool {
        if self == other {
            return true;
        }
        if self.is_prefix_pattern() {
            let prefix = self.prefix();
            let other_base = other.prefix();
            return other_base == prefix
                || (other_base.starts_with(prefix)
                    && other_base[prefix.len()..].starts_with('/'));
        }
        false
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Segment-wise glob match where `*` never crosses a `/`.
fn glob_segments_match(pattern: &str, path: &str) -> bool {
    let mut regex_src = String::with_capacity(pattern.len() * 2);
    regex_src.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex_src.push_str("[^/]*"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' | '?' => {
                regex_src.push('\\');
                regex_src.push(c);
            }
            _ => regex_src.push(c),
        }
    }
    regex_src.push('$');
    regex::Regex::new(&regex_src)
        .map(|re| re.is_match(path))
        .unwrap_or(false)
}

/// A URL value (`https://example.com/index.html`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Url(String);

impl Url {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        let Some((scheme, rest)) = s.split_once("://") else {
            return Err(PrimitiveError::InvalidUrl(s));
        };
        if scheme.is_empty() || rest.is_empty() {
            return Err(PrimitiveError::InvalidUrl(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> Scheme {
        Scheme(self.0.split("://").next().unwrap_or_default().to_string())
    }

    /// The `scheme://authority` part.
    pub fn host(&self) -> Result<Host, PrimitiveError> {
        let (scheme, rest) = self
            .0
            .split_once("://")
            .ok_or_else(|| PrimitiveError::InvalidUrl(self.0.clone()))?;
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        Host::new(format!("{scheme}://{authority}"))
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A URL set: exact, or a `/...` suffix matching any descendant resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlPattern(String);

impl UrlPattern {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if !s.contains("://") {
            return Err(PrimitiveError::InvalidUrl(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches_url(&self, url: &Url) -> bool {
        if let Some(prefix) = self.0.strip_suffix("/...") {
            let candidate = url.as_str().strip_suffix('/').unwrap_or(url.as_str());
            return candidate == prefix
                || (candidate.starts_with(prefix)
                    && candidate[prefix.len()..].starts_with('/'));
        }
        self.0 == url.as_str()
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host value: `[scheme]://hostname[:port]`. The scheme part may be empty
/// (`://example.com`) for scheme-agnostic hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        let Some((_, rest)) = s.split_once("://") else {
            return Err(PrimitiveError::InvalidHost(s));
        };
        if rest.is_empty() || rest.contains('/') {
            return Err(PrimitiveError::InvalidHost(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> Option<Scheme> {
        let scheme = self.0.split("://").next().unwrap_or_default();
        if scheme.is_empty() {
            None
        } else {
            Some(Scheme(scheme.to_string()))
        }
    }

    /// Hostname with the optional port stripped.
    pub fn hostname(&self) -> &str {
        let rest = self.0.split_once("://").map(|(_, r)| r).unwrap_or(&self.0);
        rest.split(':').next().unwrap_or(rest)
    }

    pub fn port(&self) -> Option<u16> {
        let rest = self.0.split_once("://").map(|(_, r)| r).unwrap_or(&self.0);
        rest.split_once(':').and_then(|(_, p)| p.parse().ok())
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host set: `https://*.example.com` matches any subdomain chain of
/// `example.com` under the `https` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostPattern(String);

impl HostPattern {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if !s.contains("://") {
            return Err(PrimitiveError::InvalidHostPattern(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn scheme_part(&self) -> &str {
        self.0.split("://").next().unwrap_or_default()
    }

    fn host_part(&self) -> &str {
        self.0.split_once("://").map(|(_, r)| r).unwrap_or(&self.0)
    }

    pub fn matches_host(&self, host: &Host) -> bool {
        let pattern_scheme = self.scheme_part();
        if !pattern_scheme.is_empty() {
            match host.scheme() {
                Some(scheme) if scheme.as_str() == pattern_scheme => {}
                _ => return false,
            }
        }

        let pattern_host = self.host_part();
        if let Some(domain) = pattern_host.strip_prefix("*.") {
            let hostname = host.hostname();
            return hostname
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1);
        }
        pattern_host == host.hostname()
            || (host.port().is_some()
                && pattern_host
                    == format!("{}:{}", host.hostname(), host.port().unwrap_or_default()))
    }

    /// Pattern-over-pattern inclusion: equal patterns, or a wildcard pattern
    /// covering a more specific host/pattern of the same domain.
    pub fn includes_pattern(&self, other: &HostPattern) -> bool {
        if self == other {
            return true;
        }
        let scheme_ok = self.scheme_part().is_empty() || self.scheme_part() == other.scheme_part();
        if !scheme_ok {
            return false;
        }
        if let Some(domain) = self.host_part().strip_prefix("*.") {
            let other_host = other.host_part().strip_prefix("*.").unwrap_or(other.host_part());
            return other_host == domain
                || other_host
                    .strip_suffix(domain)
                    .is_some_and(|prefix| prefix.ends_with('.'));
        }
        false
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A URL scheme (`https`, `ldb`, `mem`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scheme(String);

impl Scheme {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-') {
            return Err(PrimitiveError::InvalidScheme(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        let valid = s
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if valid {
            Ok(Self(s))
        } else {
            Err(PrimitiveError::InvalidEmailAddress(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier_like(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// An identifier value (`#name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if is_identifier_like(&s) {
            Ok(Self(s))
        } else {
            Err(PrimitiveError::InvalidIdentifier(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A first-class property name (`.name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyName(String);

impl PropertyName {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if is_identifier_like(&s) {
            Ok(Self(s))
        } else {
            Err(PrimitiveError::InvalidIdentifier(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mimetype(String);

impl Mimetype {
    pub fn new(s: impl Into<String>) -> Result<Self, PrimitiveError> {
        let s = s.into();
        if s.split_once('/').is_some_and(|(t, sub)| !t.is_empty() && !sub.is_empty()) {
            Ok(Self(s))
        } else {
            Err(PrimitiveError::InvalidMimetype(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mimetype without parameters (`text/html; charset=utf-8` → `text/html`).
    pub fn without_params(&self) -> &str {
        self.0.split(';').next().unwrap_or(&self.0).trim_end()
    }
}

impl fmt::Display for Mimetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation() {
        assert!(Path::new("/tmp/a").is_ok());
        assert!(Path::new("./rel").is_ok());
        assert!(Path::new("../up").is_ok());
        assert!(Path::new("bare").is_err());
    }

    #[test]
    fn prefix_pattern_matches_descendants() {
        let pattern = PathPattern::new("/tmp/...").unwrap();
        assert!(pattern.matches_path(&Path::new("/tmp/a").unwrap()));
        assert!(pattern.matches_path(&Path::new("/tmp/a/b/c").unwrap()));
        assert!(pattern.matches_path(&Path::new("/tmp").unwrap()));
        assert!(pattern.matches_path(&Path::new("/tmp/").unwrap()));
        assert!(!pattern.matches_path(&Path::new("/tmpx").unwrap()));
        assert!(!pattern.matches_path(&Path::new("/other").unwrap()));
    }

    #[test]
    fn glob_pattern_stays_within_segment() {
        let pattern = PathPattern::new("/logs/*.log").unwrap();
        assert!(pattern.matches_path(&Path::new("/logs/app.log").unwrap()));
        assert!(!pattern.matches_path(&Path::new("/logs/sub/app.log").unwrap()));
    }

    #[test]
    fn pattern_inclusion() {
        let wide = PathPattern::new("/tmp/...").unwrap();
        let narrow = PathPattern::new("/tmp/sub/...").unwrap();
        assert!(wide.includes_pattern(&narrow));
        assert!(!narrow.includes_pattern(&wide));
    }

    #[test]
    fn host_pattern_wildcards() {
        let pattern = HostPattern::new("https://*.example.com").unwrap();
        assert!(pattern.matches_host(&Host::new("https://api.example.com").unwrap()));
        assert!(pattern.matches_host(&Host::new("https://a.b.example.com").unwrap()));
        assert!(!pattern.matches_host(&Host::new("https://example.com").unwrap()));
        assert!(!pattern.matches_host(&Host::new("http://api.example.com").unwrap()));
    }

    #[test]
    fn url_host_extraction() {
        let url = Url::new("https://example.com:8080/index.html?q=1").unwrap();
        let host = url.host().unwrap();
        assert_eq!(host.as_str(), "https://example.com:8080");
        assert_eq!(host.hostname(), "example.com");
        assert_eq!(host.port(), Some(8080));
    }

    #[test]
    fn url_pattern_prefix() {
        let pattern = UrlPattern::new("https://example.com/assets/...").unwrap();
        assert!(pattern.matches_url(&Url::new("https://example.com/assets/app.css").unwrap()));
        assert!(!pattern.matches_url(&Url::new("https://example.com/api").unwrap()));
    }
}
