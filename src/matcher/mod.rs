//! Request-to-route matching.
//!
//! A request is first normalized into a canonical string, then checked
//! against the route's glob and method:
//!
//! - inbound requests canonicalize to their path only;
//! - tunnel requests canonicalize to `scheme://host[:port]path`, with `:443`
//!   dropped for `https` so `https://example.com/*` covers the common case.
//!
//! Paths are percent-decoded once and re-encoded in a single form, so
//! `/%63ards/1` and `/cards/1` are the same target to every pattern.

mod method;
mod pattern;

pub use method::{MethodMatcher, ANY_METHOD};
pub use pattern::{UrlPattern, URL_MATCH_OPTIONS};

use crate::message::{ProxyRequest, RequestTarget};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const SECURE_SCHEME: &str = "https";
const DEFAULT_TLS_PORT: u16 = 443;

/// Which kind of traffic a route applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Requests addressed to the proxy's own virtual namespace
    Inbound,
    /// Requests tunneled to a real external host
    Outbound,
}

impl Direction {
    /// Direction of an incoming request.
    pub fn of(target: &RequestTarget) -> Self {
        if target.is_inbound() {
            Self::Inbound
        } else {
            Self::Outbound
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// Build the string a route pattern is matched against.
pub fn canonical_target(target: &RequestTarget) -> Result<String, MatchEvaluationError> {
    let canonical = match target {
        RequestTarget::Inbound { path } => canonical_path(path),
        RequestTarget::Tunnel {
            scheme,
            host,
            port,
            path,
        } => {
            if host.is_empty() {
                return Err(MatchEvaluationError::MissingHost {
                    scheme: scheme.clone(),
                    path: path.clone(),
                });
            }

            let authority = match port {
                Some(DEFAULT_TLS_PORT) if scheme == SECURE_SCHEME => host.clone(),
                Some(port) => format!("{}:{}", host, port),
                None => host.clone(),
            };

            format!("{}://{}{}", scheme, authority, canonical_path(path))
        }
    };

    Ok(canonical)
}

/// Decode `path` and re-encode it the way the upstream will read it.
///
/// Unreserved characters and the sub-delimiters allowed in a path are
/// written literally; every other byte becomes an uppercase `%XX` escape.
pub fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let decoded = urlencoding::decode_binary(path.as_bytes());
    let mut canonical = String::with_capacity(decoded.len());
    for &byte in decoded.iter() {
        if byte.is_ascii_alphanumeric() || PATH_SAFE.contains(&byte) {
            canonical.push(byte as char);
        } else {
            canonical.push_str(&format!("%{:02X}", byte));
        }
    }
    canonical
}

/// Bytes left unescaped in a canonical path besides ASCII alphanumerics.
const PATH_SAFE: &[u8] = b"-_.~$&+,/:;=@";

/// Compiled direction, method and pattern of one route.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    direction: Direction,
    method: MethodMatcher,
    pattern: UrlPattern,
}

impl RouteMatcher {
    /// Compile a matcher. Fails only if the pattern is not a valid glob.
    pub fn compile(direction: Direction, method: &str, pattern: &str) -> Result<Self, MatcherError> {
        Ok(Self {
            direction,
            method: MethodMatcher::new(method),
            pattern: UrlPattern::compile(pattern)?,
        })
    }

    /// Check whether a request satisfies direction, pattern and method.
    ///
    /// Never fails: a request that cannot be canonicalized is logged and
    /// treated as a non-match.
    pub fn matches(&self, request: &ProxyRequest) -> bool {
        if Direction::of(&request.target) != self.direction {
            return false;
        }

        let canonical = match canonical_target(&request.target) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    pattern = %self.pattern.as_str(),
                    error = %e,
                    "Route match evaluation failed, treating as non-match"
                );
                return false;
            }
        };

        self.pattern.matches(&canonical) && self.method.matches(&request.method)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn method(&self) -> &MethodMatcher {
        &self.method
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }
}

/// Errors that can occur during matcher compilation.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Runtime failure while evaluating a match. Never leaves the matcher.
#[derive(Debug, thiserror::Error)]
pub enum MatchEvaluationError {
    #[error("Tunnel request without host ({scheme}://?{path})")]
    MissingHost { scheme: String, path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(scheme: &str, host: &str, port: Option<u16>, path: &str) -> RequestTarget {
        RequestTarget::Tunnel {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        }
    }

    fn inbound(path: &str) -> RequestTarget {
        RequestTarget::Inbound {
            path: path.to_string(),
        }
    }

    #[test]
    fn test_canonical_inbound_is_path_only() {
        assert_eq!(canonical_target(&inbound("/tokenize")).unwrap(), "/tokenize");
        assert_eq!(canonical_target(&inbound("")).unwrap(), "/");
    }

    #[test]
    fn test_canonical_drops_default_tls_port() {
        let target = tunnel("https", "example.com", Some(443), "/x");
        assert_eq!(canonical_target(&target).unwrap(), "https://example.com/x");
    }

    #[test]
    fn test_canonical_keeps_other_ports() {
        let target = tunnel("https", "example.com", Some(8443), "/x");
        assert_eq!(
            canonical_target(&target).unwrap(),
            "https://example.com:8443/x"
        );

        // 443 is only implied for https
        let target = tunnel("http", "example.com", Some(443), "/x");
        assert_eq!(
            canonical_target(&target).unwrap(),
            "http://example.com:443/x"
        );

        let target = tunnel("http", "example.com", Some(80), "/x");
        assert_eq!(canonical_target(&target).unwrap(), "http://example.com:80/x");
    }

    #[test]
    fn test_canonical_empty_tunnel_path() {
        let target = tunnel("https", "example.com", None, "");
        assert_eq!(canonical_target(&target).unwrap(), "https://example.com/");
    }

    #[test]
    fn test_canonical_missing_host() {
        let target = tunnel("https", "", Some(443), "/x");
        assert!(matches!(
            canonical_target(&target),
            Err(MatchEvaluationError::MissingHost { .. })
        ));
    }

    #[test]
    fn test_missing_host_is_non_match() {
        let matcher = RouteMatcher::compile(Direction::Outbound, "*", "*").unwrap();
        let request = ProxyRequest::new("GET", tunnel("https", "", None, "/x"));
        assert!(!matcher.matches(&request));
    }

    #[test]
    fn test_direction_filter() {
        let outbound = RouteMatcher::compile(Direction::Outbound, "*", "*").unwrap();
        let inbound_route = RouteMatcher::compile(Direction::Inbound, "*", "*").unwrap();

        let local = ProxyRequest::new("GET", inbound("/anything"));
        let tunneled = ProxyRequest::new("GET", tunnel("https", "example.com", None, "/"));

        assert!(!outbound.matches(&local));
        assert!(outbound.matches(&tunneled));
        assert!(inbound_route.matches(&local));
        assert!(!inbound_route.matches(&tunneled));
    }

    #[test]
    fn test_method_and_pattern_must_both_match() {
        let matcher = RouteMatcher::compile(Direction::Inbound, "POST", "/tokenize").unwrap();

        assert!(matcher.matches(&ProxyRequest::new("POST", inbound("/tokenize"))));
        assert!(!matcher.matches(&ProxyRequest::new("GET", inbound("/tokenize"))));
        assert!(!matcher.matches(&ProxyRequest::new("POST", inbound("/detokenize"))));
    }

    #[test]
    fn test_canonical_path_decodes_once() {
        assert_eq!(canonical_path("/%63ards/1"), "/cards/1");
        assert_eq!(canonical_path("/cards/1"), "/cards/1");
        assert_eq!(canonical_path("/a%2fb"), "/a/b");
        assert_eq!(canonical_path("/a b"), "/a%20b");
        assert_eq!(canonical_path("/a%20b"), "/a%20b");
        assert_eq!(canonical_path("/%2563"), "/%2563");
        assert_eq!(canonical_path("/v1:charge;x=1@y"), "/v1:charge;x=1@y");
        assert_eq!(canonical_path("/caf%C3%A9"), "/caf%C3%A9");
    }

    #[test]
    fn test_encoded_path_matches_plain_pattern() {
        let matcher =
            RouteMatcher::compile(Direction::Outbound, "POST", "https://api.example.com/cards/*")
                .unwrap();

        for path in ["/cards/1", "/%63ards/1", "/%63%61%72%64%73/1"] {
            let request = ProxyRequest::new("POST", tunnel("https", "api.example.com", Some(443), path));
            assert!(matcher.matches(&request), "{}", path);
        }

        let inbound_route = RouteMatcher::compile(Direction::Inbound, "*", "/tokenize").unwrap();
        assert!(inbound_route.matches(&ProxyRequest::new("GET", inbound("/%74okenize"))));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Inbound.to_string(), "inbound");
        assert_eq!(Direction::Outbound.to_string(), "outbound");
    }
}
