//! Proxied request and response model, plus variable interpolation.

use http::Uri;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Authority used by the transport to tag locally addressed requests.
pub const INBOUND_HOST: &str = "inbound";

/// Regex for matching variable expressions like ${...}
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Lowercased, multi-valued header map.
pub type Headers = HashMap<String, Vec<String>>;

/// Where a proxied request is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Addressed to the proxy's own virtual namespace.
    Inbound {
        /// Request path (without query string)
        path: String,
    },
    /// Tunneled to a real host. The destination arrives in authority form,
    /// so the port is kept exactly as the client sent it.
    Tunnel {
        scheme: String,
        host: String,
        port: Option<u16>,
        path: String,
    },
}

impl RequestTarget {
    /// Whether this request targets the proxy itself.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound { .. })
    }

    /// Request path (without query string).
    pub fn path(&self) -> &str {
        match self {
            Self::Inbound { path } | Self::Tunnel { path, .. } => path,
        }
    }

    /// Host component as sent, with the port if one was given.
    pub fn authority(&self) -> String {
        match self {
            Self::Inbound { .. } => INBOUND_HOST.to_string(),
            Self::Tunnel {
                host,
                port: Some(port),
                ..
            } => format!("{}:{}", host, port),
            Self::Tunnel { host, .. } => host.clone(),
        }
    }
}

/// A request flowing through the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    /// HTTP method, compared case-sensitively
    pub method: String,
    pub target: RequestTarget,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// A response flowing back through the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ProxyRequest {
    /// Create a request with no headers and an empty body.
    pub fn new(method: impl Into<String>, target: RequestTarget) -> Self {
        Self {
            method: method.into(),
            target,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Build a request from the URI the transport hands over.
    ///
    /// `http://inbound/tokenize` is a locally addressed request. Anything else
    /// must be absolute and is treated as tunnel-addressed; for CONNECT
    /// tunnels the transport rebuilds it from the authority-form target,
    /// e.g. `https://example.com:443/charge`.
    pub fn from_uri(method: impl Into<String>, uri: &str) -> Result<Self, MessageError> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e: http::uri::InvalidUri| MessageError::InvalidUri {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        let path = parsed.path().to_string();
        let host = parsed.host().unwrap_or_default();

        // The sentinel is the whole authority; `inbound:8080` is a real host.
        let target = if host == INBOUND_HOST && parsed.port().is_none() {
            RequestTarget::Inbound { path }
        } else {
            let scheme = parsed
                .scheme_str()
                .ok_or_else(|| MessageError::NotAbsolute(uri.to_string()))?;
            RequestTarget::Tunnel {
                scheme: scheme.to_string(),
                host: host.to_string(),
                port: parsed.port_u16(),
                path,
            }
        };

        Ok(Self::new(method, target))
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing existing values.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name, value.into());
        self
    }

    /// Get a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }

    /// Resolve a `request.*` variable expression.
    fn resolve(&self, expr: &str) -> Option<String> {
        let parts: Vec<&str> = expr.splitn(2, '.').collect();

        match parts[0] {
            "method" => Some(self.method.clone()),
            "path" => Some(self.target.path().to_string()),
            "host" => Some(self.target.authority()),
            "header" => self.header(parts.get(1)?).map(str::to_string),
            _ => None,
        }
    }

    /// Interpolate all ${...} variables in a string against this request.
    pub fn interpolate(&self, template: &str) -> String {
        interpolate_with(template, |var| match var.split_once('.') {
            Some(("request", rest)) => self.resolve(rest),
            _ => resolve_global(var),
        })
    }
}

impl ProxyResponse {
    /// Create a response with no headers and an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing existing values.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name, value.into());
        self
    }

    /// Get a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }

    fn resolve(&self, expr: &str) -> Option<String> {
        let parts: Vec<&str> = expr.splitn(2, '.').collect();

        match parts[0] {
            "status" => Some(self.status.to_string()),
            "header" => self.header(parts.get(1)?).map(str::to_string),
            _ => None,
        }
    }

    /// Interpolate all ${...} variables in a string against this response.
    pub fn interpolate(&self, template: &str) -> String {
        interpolate_with(template, |var| match var.split_once('.') {
            Some(("response", rest)) => self.resolve(rest),
            _ => resolve_global(var),
        })
    }
}

fn resolve_global(var: &str) -> Option<String> {
    match var {
        "now" => Some(chrono::Utc::now().to_rfc3339()),
        _ => None,
    }
}

fn interpolate_with(template: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    VAR_REGEX
        .replace_all(template, |caps: &regex::Captures| {
            resolve(&caps[1]).unwrap_or_default()
        })
        .to_string()
}

fn first_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get(&name.to_lowercase())
        .and_then(|v| v.first())
        .map(|s| s.as_str())
}

/// Set a header, replacing any existing values.
pub fn set_header(headers: &mut Headers, name: &str, value: String) {
    headers.insert(name.to_lowercase(), vec![value]);
}

/// Append a header value, keeping existing values.
pub fn append_header(headers: &mut Headers, name: &str, value: String) {
    headers.entry(name.to_lowercase()).or_default().push(value);
}

/// Remove all values of a header.
pub fn remove_header(headers: &mut Headers, name: &str) {
    headers.remove(&name.to_lowercase());
}

/// Errors building a request from transport input.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Invalid request URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Request URI must be absolute: {0}")]
    NotAbsolute(String),
}
