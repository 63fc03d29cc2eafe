//! Configuration types for the route engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration for the route engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Named transformers routes can reference
    pub transformers: BTreeMap<String, TransformerSpec>,
    /// Vaults and their routes (route order is match order)
    pub vaults: Vec<VaultConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            transformers: BTreeMap::new(),
            vaults: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deadline for one transformation chain (ms, 0 disables)
    pub timeout_ms: u64,
    /// Largest body a non-empty chain will accept (bytes)
    pub max_body_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl Settings {
    /// Chain deadline, if any.
    pub fn chain_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// A tenant and its ordered routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault identifier
    pub id: String,
    /// Default upstream base URL
    #[serde(default)]
    pub upstream: String,
    /// Routes, first match wins
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// A route definition as written in configuration or storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Human label, not used for matching
    #[serde(default)]
    pub name: String,
    /// Exact method or `*`
    #[serde(default = "default_method")]
    pub method: String,
    /// Glob over a path (inbound) or an absolute URL (outbound)
    pub path: String,
    /// Upstream base URL; required for inbound routes
    #[serde(default)]
    pub upstream: String,
    /// Transformer ids applied to requests, in order
    #[serde(default)]
    pub request_transformations: Vec<String>,
    /// Transformer ids applied to responses, in order
    #[serde(default)]
    pub response_transformations: Vec<String>,
}

fn default_method() -> String {
    "*".to_string()
}

/// Transformer definition, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformerSpec {
    /// Header manipulation
    Header(HeaderTransform),
    /// JSON body field operations
    Json(JsonTransform),
}

/// Header transformation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeaderTransform {
    /// Headers to add (appended to existing values)
    #[serde(default)]
    pub add: Option<Vec<HeaderValue>>,
    /// Headers to set (overwrite)
    #[serde(default)]
    pub set: Option<Vec<HeaderValue>>,
    /// Headers to remove
    #[serde(default)]
    pub remove: Option<Vec<String>>,
}

/// Header name-value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderValue {
    /// Header name
    pub name: String,
    /// Header value (supports variable substitution)
    pub value: String,
}

/// JSON body transformation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonTransform {
    /// List of operations to apply in order
    pub operations: Vec<JsonOperation>,
}

/// JSON transformation operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonOperation {
    /// Set a value at a JSON path
    Set {
        path: String,
        value: serde_json::Value,
    },
    /// Delete values at JSON paths
    Delete(Vec<String>),
    /// Rename a field
    Rename { from: String, to: String },
    /// Mask a scalar, keeping its last characters
    Mask {
        path: String,
        #[serde(default = "default_keep_last")]
        keep_last: usize,
    },
}

fn default_keep_last() -> usize {
    4
}
