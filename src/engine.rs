//! Route engine: selection plus transformation for proxied traffic.

use crate::config::EngineConfig;
use crate::message::{ProxyRequest, ProxyResponse, RequestTarget};
use crate::registry::{BuildReport, RouteRegistry, RouteSnapshot, SnapshotBuilder};
use crate::route::Route;
use crate::storage::{Storage, StorageError};
use crate::transformer::{with_deadline, PipelineError, TransformerRef, TransformerRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Routing and transformation engine shared by every in-flight request.
pub struct RouteEngine {
    config: EngineConfig,
    transformers: TransformerRegistry,
    registry: RouteRegistry,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_transformed: AtomicU64,
    transform_errors: AtomicU64,
}

/// A request that matched a route and passed its request chain.
#[derive(Debug)]
pub struct RoutedRequest {
    pub route: Arc<Route>,
    pub request: ProxyRequest,
    /// Where the transport should send the request: the route's upstream,
    /// else the tunnel destination, else the vault's upstream
    pub upstream: Option<Url>,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_transformed: u64,
    pub transform_errors: u64,
}

impl RouteEngine {
    /// Create an engine from configuration with only the configured transformers.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let transformers = TransformerRegistry::from_specs(&config.transformers);
        Self::with_transformers(config, transformers)
    }

    /// Create an engine with a prepared transformer registry, e.g. one that
    /// also holds job-backed transformers.
    pub fn with_transformers(
        config: EngineConfig,
        transformers: TransformerRegistry,
    ) -> Result<Self, EngineError> {
        let engine = Self {
            config,
            transformers,
            registry: RouteRegistry::default(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_transformed: AtomicU64::new(0),
            transform_errors: AtomicU64::new(0),
        };

        let report = engine.reload_from_config()?;
        info!(
            vaults = engine.config.vaults.len(),
            routes = report.accepted,
            rejected = report.rejected.len(),
            transformers = engine.transformers.len(),
            "Route engine initialized"
        );

        Ok(engine)
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        Self::new(config)
    }

    /// Create from a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a transformer routes can reference from the next reload on.
    pub fn register_transformer(&mut self, id: impl Into<String>, transformer: TransformerRef) {
        self.transformers.register(id, transformer);
    }

    /// Rebuild every vault from configuration and publish the result.
    ///
    /// Vault ids must be unique.
    pub fn reload_from_config(&self) -> Result<BuildReport, EngineError> {
        let mut seen = std::collections::HashSet::new();
        let mut builder = SnapshotBuilder::new(&self.transformers);
        for vault in &self.config.vaults {
            if !seen.insert(vault.id.as_str()) {
                return Err(EngineError::DuplicateVault(vault.id.clone()));
            }
            builder.add_config(vault);
        }
        Ok(self.publish(builder))
    }

    /// Rebuild every vault from storage and publish the result.
    ///
    /// Nothing is published if storage fails part way.
    pub async fn reload_from_storage(&self, storage: &dyn Storage) -> Result<BuildReport, EngineError> {
        let mut builder = SnapshotBuilder::new(&self.transformers);

        for vault in storage.list_vaults().await? {
            let definitions: Vec<_> = storage
                .list_routes(&vault.id)
                .await?
                .iter()
                .map(|record| record.definition())
                .collect();
            builder.add_vault(vault, &definitions);
        }

        Ok(self.publish(builder))
    }

    fn publish(&self, builder: SnapshotBuilder<'_>) -> BuildReport {
        let (snapshot, report) = builder.finish();
        for rejected in &report.rejected {
            warn!(
                vault = %rejected.vault_id,
                route = %rejected.route,
                error = %rejected.error,
                "Route rejected"
            );
        }
        self.registry.publish(snapshot);
        report
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.registry.snapshot()
    }

    /// First route of `vault_id` that matches the request.
    pub fn select_route(&self, vault_id: &str, request: &ProxyRequest) -> Option<Arc<Route>> {
        self.registry.select(vault_id, request)
    }

    /// Select a route and run its request chain.
    ///
    /// Fails closed: on any error the request must not be forwarded.
    pub async fn process_request(
        &self,
        vault_id: &str,
        request: ProxyRequest,
    ) -> Result<RoutedRequest, EngineError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.registry.snapshot();
        let route = match snapshot.select(vault_id, &request) {
            Some(route) => Arc::clone(route),
            None => {
                trace!(vault = vault_id, method = %request.method, "No matching route");
                return Err(EngineError::NoRoute {
                    vault_id: vault_id.to_string(),
                });
            }
        };
        self.requests_matched.fetch_add(1, Ordering::Relaxed);

        debug!(vault = vault_id, route = %route.name(), "Matched route");

        let chain = route.request_transformations();
        if !chain.is_empty() {
            self.check_body_size(request.body.len())?;
        }

        let upstream = route
            .upstream_url()
            .cloned()
            .or_else(|| tunnel_origin(&request.target))
            .or_else(|| {
                let vault = &snapshot.vault(vault_id)?.vault;
                Url::parse(&vault.upstream).ok()
            });

        let request = with_deadline(self.config.settings.chain_timeout(), route.transform_request(request))
            .await
            .map_err(|e| self.transform_failed(&route, e))?;

        if !chain.is_empty() {
            self.requests_transformed.fetch_add(1, Ordering::Relaxed);
            info!(
                vault = vault_id,
                route = %route.name(),
                transformers = chain.len(),
                "Applied request transformations"
            );
        }

        Ok(RoutedRequest {
            route,
            request,
            upstream,
        })
    }

    /// Run the response chain of the route that handled the request.
    pub async fn process_response(
        &self,
        route: &Route,
        response: ProxyResponse,
    ) -> Result<ProxyResponse, EngineError> {
        if route.response_transformations().is_empty() {
            return Ok(response);
        }

        self.check_body_size(response.body.len())?;

        let response = with_deadline(self.config.settings.chain_timeout(), route.transform_response(response))
            .await
            .map_err(|e| self.transform_failed(route, e))?;

        debug!(route = %route.name(), "Applied response transformations");
        Ok(response)
    }

    fn check_body_size(&self, len: usize) -> Result<(), EngineError> {
        let limit = self.config.settings.max_body_size;
        if len > limit {
            return Err(EngineError::BodyTooLarge { size: len, limit });
        }
        Ok(())
    }

    fn transform_failed(&self, route: &Route, error: PipelineError) -> EngineError {
        self.transform_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            route = %route.name(),
            error = %error,
            "Transformation failed, refusing to forward"
        );
        EngineError::Transform(error)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_matched: self.requests_matched.load(Ordering::Relaxed),
            requests_transformed: self.requests_transformed.load(Ordering::Relaxed),
            transform_errors: self.transform_errors.load(Ordering::Relaxed),
        }
    }
}

/// `scheme://host[:port]/` of a tunnel request.
fn tunnel_origin(target: &RequestTarget) -> Option<Url> {
    match target {
        RequestTarget::Tunnel { scheme, .. } => {
            Url::parse(&format!("{}://{}/", scheme, target.authority())).ok()
        }
        RequestTarget::Inbound { .. } => None,
    }
}

/// Route engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate vault id: {0}")]
    DuplicateVault(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No route matches the request in vault {vault_id}")]
    NoRoute { vault_id: String },

    #[error("Body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("Transformation failed: {0}")]
    Transform(#[source] PipelineError),
}

impl EngineError {
    /// Whether this should surface as a 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NoRoute { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}
