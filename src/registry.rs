//! Per-vault route tables and atomically published snapshots.
//!
//! A [`RouteSnapshot`] is built completely, then swapped in with
//! [`RouteRegistry::publish`]. Readers hold an `Arc` to the snapshot they
//! loaded, so a reload never changes routes under an in-flight request.

use crate::config::{RouteConfig, VaultConfig};
use crate::message::ProxyRequest;
use crate::route::{Route, RouteError, RouteParams};
use crate::storage::Vault;
use crate::transformer::{RegistryError, TransformerRegistry};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ordered routes of one vault.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(routes: Vec<Arc<Route>>) -> Self {
        Self { routes }
    }

    /// First route that matches, in insertion order.
    pub fn select(&self, request: &ProxyRequest) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.matches(request))
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// A vault with its compiled routes.
#[derive(Debug)]
pub struct VaultRoutes {
    pub vault: Vault,
    pub table: RouteTable,
}

/// Immutable view of every vault's routes.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    vaults: HashMap<String, VaultRoutes>,
}

impl RouteSnapshot {
    pub fn vault(&self, id: &str) -> Option<&VaultRoutes> {
        self.vaults.get(id)
    }

    /// Select the route for a request of `vault_id`.
    pub fn select(&self, vault_id: &str, request: &ProxyRequest) -> Option<&Arc<Route>> {
        self.vaults.get(vault_id)?.table.select(request)
    }

    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    pub fn route_count(&self) -> usize {
        self.vaults.values().map(|v| v.table.len()).sum()
    }
}

/// Holder of the current snapshot.
pub struct RouteRegistry {
    current: ArcSwap<RouteSnapshot>,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new(RouteSnapshot::default())
    }
}

impl RouteRegistry {
    pub fn new(snapshot: RouteSnapshot) -> Self {
        Self {
            current: ArcSwap::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot. Readers see either the old or the new one.
    pub fn publish(&self, snapshot: RouteSnapshot) {
        debug!(
            vaults = snapshot.vault_count(),
            routes = snapshot.route_count(),
            "Publishing route snapshot"
        );
        self.current.store(Arc::new(snapshot));
    }

    /// Select a route against the current snapshot.
    pub fn select(&self, vault_id: &str, request: &ProxyRequest) -> Option<Arc<Route>> {
        self.current.load().select(vault_id, request).cloned()
    }
}

/// A route definition that could not be built.
#[derive(Debug)]
pub struct RejectedRoute {
    pub vault_id: String,
    pub route: String,
    pub error: BuildError,
}

/// Outcome of building a snapshot.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedRoute>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Why a single route was left out of a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Transformer(#[from] RegistryError),
}

/// Assembles a snapshot from vault and route definitions.
pub struct SnapshotBuilder<'a> {
    transformers: &'a TransformerRegistry,
    vaults: HashMap<String, VaultRoutes>,
    report: BuildReport,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(transformers: &'a TransformerRegistry) -> Self {
        Self {
            transformers,
            vaults: HashMap::new(),
            report: BuildReport::default(),
        }
    }

    /// Add a vault from configuration.
    pub fn add_config(&mut self, config: &VaultConfig) -> &mut Self {
        let vault = Vault {
            id: config.id.clone(),
            upstream: config.upstream.clone(),
        };
        self.add_vault(vault, &config.routes)
    }

    /// Add a vault and its routes in match order.
    ///
    /// Routes that fail to build are recorded in the report; the vault's
    /// other routes are still added.
    pub fn add_vault(&mut self, vault: Vault, routes: &[RouteConfig]) -> &mut Self {
        let mut compiled = Vec::with_capacity(routes.len());

        for definition in routes {
            match self.build_route(definition) {
                Ok(route) => compiled.push(Arc::new(route)),
                Err(error) => {
                    warn!(
                        vault = %vault.id,
                        route = %definition.name,
                        error = %error,
                        "Skipping route that failed to build"
                    );
                    self.report.rejected.push(RejectedRoute {
                        vault_id: vault.id.clone(),
                        route: definition.name.clone(),
                        error,
                    });
                }
            }
        }

        self.report.accepted += compiled.len();
        self.vaults.insert(
            vault.id.clone(),
            VaultRoutes {
                vault,
                table: RouteTable::new(compiled),
            },
        );
        self
    }

    fn build_route(&self, definition: &RouteConfig) -> Result<Route, BuildError> {
        let params = RouteParams {
            name: definition.name.clone(),
            method: definition.method.clone(),
            url: definition.path.clone(),
            upstream: definition.upstream.clone(),
            request_transformations: self.transformers.resolve(&definition.request_transformations)?,
            response_transformations: self
                .transformers
                .resolve(&definition.response_transformations)?,
        };
        Ok(Route::new(params)?)
    }

    pub fn finish(self) -> (RouteSnapshot, BuildReport) {
        (
            RouteSnapshot {
                vaults: self.vaults,
            },
            self.report,
        )
    }
}
