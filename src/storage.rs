//! Vault and route persistence.
//!
//! The engine only reads from storage when building a snapshot. Route
//! listings are returned in creation order, which is also match order.

use crate::config::RouteConfig;
use crate::matcher::Direction;
use crate::route::direction_of;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A tenant boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    #[serde(default)]
    pub id: String,
    /// Default upstream base URL
    #[serde(default)]
    pub upstream: String,
}

/// A stored route, as exposed by the administrative API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "vaultID")]
    pub vault_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub method: String,
    /// Route pattern
    pub path: String,
    #[serde(default)]
    pub upstream: String,
    #[serde(default)]
    pub request_transformations: Vec<String>,
    #[serde(default)]
    pub response_transformations: Vec<String>,
}

impl RouteRecord {
    /// The definition the engine compiles.
    pub fn definition(&self) -> RouteConfig {
        RouteConfig {
            name: if self.name.is_empty() {
                self.id.clone()
            } else {
                self.name.clone()
            },
            method: self.method.clone(),
            path: self.path.clone(),
            upstream: self.upstream.clone(),
            request_transformations: self.request_transformations.clone(),
            response_transformations: self.response_transformations.clone(),
        }
    }

    /// Check that `type` agrees with the direction `path` implies.
    pub fn check_direction(&self) -> Result<(), StorageError> {
        let implied = direction_of(&self.name, &self.path)
            .map_err(|e| StorageError::InvalidRoute(e.to_string()))?;

        if implied != self.direction {
            return Err(StorageError::InvalidRoute(format!(
                "type '{}' does not match path '{}', which is {}",
                self.direction, self.path, implied
            )));
        }
        Ok(())
    }
}

/// Vault and route storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new vault, assigning its id.
    async fn create_vault(&self, vault: Vault) -> Result<Vault, StorageError>;

    async fn list_vaults(&self) -> Result<Vec<Vault>, StorageError>;

    async fn find_vault(&self, id: &str) -> Result<Vault, StorageError>;

    /// Store a new route under `vault_id`, assigning its id.
    ///
    /// The vault comes from the caller's tenant context; any `vault_id` on
    /// the record is overwritten. A record whose `type` disagrees with its
    /// path is rejected with `InvalidRoute`.
    async fn create_route(&self, vault_id: &str, route: RouteRecord) -> Result<RouteRecord, StorageError>;

    /// Routes of a vault in creation order.
    async fn list_routes(&self, vault_id: &str) -> Result<Vec<RouteRecord>, StorageError>;

    async fn find_route(&self, vault_id: &str, route_id: &str) -> Result<RouteRecord, StorageError>;
}

/// Storage errors. `NotFound` maps to a 404 at the API layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn vault(id: &str) -> Self {
        Self::NotFound {
            kind: "vault",
            id: id.to_string(),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    vaults: Vec<Vault>,
    routes: HashMap<String, Vec<RouteRecord>>,
}

/// In-process storage.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_vault(&self, vault: Vault) -> Result<Vault, StorageError> {
        let vault = Vault {
            id: new_id("vlt"),
            upstream: vault.upstream,
        };

        let mut state = self.state.write().await;
        state.routes.insert(vault.id.clone(), Vec::new());
        state.vaults.push(vault.clone());
        Ok(vault)
    }

    async fn list_vaults(&self) -> Result<Vec<Vault>, StorageError> {
        Ok(self.state.read().await.vaults.clone())
    }

    async fn find_vault(&self, id: &str) -> Result<Vault, StorageError> {
        self.state
            .read()
            .await
            .vaults
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| StorageError::vault(id))
    }

    async fn create_route(&self, vault_id: &str, route: RouteRecord) -> Result<RouteRecord, StorageError> {
        route.check_direction()?;

        let mut state = self.state.write().await;
        let routes = state
            .routes
            .get_mut(vault_id)
            .ok_or_else(|| StorageError::vault(vault_id))?;

        let route = RouteRecord {
            id: new_id("rt"),
            vault_id: vault_id.to_string(),
            ..route
        };
        routes.push(route.clone());
        Ok(route)
    }

    async fn list_routes(&self, vault_id: &str) -> Result<Vec<RouteRecord>, StorageError> {
        self.state
            .read()
            .await
            .routes
            .get(vault_id)
            .cloned()
            .ok_or_else(|| StorageError::vault(vault_id))
    }

    async fn find_route(&self, vault_id: &str, route_id: &str) -> Result<RouteRecord, StorageError> {
        let state = self.state.read().await;
        let routes = state
            .routes
            .get(vault_id)
            .ok_or_else(|| StorageError::vault(vault_id))?;

        routes
            .iter()
            .find(|r| r.id == route_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "route",
                id: route_id.to_string(),
            })
    }
}
