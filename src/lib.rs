//! Routing and transformation engine for a multi-tenant intercepting proxy.
//!
//! Every vault (tenant) owns an ordered list of routes. A route is either
//! inbound (a path glob for requests addressed to the proxy itself) or
//! outbound (an absolute URL glob for traffic tunnelled through it). The first
//! route whose direction, method and pattern match a request handles it, and
//! its transformer chains rewrite the request on the way out and the response
//! on the way back.
//!
//! - Glob matching over canonical request targets (`:443` dropped for https)
//! - Header manipulation (add/set/remove with variable substitution)
//! - JSON body operations (set, delete, rename, mask)
//! - Job-backed transformers that hand payloads to worker tasks
//! - Atomically published per-vault route snapshots
//!
//! ## Configuration Example
//!
//! ```yaml
//! transformers:
//!   strip-debug:
//!     type: header
//!     remove: ["X-Debug"]
//! vaults:
//!   - id: "vlt_1"
//!     routes:
//!       - method: "POST"
//!         path: "/tokenize"
//!         upstream: "https://tokens.example.com"
//!         request_transformations: ["strip-debug"]
//! ```

pub mod config;
pub mod engine;
pub mod matcher;
pub mod message;
pub mod registry;
pub mod route;
pub mod storage;
pub mod transformer;

pub use config::EngineConfig;
pub use engine::{EngineError, EngineStats, RouteEngine, RoutedRequest};
pub use matcher::{Direction, RouteMatcher};
pub use message::{ProxyRequest, ProxyResponse, RequestTarget};
pub use registry::{BuildReport, RouteRegistry, RouteSnapshot, SnapshotBuilder};
pub use route::{Route, RouteError, RouteParams};
pub use storage::{MemoryStorage, RouteRecord, Storage, StorageError, Vault};
pub use transformer::{PipelineError, Transformer, TransformerRegistry};
