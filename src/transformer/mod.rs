//! Request and response transformers.
//!
//! A route owns two ordered chains of transformers, one per direction. Each
//! transformer receives the whole message and returns a (possibly entirely
//! new) message; the pipeline feeds one step's output to the next.

mod header;
mod job;
mod json;
mod pipeline;
mod registry;

pub use header::HeaderTransformer;
pub use job::{Job, JobPhase, JobQueue, JobTransformer, JobWorker};
pub use json::JsonTransformer;
pub use pipeline::{apply_request_chain, apply_response_chain, with_deadline, PipelineError};
pub use registry::{RegistryError, TransformerRegistry};

use crate::message::{ProxyRequest, ProxyResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a transformer; chains hold these.
pub type TransformerRef = Arc<dyn Transformer>;

/// A unit of request/response rewriting.
///
/// Implementations may block on I/O or wait on an external job; the pipeline
/// only requires that each call eventually returns.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Get the transformer name for logging and error reporting.
    fn name(&self) -> &str;

    /// Transform a request on its way upstream.
    async fn transform_request(&self, request: ProxyRequest)
        -> Result<ProxyRequest, TransformError>;

    /// Transform a response on its way back to the client.
    async fn transform_response(
        &self,
        response: ProxyResponse,
    ) -> Result<ProxyResponse, TransformError>;
}

/// Errors raised by a single transformer.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON path error: {0}")]
    JsonPath(String),

    #[error("Invalid header: {0}")]
    Header(String),

    #[error("Job failed: {0}")]
    Job(String),

    #[error("{0}")]
    Other(String),
}
