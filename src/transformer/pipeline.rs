//! Ordered application of transformer chains.

use super::{TransformError, TransformerRef};
use crate::message::{ProxyRequest, ProxyResponse};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Apply a request chain. Stops at the first failing transformer.
///
/// Dropping the returned future abandons the remaining steps.
pub async fn apply_request_chain(
    chain: &[TransformerRef],
    mut request: ProxyRequest,
) -> Result<ProxyRequest, PipelineError> {
    for (position, transformer) in chain.iter().enumerate() {
        debug!(position, transformer = transformer.name(), "Applying request transformer");
        request = transformer
            .transform_request(request)
            .await
            .map_err(|source| fail(position, transformer, source))?;
    }

    Ok(request)
}

/// Apply a response chain. Stops at the first failing transformer.
pub async fn apply_response_chain(
    chain: &[TransformerRef],
    mut response: ProxyResponse,
) -> Result<ProxyResponse, PipelineError> {
    for (position, transformer) in chain.iter().enumerate() {
        debug!(position, transformer = transformer.name(), "Applying response transformer");
        response = transformer
            .transform_response(response)
            .await
            .map_err(|source| fail(position, transformer, source))?;
    }

    Ok(response)
}

/// Run a chain under a deadline. `None` waits indefinitely.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, chain: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, chain)
            .await
            .map_err(|_| PipelineError::TimedOut(limit))?,
        None => chain.await,
    }
}

fn fail(position: usize, transformer: &TransformerRef, source: TransformError) -> PipelineError {
    warn!(
        position,
        transformer = transformer.name(),
        error = %source,
        "Transformer failed, aborting chain"
    );
    PipelineError::TransformationFailed {
        position,
        transformer: transformer.name().to_string(),
        source,
    }
}

/// Errors that abort a chain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Transformer #{position} ({transformer}) failed: {source}")]
    TransformationFailed {
        position: usize,
        transformer: String,
        #[source]
        source: TransformError,
    },

    #[error("Transformation chain exceeded {0:?}")]
    TimedOut(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestTarget;
    use crate::transformer::Transformer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Appends its tag to the body and counts invocations.
    struct Tag {
        tag: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Tag {
        fn ok(tag: &'static str) -> Arc<Self> {
            Arc::new(Self {
                tag,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(tag: &'static str) -> Arc<Self> {
            Arc::new(Self {
                tag,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transformer for Tag {
        fn name(&self) -> &str {
            self.tag
        }

        async fn transform_request(
            &self,
            mut request: ProxyRequest,
        ) -> Result<ProxyRequest, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransformError::Other(format!("{} refused", self.tag)));
            }
            request.body.extend_from_slice(self.tag.as_bytes());
            Ok(request)
        }

        async fn transform_response(
            &self,
            mut response: ProxyResponse,
        ) -> Result<ProxyResponse, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransformError::Other(format!("{} refused", self.tag)));
            }
            response.body.extend_from_slice(self.tag.as_bytes());
            Ok(response)
        }
    }

    fn request() -> ProxyRequest {
        ProxyRequest::new(
            "POST",
            RequestTarget::Inbound {
                path: "/tokenize".to_string(),
            },
        )
        .with_body("x")
    }

    #[tokio::test]
    async fn test_chain_feeds_output_forward() {
        let chain: Vec<TransformerRef> = vec![Tag::ok("a"), Tag::ok("b"), Tag::ok("c")];
        let out = apply_request_chain(&chain, request()).await.unwrap();
        assert_eq!(out.body, b"xabc");
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let out = apply_request_chain(&[], request()).await.unwrap();
        assert_eq!(out, request());

        let response = ProxyResponse::new(200).with_body("ok");
        let out = apply_response_chain(&[], response.clone()).await.unwrap();
        assert_eq!(out, response);
    }

    #[tokio::test]
    async fn test_short_circuit_on_failure() {
        let first = Tag::ok("a");
        let second = Tag::failing("b");
        let third = Tag::ok("c");
        let chain: Vec<TransformerRef> = vec![first.clone(), second.clone(), third.clone()];

        let err = apply_request_chain(&chain, request()).await.unwrap_err();

        match err {
            PipelineError::TransformationFailed {
                position,
                transformer,
                ..
            } => {
                assert_eq!(position, 1);
                assert_eq!(transformer, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn test_response_chain() {
        let chain: Vec<TransformerRef> = vec![Tag::ok("1"), Tag::ok("2")];
        let out = apply_response_chain(&chain, ProxyResponse::new(200).with_body(">"))
            .await
            .unwrap();
        assert_eq!(out.body, b">12");
        assert_eq!(out.status, 200);
    }

    #[tokio::test]
    async fn test_deadline_elapsed() {
        let result: Result<(), PipelineError> = with_deadline(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(PipelineError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_no_deadline() {
        let out = with_deadline(None, apply_request_chain(&[], request()))
            .await
            .unwrap();
        assert_eq!(out.body, b"x");
    }
}
