//! Header manipulation transformer.

use super::{TransformError, Transformer};
use crate::config::HeaderTransform;
use crate::message::{append_header, remove_header, set_header, Headers, ProxyRequest, ProxyResponse};
use async_trait::async_trait;

/// Header manipulation transformer.
///
/// Applies removals first, then `set` (overwrite), then `add` (append).
/// Values support `${...}` interpolation against the message being rewritten.
pub struct HeaderTransformer {
    name: String,
    add: Vec<(String, String)>,
    set: Vec<(String, String)>,
    remove: Vec<String>,
}

impl HeaderTransformer {
    /// Create a new header transformer from configuration.
    pub fn new(name: impl Into<String>, config: &HeaderTransform) -> Self {
        let pairs = |values: &Option<Vec<crate::config::HeaderValue>>| {
            values
                .iter()
                .flatten()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect::<Vec<_>>()
        };

        Self {
            name: name.into(),
            add: pairs(&config.add),
            set: pairs(&config.set),
            remove: config.remove.clone().unwrap_or_default(),
        }
    }

    fn apply(&self, headers: &mut Headers, interpolate: impl Fn(&str) -> String) -> Result<(), TransformError> {
        let resolved_set: Vec<(String, String)> = self
            .set
            .iter()
            .map(|(n, v)| (n.clone(), interpolate(v)))
            .collect();
        let resolved_add: Vec<(String, String)> = self
            .add
            .iter()
            .map(|(n, v)| (n.clone(), interpolate(v)))
            .collect();

        for (name, value) in resolved_set.iter().chain(&resolved_add) {
            if value.contains(['\r', '\n']) {
                return Err(TransformError::Header(format!(
                    "value for '{}' contains a line break",
                    name
                )));
            }
        }

        for name in &self.remove {
            remove_header(headers, name);
        }
        for (name, value) in resolved_set {
            set_header(headers, &name, value);
        }
        for (name, value) in resolved_add {
            append_header(headers, &name, value);
        }

        Ok(())
    }
}

#[async_trait]
impl Transformer for HeaderTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform_request(
        &self,
        mut request: ProxyRequest,
    ) -> Result<ProxyRequest, TransformError> {
        let snapshot = request.clone();
        self.apply(&mut request.headers, |v| snapshot.interpolate(v))?;
        Ok(request)
    }

    async fn transform_response(
        &self,
        mut response: ProxyResponse,
    ) -> Result<ProxyResponse, TransformError> {
        let snapshot = response.clone();
        self.apply(&mut response.headers, |v| snapshot.interpolate(v))?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeaderValue;
    use crate::message::RequestTarget;

    fn header(name: &str, value: &str) -> HeaderValue {
        HeaderValue {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn make_request() -> ProxyRequest {
        ProxyRequest::new(
            "POST",
            RequestTarget::Inbound {
                path: "/tokenize".to_string(),
            },
        )
        .with_header("Content-Type", "application/json")
        .with_header("X-Debug", "1")
        .with_header("X-Trace", "a")
    }

    #[tokio::test]
    async fn test_set_add_remove() {
        let config = HeaderTransform {
            add: Some(vec![header("X-Trace", "b")]),
            set: Some(vec![header("Content-Type", "application/vnd.tokens+json")]),
            remove: Some(vec!["x-debug".to_string()]),
        };
        let transformer = HeaderTransformer::new("headers", &config);

        let out = transformer.transform_request(make_request()).await.unwrap();

        assert_eq!(out.header("content-type"), Some("application/vnd.tokens+json"));
        assert_eq!(out.header("x-debug"), None);
        assert_eq!(
            out.headers.get("x-trace"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(out.body, make_request().body);
    }

    #[tokio::test]
    async fn test_interpolation() {
        let config = HeaderTransform {
            add: None,
            set: Some(vec![
                header("X-Route-Path", "${request.path}"),
                header("X-Method", "${request.method}"),
            ]),
            remove: None,
        };
        let transformer = HeaderTransformer::new("headers", &config);

        let out = transformer.transform_request(make_request()).await.unwrap();

        assert_eq!(out.header("x-route-path"), Some("/tokenize"));
        assert_eq!(out.header("x-method"), Some("POST"));
    }

    #[tokio::test]
    async fn test_response_headers() {
        let config = HeaderTransform {
            add: None,
            set: Some(vec![header("X-Upstream-Status", "${response.status}")]),
            remove: Some(vec!["Server".to_string()]),
        };
        let transformer = HeaderTransformer::new("headers", &config);

        let response = ProxyResponse::new(502).with_header("Server", "nginx");
        let out = transformer.transform_response(response).await.unwrap();

        assert_eq!(out.header("server"), None);
        assert_eq!(out.header("x-upstream-status"), Some("502"));
    }

    #[tokio::test]
    async fn test_rejects_line_breaks() {
        let config = HeaderTransform {
            add: None,
            set: Some(vec![header("X-Echo", "${request.header.x-evil}")]),
            remove: Some(vec!["X-Debug".to_string()]),
        };
        let transformer = HeaderTransformer::new("headers", &config);

        let request = make_request().with_header("X-Evil", "a\r\nInjected: 1");
        let err = transformer.transform_request(request).await.unwrap_err();
        assert!(matches!(err, TransformError::Header(_)));
    }
}
