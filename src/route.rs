//! Routes: a direction/method/pattern rule paired with transformation chains.

use crate::matcher::{Direction, MatcherError, MethodMatcher, RouteMatcher, UrlPattern};
use crate::message::{ProxyRequest, ProxyResponse};
use crate::transformer::{apply_request_chain, apply_response_chain, PipelineError, TransformerRef};
use std::fmt;
use url::Url;

/// Base used only to validate relative route URLs.
const VALIDATION_BASE: &str = "http://route.invalid/";

/// Inputs to [`Route::new`].
#[derive(Clone, Default)]
pub struct RouteParams {
    pub name: String,
    pub method: String,
    /// Path glob (inbound) or absolute URL glob (outbound)
    pub url: String,
    pub upstream: String,
    pub request_transformations: Vec<TransformerRef>,
    pub response_transformations: Vec<TransformerRef>,
}

/// A compiled, immutable route.
pub struct Route {
    name: String,
    matcher: RouteMatcher,
    upstream_url: Option<Url>,
    request_transformations: Vec<TransformerRef>,
    response_transformations: Vec<TransformerRef>,
}

impl Route {
    /// Validate and compile a route.
    ///
    /// An absolute URL (scheme and host) makes an outbound route; a relative
    /// one makes an inbound route, which must name an upstream.
    pub fn new(params: RouteParams) -> Result<Self, RouteError> {
        let direction = direction_of(&params.name, &params.url)?;

        if direction == Direction::Inbound && params.upstream.is_empty() {
            return Err(RouteError::MissingUpstream {
                route: params.name,
            });
        }

        let upstream_url = if params.upstream.is_empty() {
            None
        } else {
            let url = Url::parse(&params.upstream).map_err(|e| RouteError::MalformedUpstream {
                route: params.name.clone(),
                upstream: params.upstream.clone(),
                reason: e.to_string(),
            })?;
            Some(url)
        };

        let matcher = RouteMatcher::compile(direction, &params.method, &params.url).map_err(
            |source| RouteError::InvalidPattern {
                route: params.name.clone(),
                source,
            },
        )?;

        Ok(Self {
            name: params.name,
            matcher,
            upstream_url,
            request_transformations: params.request_transformations,
            response_transformations: params.response_transformations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.matcher.direction()
    }

    pub fn is_inbound(&self) -> bool {
        self.direction() == Direction::Inbound
    }

    pub fn method(&self) -> &MethodMatcher {
        self.matcher.method()
    }

    pub fn pattern(&self) -> &UrlPattern {
        self.matcher.pattern()
    }

    /// Where matched traffic is forwarded. Always set for inbound routes.
    pub fn upstream_url(&self) -> Option<&Url> {
        self.upstream_url.as_ref()
    }

    pub fn request_transformations(&self) -> &[TransformerRef] {
        &self.request_transformations
    }

    pub fn response_transformations(&self) -> &[TransformerRef] {
        &self.response_transformations
    }

    /// Check whether this route applies to a request.
    pub fn matches(&self, request: &ProxyRequest) -> bool {
        self.matcher.matches(request)
    }

    /// Run the request chain.
    pub async fn transform_request(&self, request: ProxyRequest) -> Result<ProxyRequest, PipelineError> {
        apply_request_chain(&self.request_transformations, request).await
    }

    /// Run the response chain.
    pub async fn transform_response(
        &self,
        response: ProxyResponse,
    ) -> Result<ProxyResponse, PipelineError> {
        apply_response_chain(&self.response_transformations, response).await
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |chain: &[TransformerRef]| chain.iter().map(|t| t.name().to_string()).collect::<Vec<_>>();
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("direction", &self.direction())
            .field("method", &self.method().as_str())
            .field("pattern", &self.pattern().as_str())
            .field("upstream_url", &self.upstream_url.as_ref().map(Url::as_str))
            .field("request_transformations", &names(&self.request_transformations))
            .field("response_transformations", &names(&self.response_transformations))
            .finish()
    }
}

/// Direction implied by a route URL: absolute with a host is outbound,
/// relative is inbound.
pub(crate) fn direction_of(route: &str, raw: &str) -> Result<Direction, RouteError> {
    let malformed = |reason: String| RouteError::MalformedUrl {
        route: route.to_string(),
        url: raw.to_string(),
        reason,
    };

    match Url::parse(raw) {
        Ok(url) if url.has_host() => Ok(Direction::Outbound),
        Ok(_) => Err(malformed("absolute route URL has no host".to_string())),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(VALIDATION_BASE).map_err(|e| malformed(e.to_string()))?;
            base.join(raw).map_err(|e| malformed(e.to_string()))?;
            Ok(Direction::Inbound)
        }
        Err(e) => Err(malformed(e.to_string())),
    }
}

/// Errors detected while building a route. Never raised at match time.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Route '{route}' has a malformed URL '{url}': {reason}")]
    MalformedUrl {
        route: String,
        url: String,
        reason: String,
    },

    #[error("Missing upstream for inbound route '{route}'")]
    MissingUpstream { route: String },

    #[error("Route '{route}' has a malformed upstream '{upstream}': {reason}")]
    MalformedUpstream {
        route: String,
        upstream: String,
        reason: String,
    },

    #[error("Route '{route}' has an invalid pattern: {source}")]
    InvalidPattern {
        route: String,
        #[source]
        source: MatcherError,
    },
}
