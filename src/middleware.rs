//! Geoblock middleware implementation for axum.
//!
//! This module provides the [`GeoblockLayer`] and [`GeoblockMiddleware`] types
//! that integrate with axum's (and tower's) middleware system.

use crate::engine::{DecisionEngine, Reason};
use crate::error::EvalError;
use crate::extractor::{AddressExtractor, HeaderAddressExtractor};
use crate::geo::Location;

use axum::response::Response;
use futures_util::future::BoxFuture;
use http::{header, Request, StatusCode};
use http_body::Body;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Whether the gate checks requests at all, decided once at construction.
#[derive(Debug, Clone)]
pub enum Gate {
    /// Evaluate every candidate address.
    Active(Arc<DecisionEngine>),
    /// Forward everything unchecked.
    Passthrough,
}

/// Why a request was turned away.
#[derive(Debug, Clone)]
pub enum DenialCause {
    /// The policy denied the address.
    Policy(Reason),
    /// The address could not be evaluated.
    Error(EvalError),
}

/// A denied candidate address.
#[derive(Debug, Clone)]
pub struct Denial {
    /// The candidate string as found in the request.
    pub ip: String,
    /// The location, when the lookup got that far.
    pub location: Option<Location>,
    /// Why the address was denied.
    pub cause: DenialCause,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            DenialCause::Policy(reason) => match &self.location {
                Some(location) => write!(f, "access denied for {} ({}): {}", self.ip, location, reason),
                None => write!(f, "access denied for {}: {}", self.ip, reason),
            },
            DenialCause::Error(err) => write!(f, "access denied for {}: {}", self.ip, err),
        }
    }
}

impl Gate {
    /// Check every candidate address; the first denial stops the check.
    ///
    /// An empty candidate list passes. Candidates after the first denial are
    /// not evaluated.
    ///
    /// # Example
    /// ```
    /// use axum_geoblock::{DecisionEngine, Gate, PolicySet, StaticGeoLookup};
    /// use std::sync::Arc;
    ///
    /// let lookup = StaticGeoLookup::new().with("1.1.1.0/24", "US").unwrap();
    /// let policy = PolicySet::builder().allow_countries(["US"]).build().unwrap();
    /// let gate = Gate::Active(Arc::new(DecisionEngine::new(policy, lookup)));
    ///
    /// assert!(gate.screen(&["1.1.1.1".to_string()]).is_ok());
    /// assert!(gate.screen(&["1.1.1.1".to_string(), "10.0.0.1".to_string()]).is_err());
    /// assert!(gate.screen(&[]).is_ok());
    /// ```
    pub fn screen(&self, candidates: &[String]) -> Result<(), Denial> {
        let engine = match self {
            Self::Passthrough => return Ok(()),
            Self::Active(engine) => engine,
        };

        for ip in candidates {
            match engine.evaluate(ip) {
                Ok(verdict) if verdict.allowed => {}
                Ok(verdict) => {
                    return Err(Denial {
                        ip: ip.clone(),
                        location: Some(verdict.location),
                        cause: DenialCause::Policy(verdict.reason),
                    });
                }
                Err(err) => {
                    return Err(Denial {
                        ip: ip.clone(),
                        location: None,
                        cause: DenialCause::Error(err),
                    });
                }
            }
        }
        Ok(())
    }

    /// Status code written on denial, `None` for a passthrough gate.
    pub fn reject_status(&self) -> Option<StatusCode> {
        match self {
            Self::Active(engine) => Some(engine.policy().reject_status()),
            Self::Passthrough => None,
        }
    }
}

/// A Tower layer that adds geoblocking to a service.
///
/// # Example
/// ```no_run
/// use axum::{Router, routing::get};
/// use axum_geoblock::{DecisionEngine, GeoblockLayer, MaxMindLookup, PolicySet};
///
/// async fn handler() -> &'static str {
///     "Hello, World!"
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let policy = PolicySet::builder()
///         .allow_countries(["US", "CA"])
///         .allow_private(true)
///         .build()
///         .unwrap();
///     let lookup = MaxMindLookup::open("GeoLite2-Country.mmdb").unwrap();
///
///     let app = Router::new()
///         .route("/", get(handler))
///         .layer(GeoblockLayer::new(DecisionEngine::new(policy, lookup)));
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
///     axum::serve(listener, app).await.unwrap();
/// }
/// ```
#[derive(Debug)]
pub struct GeoblockLayer<X = HeaderAddressExtractor> {
    gate: Gate,
    extractor: Arc<X>,
}

// Manual Clone impl to avoid requiring X: Clone (it's behind Arc)
impl<X> Clone for GeoblockLayer<X> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl GeoblockLayer<HeaderAddressExtractor> {
    /// Create a layer around a decision engine.
    ///
    /// If the engine's policy is disabled the layer is a passthrough.
    /// Candidate addresses come from `X-Forwarded-For` and `X-Real-IP`.
    pub fn new(engine: DecisionEngine) -> Self {
        let gate = if engine.policy().enabled() {
            Gate::Active(Arc::new(engine))
        } else {
            Gate::Passthrough
        };
        Self {
            gate,
            extractor: Arc::new(HeaderAddressExtractor::new()),
        }
    }

    /// Create a layer that forwards every request unchecked.
    pub fn passthrough() -> Self {
        Self {
            gate: Gate::Passthrough,
            extractor: Arc::new(HeaderAddressExtractor::new()),
        }
    }
}

impl<X> GeoblockLayer<X> {
    /// Use a custom address extractor.
    ///
    /// # Example
    /// ```
    /// use axum_geoblock::{GeoblockLayer, HeaderAddressExtractor};
    ///
    /// let layer = GeoblockLayer::passthrough()
    ///     .with_extractor(HeaderAddressExtractor::new().with_peer_address(true));
    /// ```
    pub fn with_extractor<X2>(self, extractor: X2) -> GeoblockLayer<X2> {
        GeoblockLayer {
            gate: self.gate,
            extractor: Arc::new(extractor),
        }
    }

    /// The gate this layer installs.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Whether requests pass through unchecked.
    pub fn is_passthrough(&self) -> bool {
        matches!(self.gate, Gate::Passthrough)
    }
}

impl<S, X> Layer<S> for GeoblockLayer<X> {
    type Service = GeoblockMiddleware<S, X>;

    fn layer(&self, inner: S) -> Self::Service {
        GeoblockMiddleware {
            inner,
            gate: self.gate.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// The geoblock middleware service.
pub struct GeoblockMiddleware<S, X> {
    inner: S,
    gate: Gate,
    extractor: Arc<X>,
}

// Manual Clone impl to avoid requiring X: Clone (it's behind Arc)
impl<S: Clone, X> Clone for GeoblockMiddleware<S, X> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: self.gate.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S, X, ReqBody, ResBody> Service<Request<ReqBody>> for GeoblockMiddleware<S, X>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    X: AddressExtractor<ReqBody> + 'static,
    ReqBody: Body + Send + 'static,
    ResBody: Body + Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if let Gate::Active(engine) = &self.gate {
            // Evaluate synchronously before entering the async block
            let candidates = self.extractor.extract_addresses(&request);

            if let Err(denial) = self.gate.screen(&candidates) {
                log_denial(&request, &denial);

                let mut response = http::Response::new(ResBody::default());
                *response.status_mut() = engine.policy().reject_status();
                return Box::pin(async move { Ok(response) });
            }

            tracing::trace!(
                candidates = ?candidates,
                method = %request.method(),
                path = %request.uri().path(),
                "Geoblock allowed request"
            );
        }

        Box::pin(async move { inner.call(request).await })
    }
}

fn log_denial<B>(request: &Request<B>, denial: &Denial) {
    let method = request.method();
    let path = request.uri().path();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or("-");

    match &denial.cause {
        DenialCause::Policy(reason) => {
            tracing::info!(
                ip = %denial.ip,
                country = ?denial.location.as_ref().map(ToString::to_string),
                reason = %reason,
                method = %method,
                host = %host,
                path = %path,
                "Geoblock denied request"
            );
        }
        DenialCause::Error(err) => {
            tracing::warn!(
                ip = %denial.ip,
                error = %err,
                method = %method,
                host = %host,
                path = %path,
                "Geoblock denied request after failed evaluation"
            );
        }
    }
}
