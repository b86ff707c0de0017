//! # axum-geoblock
//!
//! Country and network based request gating middleware for [axum](https://docs.rs/axum) 0.8.
//!
//! Every request's candidate client addresses (taken from `X-Forwarded-For`
//! and `X-Real-IP`) are checked against a policy built from:
//! - **Countries**: allow and block lists of ISO country codes
//! - **Networks**: allow and block lists of CIDR ranges
//! - **Private addresses**: a single switch for addresses with no public location
//! - **Default**: the verdict when nothing else matched
//!
//! A request passes only if every candidate address passes. Otherwise it is
//! answered with the configured status code and an empty body, and the inner
//! service is never called.
//!
//! ## Quick Start
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum_geoblock::{DecisionEngine, GeoblockLayer, MaxMindLookup, PolicySet};
//!
//! async fn handler() -> &'static str {
//!     "Welcome"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = PolicySet::builder()
//!         // Only visitors from these countries
//!         .allow_countries(["US", "CA"])
//!         // Except this range, always
//!         .block_networks(["203.0.113.0/24"])
//!         // Internal health checks come from private addresses
//!         .allow_private(true)
//!         .build()
//!         .unwrap();
//!
//!     let lookup = MaxMindLookup::open("/var/lib/geoip/GeoLite2-Country.mmdb").unwrap();
//!
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(GeoblockLayer::new(DecisionEngine::new(policy, lookup)));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Rule Evaluation
//!
//! For each candidate address:
//!
//! 1. **Parse** the address. Garbage denies the request.
//! 2. **Locate** it through the [`GeoLookup`]. A failed lookup denies the request.
//! 3. **Private** addresses are decided by `allow_private` alone.
//! 4. **Networks**: the longer matching prefix between the allow and block
//!    lists wins; on a tie, allow wins.
//! 5. **Countries**: allow list first, then block list.
//! 6. **Default**: `default_allow`.
//!
//! ```
//! use axum_geoblock::{DecisionEngine, PolicySet, StaticGeoLookup};
//!
//! let lookup = StaticGeoLookup::new()
//!     .with("8.8.8.0/24", "US").unwrap()
//!     .with("185.5.82.0/24", "DE").unwrap();
//!
//! let policy = PolicySet::builder()
//!     .block_countries(["US"])
//!     .allow_networks(["8.8.8.8/32"])
//!     .default_allow(true)
//!     .build()
//!     .unwrap();
//! let engine = DecisionEngine::new(policy, lookup);
//!
//! assert!(engine.evaluate("8.8.8.8").unwrap().allowed);       // allowed network
//! assert!(!engine.evaluate("8.8.8.9").unwrap().allowed);      // blocked country
//! assert!(engine.evaluate("185.5.82.105").unwrap().allowed);  // default
//! assert!(engine.evaluate("foobar").is_err());
//! ```
//!
//! ## Configuration Files
//!
//! ```no_run
//! use axum_geoblock::GeoblockConfig;
//!
//! let layer = GeoblockConfig::from_file("geoblock.toml")
//!     .and_then(|config| config.into_layer())
//!     .unwrap();
//! ```
//!
//! See [`GeoblockConfig`] for the file format.
//!
//! ## Custom Address Sources
//!
//! ```no_run
//! use axum_geoblock::{GeoblockLayer, HeaderAddressExtractor};
//! use http::HeaderName;
//!
//! let extractor = HeaderAddressExtractor::new()
//!     .with_header(HeaderName::from_static("cf-connecting-ip"));
//! let layer = GeoblockLayer::passthrough().with_extractor(extractor);
//! ```
//!
//! Implement [`AddressExtractor`] for anything more involved.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod config;
mod engine;
mod error;
mod extractor;
mod geo;
mod middleware;
mod network;
mod policy;

// Re-export main types
pub use config::{ConfigError, GeoblockConfig};
pub use engine::{DecisionEngine, Reason, Verdict};
pub use error::{EvalError, LookupError};
pub use extractor::{AddressExtractor, HeaderAddressExtractor, X_FORWARDED_FOR, X_REAL_IP};
pub use geo::{is_private_address, GeoLookup, Location, MaxMindLookup, StaticGeoLookup, PRIVATE_SENTINEL};
pub use middleware::{Denial, DenialCause, Gate, GeoblockLayer, GeoblockMiddleware};
pub use network::CidrSet;
pub use policy::{PolicySet, PolicySetBuilder};

/// Prelude module for convenient imports.
///
/// ```
/// use axum_geoblock::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigError, GeoblockConfig};
    pub use crate::engine::{DecisionEngine, Verdict};
    pub use crate::error::{EvalError, LookupError};
    pub use crate::extractor::{AddressExtractor, HeaderAddressExtractor};
    pub use crate::geo::{GeoLookup, Location, MaxMindLookup, StaticGeoLookup};
    pub use crate::middleware::GeoblockLayer;
    pub use crate::policy::PolicySet;
}
