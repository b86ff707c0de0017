//! Basic example demonstrating axum-geoblock middleware.
//!
//! Run with: `cargo run --example basic`
//!
//! Test with:
//! ```sh
//! # US address (allowed country)
//! curl -H "X-Real-IP: 1.1.1.1" http://localhost:3000/
//!
//! # German address (not on the allow list, 451)
//! curl -H "X-Real-IP: 185.5.82.105" http://localhost:3000/
//!
//! # Blocked range inside an allowed country (451)
//! curl -H "X-Forwarded-For: 8.8.8.9" http://localhost:3000/
//!
//! # Single host carved out of the blocked range (allowed)
//! curl -H "X-Forwarded-For: 8.8.8.7" http://localhost:3000/
//!
//! # Private address (allowed)
//! curl -H "X-Real-IP: 192.168.178.66" http://localhost:3000/
//!
//! # Garbage (451)
//! curl -H "X-Forwarded-For: foobar" http://localhost:3000/
//!
//! # Direct connection from localhost (allowed, peer address is private)
//! curl http://localhost:3000/
//! ```

use axum::{routing::get, Router};
use axum_geoblock::{
    DecisionEngine, GeoblockLayer, HeaderAddressExtractor, PolicySet, StaticGeoLookup,
};
use http::StatusCode;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn index() -> &'static str {
    "Welcome - your address passed the geoblock"
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_geoblock=debug,basic=debug".into()),
        )
        .init();

    // A tiny stand-in for a real country database
    let lookup = StaticGeoLookup::new()
        .with("1.1.1.0/24", "US")
        .and_then(|l| l.with("8.8.8.0/24", "US"))
        .and_then(|l| l.with("185.5.82.0/24", "DE"))
        .expect("static lookup table");

    let policy = PolicySet::builder()
        .allow_countries(["US"])
        .block_networks(["8.8.8.0/24"])
        .allow_networks(["8.8.8.7/32"])
        .allow_private(true)
        .reject_status(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS)
        .build()
        .expect("valid policy");

    tracing::info!(
        "Geoblock policy: {} allowed countries, {} allowed networks, {} blocked networks",
        policy.allowed_countries().len(),
        policy.allowed_networks().len(),
        policy.blocked_networks().len()
    );

    let app = Router::new().route("/", get(index)).layer(
        GeoblockLayer::new(DecisionEngine::new(policy, lookup))
            // Also check the socket peer, so direct connections are gated too
            .with_extractor(HeaderAddressExtractor::new().with_peer_address(true)),
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    // Important: Use into_make_service_with_connect_info for peer addresses
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
