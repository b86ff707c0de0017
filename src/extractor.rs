//! Candidate client address extraction.
//!
//! Behind a reverse proxy the real client address lives in headers such as
//! `X-Forwarded-For` and `X-Real-IP`. An [`AddressExtractor`] turns a request
//! into the list of address strings the gate has to check.
//!
//! The strings are returned as found: parsing is left to the decision engine
//! so that garbage in a header denies the request instead of being skipped.
//!
//! ## Custom Extraction
//!
//! ```
//! use axum_geoblock::AddressExtractor;
//! use http::Request;
//!
//! /// Trust only Cloudflare's connecting-IP header.
//! struct CloudflareExtractor;
//!
//! impl<B> AddressExtractor<B> for CloudflareExtractor {
//!     fn extract_addresses(&self, request: &Request<B>) -> Vec<String> {
//!         request
//!             .headers()
//!             .get("CF-Connecting-IP")
//!             .and_then(|v| v.to_str().ok())
//!             .map(|s| vec![s.trim().to_string()])
//!             .unwrap_or_default()
//!     }
//! }
//! ```

use axum::extract::ConnectInfo;
use http::header::{HeaderName, InvalidHeaderName};
use http::Request;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

/// Standard proxy header carrying the client chain.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header set by nginx-style proxies to the client address.
pub const X_REAL_IP: &str = "x-real-ip";

/// Trait for collecting candidate client addresses from a request.
///
/// The returned list is deduplicated and carries no meaningful order.
pub trait AddressExtractor<B>: Send + Sync {
    /// Extract candidate address strings from a request.
    fn extract_addresses(&self, request: &Request<B>) -> Vec<String>;
}

// Implement for Arc<T> where T: AddressExtractor
impl<B, T: AddressExtractor<B> + ?Sized> AddressExtractor<B> for Arc<T> {
    fn extract_addresses(&self, request: &Request<B>) -> Vec<String> {
        (**self).extract_addresses(request)
    }
}

// Implement for Box<T> where T: AddressExtractor
impl<B, T: AddressExtractor<B> + ?Sized> AddressExtractor<B> for Box<T> {
    fn extract_addresses(&self, request: &Request<B>) -> Vec<String> {
        (**self).extract_addresses(request)
    }
}

/// Extract addresses from comma-separated proxy headers.
///
/// Reads `X-Forwarded-For` and `X-Real-IP` by default. Every occurrence of a
/// header is read, each value is split on commas, tokens are trimmed and
/// empty tokens dropped. The union is deduplicated on the literal string.
///
/// # Example
/// ```
/// use axum_geoblock::{AddressExtractor, HeaderAddressExtractor};
/// use http::Request;
///
/// let extractor = HeaderAddressExtractor::new();
/// let req = Request::builder()
///     .header("X-Forwarded-For", "1.1.1.1, 10.0.0.1")
///     .header("X-Real-IP", "1.1.1.1")
///     .body(())
///     .unwrap();
///
/// let mut ips = extractor.extract_addresses(&req);
/// ips.sort();
/// assert_eq!(ips, vec!["1.1.1.1", "10.0.0.1"]);
/// ```
#[derive(Debug, Clone)]
pub struct HeaderAddressExtractor {
    headers: Vec<HeaderName>,
    peer_address: bool,
}

impl Default for HeaderAddressExtractor {
    fn default() -> Self {
        Self {
            headers: vec![
                HeaderName::from_static(X_FORWARDED_FOR),
                HeaderName::from_static(X_REAL_IP),
            ],
            peer_address: false,
        }
    }
}

impl HeaderAddressExtractor {
    /// Create an extractor reading `X-Forwarded-For` and `X-Real-IP`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extractor reading exactly the given headers.
    pub fn from_headers<I, S>(headers: I) -> Result<Self, InvalidHeaderName>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers = headers
            .into_iter()
            .map(|h| HeaderName::from_bytes(h.as_ref().trim().as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            headers,
            peer_address: false,
        })
    }

    /// Read an additional header.
    pub fn with_header(mut self, header: HeaderName) -> Self {
        if !self.headers.contains(&header) {
            self.headers.push(header);
        }
        self
    }

    /// Also check the socket peer address.
    ///
    /// Needs the router to be served with
    /// `into_make_service_with_connect_info::<SocketAddr>()`; without it the
    /// peer address is silently unavailable.
    pub fn with_peer_address(mut self, enabled: bool) -> Self {
        self.peer_address = enabled;
        self
    }

    /// The headers this extractor reads.
    pub fn headers(&self) -> &[HeaderName] {
        &self.headers
    }
}

impl<B> AddressExtractor<B> for HeaderAddressExtractor {
    fn extract_addresses(&self, request: &Request<B>) -> Vec<String> {
        let mut seen = HashSet::new();

        for name in &self.headers {
            for value in request.headers().get_all(name) {
                // Split raw bytes: opaque tokens must still reach the engine
                for token in value.as_bytes().split(|b| *b == b',') {
                    let token = String::from_utf8_lossy(token);
                    let token = token.trim();
                    if !token.is_empty() {
                        seen.insert(token.to_string());
                    }
                }
            }
        }

        if self.peer_address {
            if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
                seen.insert(addr.ip().to_string());
            }
        }

        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Request};

    fn sorted(mut ips: Vec<String>) -> Vec<String> {
        ips.sort();
        ips
    }

    #[test]
    fn test_no_headers() {
        let extractor = HeaderAddressExtractor::new();
        let req = Request::builder().body(()).unwrap();
        assert!(extractor.extract_addresses(&req).is_empty());
    }

    #[test]
    fn test_merges_and_deduplicates() {
        let extractor = HeaderAddressExtractor::new();
        let req = Request::builder()
            .header("x-forwarded-for", "1.1.1.1,8.8.8.8")
            .header("X-REAL-IP", "8.8.8.8")
            .body(())
            .unwrap();

        assert_eq!(
            sorted(extractor.extract_addresses(&req)),
            vec!["1.1.1.1", "8.8.8.8"]
        );
    }

    #[test]
    fn test_trims_and_drops_empty_tokens() {
        let extractor = HeaderAddressExtractor::new();
        let req = Request::builder()
            .header("X-Forwarded-For", " , 1.1.1.1 ,,  foobar ,")
            .body(())
            .unwrap();

        assert_eq!(
            sorted(extractor.extract_addresses(&req)),
            vec!["1.1.1.1", "foobar"]
        );
    }

    #[test]
    fn test_opaque_bytes_keep_neighbours() {
        let extractor = HeaderAddressExtractor::new();
        let req = Request::builder()
            .header(
                "X-Forwarded-For",
                HeaderValue::from_bytes(b"\xff, 1.1.1.1").unwrap(),
            )
            .body(())
            .unwrap();

        let ips = extractor.extract_addresses(&req);
        assert_eq!(ips.len(), 2);
        assert!(ips.iter().any(|ip| ip == "1.1.1.1"));
        assert!(ips.iter().any(|ip| ip == "\u{fffd}"));
    }

    #[test]
    fn test_no_textual_normalization() {
        let extractor = HeaderAddressExtractor::new();
        let req = Request::builder()
            .header("X-Forwarded-For", "2001:db8::1, 2001:0db8::1")
            .body(())
            .unwrap();

        assert_eq!(extractor.extract_addresses(&req).len(), 2);
    }

    #[test]
    fn test_repeated_header_lines() {
        let extractor = HeaderAddressExtractor::new();
        let req = Request::builder()
            .header("X-Forwarded-For", "1.1.1.1")
            .header("X-Forwarded-For", "9.9.9.9")
            .body(())
            .unwrap();

        assert_eq!(
            sorted(extractor.extract_addresses(&req)),
            vec!["1.1.1.1", "9.9.9.9"]
        );
    }

    #[test]
    fn test_custom_headers() {
        let extractor = HeaderAddressExtractor::from_headers(["CF-Connecting-IP"]).unwrap();
        let req = Request::builder()
            .header("CF-Connecting-IP", "1.1.1.1")
            .header("X-Forwarded-For", "8.8.8.8")
            .body(())
            .unwrap();

        assert_eq!(extractor.extract_addresses(&req), vec!["1.1.1.1"]);
        assert!(HeaderAddressExtractor::from_headers(["bad header"]).is_err());
    }

    #[test]
    fn test_peer_address() {
        let extractor = HeaderAddressExtractor::new().with_peer_address(true);
        let mut req = Request::builder().body(()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 4711))));

        assert_eq!(extractor.extract_addresses(&req), vec!["203.0.113.9"]);

        let extractor = HeaderAddressExtractor::new();
        assert!(extractor.extract_addresses(&req).is_empty());
    }
}
