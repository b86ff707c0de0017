//! Error types for address evaluation.

use std::net::{AddrParseError, IpAddr};

/// Error reported by a [`GeoLookup`](crate::GeoLookup) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The backend itself failed (corrupt database, decoding error, ...).
    #[error("geolocation backend failed: {0}")]
    Backend(String),

    /// The backend answered with an error-shaped result instead of a country.
    #[error("geolocation returned an error result: {0}")]
    Rejected(String),
}

/// Error raised while evaluating a single candidate address.
///
/// Any evaluation error denies the request that carried the address.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    /// The candidate string is not an IP address.
    #[error("invalid address '{input}': {source}")]
    InvalidAddress {
        /// The offending input, as found in the request.
        input: String,
        /// The underlying parse error.
        source: AddrParseError,
    },

    /// The geolocation lookup failed for the address.
    #[error("lookup of {ip} failed: {source}")]
    Lookup {
        /// The address that was looked up.
        ip: IpAddr,
        /// The backend error.
        source: LookupError,
    },
}

impl EvalError {
    /// Build an [`EvalError::InvalidAddress`] for `input`.
    pub(crate) fn invalid_address(input: &str, source: AddrParseError) -> Self {
        Self::InvalidAddress {
            input: input.to_string(),
            source,
        }
    }
}
