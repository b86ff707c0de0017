//! CIDR sets with specificity-aware matching.
//!
//! A [`CidrSet`] answers two questions for an address: does any stored prefix
//! contain it, and if so how long is the most specific matching prefix. The
//! prefix length is what the decision engine compares between the allow and
//! block lists.

use crate::config::ConfigError;
use crate::error::EvalError;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// An ordered collection of network prefixes.
///
/// # Example
/// ```
/// use axum_geoblock::CidrSet;
///
/// let set = CidrSet::parse(["8.8.8.0/24", "8.8.8.7/32"]).unwrap();
/// assert_eq!(set.contains("8.8.8.7".parse().unwrap()), Some(32));
/// assert_eq!(set.contains("8.8.8.9".parse().unwrap()), Some(24));
/// assert_eq!(set.contains("9.9.9.9".parse().unwrap()), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CidrSet {
    networks: Vec<IpNetwork>,
}

impl CidrSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a set from CIDR strings.
    ///
    /// A bare address (no `/len`) is accepted as a single-host prefix. The
    /// first invalid entry aborts construction.
    pub fn parse<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let networks = entries
            .into_iter()
            .map(|entry| parse_network(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// Return the prefix length of the most specific stored network that
    /// contains `ip`, or `None` when no network matches.
    pub fn contains(&self, ip: IpAddr) -> Option<u8> {
        self.networks
            .iter()
            .filter(|network| network.contains(ip))
            .map(IpNetwork::prefix)
            .max()
    }

    /// Like [`contains`](Self::contains), parsing the address first.
    pub fn contains_str(&self, ip: &str) -> Result<Option<u8>, EvalError> {
        let addr = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| EvalError::invalid_address(ip, e))?;
        Ok(self.contains(addr.to_canonical()))
    }

    /// Number of stored networks.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether the set holds no networks.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Iterate over the stored networks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IpNetwork> {
        self.networks.iter()
    }
}

fn parse_network(entry: &str) -> Result<IpNetwork, ConfigError> {
    let s = entry.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidNetwork(
            entry.to_string(),
            "empty entry".to_string(),
        ));
    }
    s.parse::<IpNetwork>()
        .map_err(|e| ConfigError::InvalidNetwork(entry.to_string(), e.to_string()))
}
