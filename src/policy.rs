//! The immutable access policy.
//!
//! A [`PolicySet`] is built once with a [`PolicySetBuilder`], validated at
//! build time, and then shared read-only by every request.

use crate::config::ConfigError;
use crate::network::CidrSet;
use http::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;

/// Country and network rules plus the fallbacks that apply when none match.
///
/// # Example
/// ```
/// use axum_geoblock::PolicySet;
/// use http::StatusCode;
///
/// let policy = PolicySet::builder()
///     .allow_countries(["US", "DE"])
///     .block_networks(["8.8.8.0/24"])
///     .allow_networks(["8.8.8.7/32"])
///     .allow_private(true)
///     .reject_status(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS)
///     .build()
///     .unwrap();
///
/// assert!(policy.is_country_allowed("us"));
/// assert_eq!(policy.reject_status(), StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS);
/// ```
#[derive(Debug, Clone)]
pub struct PolicySet {
    pub(crate) allowed_countries: HashSet<String>,
    pub(crate) blocked_countries: HashSet<String>,
    pub(crate) allowed_networks: CidrSet,
    pub(crate) blocked_networks: CidrSet,
    pub(crate) allow_private: bool,
    pub(crate) default_allow: bool,
    pub(crate) reject_status: StatusCode,
    pub(crate) enabled: bool,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            allowed_countries: HashSet::new(),
            blocked_countries: HashSet::new(),
            allowed_networks: CidrSet::new(),
            blocked_networks: CidrSet::new(),
            allow_private: false,
            default_allow: false,
            reject_status: StatusCode::FORBIDDEN,
            enabled: true,
        }
    }
}

impl PolicySet {
    /// Create a builder.
    pub fn builder() -> PolicySetBuilder {
        PolicySetBuilder::new()
    }

    /// Whether `country` is on the allow list (case-insensitive).
    pub fn is_country_allowed(&self, country: &str) -> bool {
        self.allowed_countries
            .contains(&country.to_ascii_uppercase())
    }

    /// Whether `country` is on the block list (case-insensitive).
    pub fn is_country_blocked(&self, country: &str) -> bool {
        self.blocked_countries
            .contains(&country.to_ascii_uppercase())
    }

    /// Allowed country codes, upper-cased.
    pub fn allowed_countries(&self) -> &HashSet<String> {
        &self.allowed_countries
    }

    /// Blocked country codes, upper-cased.
    pub fn blocked_countries(&self) -> &HashSet<String> {
        &self.blocked_countries
    }

    /// Networks that are always allowed (subject to specificity).
    pub fn allowed_networks(&self) -> &CidrSet {
        &self.allowed_networks
    }

    /// Networks that are always blocked (subject to specificity).
    pub fn blocked_networks(&self) -> &CidrSet {
        &self.blocked_networks
    }

    /// Verdict for private and unroutable addresses.
    pub fn allow_private(&self) -> bool {
        self.allow_private
    }

    /// Verdict when no rule matches.
    pub fn default_allow(&self) -> bool {
        self.default_allow
    }

    /// Status code written on denial.
    pub fn reject_status(&self) -> StatusCode {
        self.reject_status
    }

    /// Whether gating is active at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Builder for constructing a [`PolicySet`].
///
/// Network entries are kept as strings until [`build`](Self::build), which is
/// where they are validated.
#[derive(Debug, Clone)]
pub struct PolicySetBuilder {
    allowed_countries: Vec<String>,
    blocked_countries: Vec<String>,
    allowed_networks: Vec<String>,
    blocked_networks: Vec<String>,
    allow_private: bool,
    default_allow: bool,
    reject_status: u16,
    enabled: bool,
}

impl Default for PolicySetBuilder {
    fn default() -> Self {
        Self {
            allowed_countries: Vec::new(),
            blocked_countries: Vec::new(),
            allowed_networks: Vec::new(),
            blocked_networks: Vec::new(),
            allow_private: false,
            default_allow: false,
            reject_status: StatusCode::FORBIDDEN.as_u16(),
            enabled: true,
        }
    }
}

impl PolicySetBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add countries to the allow list.
    pub fn allow_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_countries
            .extend(countries.into_iter().map(Into::into));
        self
    }

    /// Add countries to the block list.
    pub fn block_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_countries
            .extend(countries.into_iter().map(Into::into));
        self
    }

    /// Add CIDR entries to the allowed networks.
    pub fn allow_networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_networks
            .extend(networks.into_iter().map(Into::into));
        self
    }

    /// Add CIDR entries to the blocked networks.
    pub fn block_networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_networks
            .extend(networks.into_iter().map(Into::into));
        self
    }

    /// Set the verdict for private addresses. Default: deny.
    pub fn allow_private(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }

    /// Set the verdict when nothing matches. Default: deny.
    pub fn default_allow(mut self, allow: bool) -> Self {
        self.default_allow = allow;
        self
    }

    /// Set the status code written on denial. Default: 403.
    pub fn reject_status(mut self, status: StatusCode) -> Self {
        self.reject_status = status.as_u16();
        self
    }

    /// Set the status code from a raw number; validated by [`build`](Self::build).
    pub fn reject_status_code(mut self, code: u16) -> Self {
        self.reject_status = code;
        self
    }

    /// Enable or disable gating. Default: enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate and build the policy.
    pub fn build(self) -> Result<PolicySet, ConfigError> {
        let reject_status = parse_status(self.reject_status)?;

        Ok(PolicySet {
            allowed_countries: normalize_countries(self.allowed_countries),
            blocked_countries: normalize_countries(self.blocked_countries),
            allowed_networks: CidrSet::parse(&self.allowed_networks)?,
            blocked_networks: CidrSet::parse(&self.blocked_networks)?,
            allow_private: self.allow_private,
            default_allow: self.default_allow,
            reject_status,
            enabled: self.enabled,
        })
    }

    /// Build the policy wrapped in an Arc for sharing.
    pub fn build_shared(self) -> Result<Arc<PolicySet>, ConfigError> {
        self.build().map(Arc::new)
    }
}

fn normalize_countries(countries: Vec<String>) -> HashSet<String> {
    countries
        .into_iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

fn parse_status(code: u16) -> Result<StatusCode, ConfigError> {
    // StatusCode accepts 100..=999; anything above 599 is not a real status.
    match StatusCode::from_u16(code) {
        Ok(status) if code <= 599 => Ok(status),
        _ => Err(ConfigError::InvalidStatusCode(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = PolicySet::builder().build().unwrap();
        assert!(policy.enabled());
        assert!(!policy.allow_private());
        assert!(!policy.default_allow());
        assert_eq!(policy.reject_status(), StatusCode::FORBIDDEN);
        assert!(policy.allowed_networks().is_empty());
    }

    #[test]
    fn test_countries_are_normalized() {
        let policy = PolicySet::builder()
            .allow_countries(["us", " de ", ""])
            .block_countries(["Cn"])
            .build()
            .unwrap();
        assert_eq!(policy.allowed_countries().len(), 2);
        assert!(policy.is_country_allowed("US"));
        assert!(policy.is_country_allowed("de"));
        assert!(policy.is_country_blocked("CN"));
        assert!(!policy.is_country_blocked("US"));
    }

    #[test]
    fn test_invalid_network_fails_build() {
        let err = PolicySet::builder()
            .block_networks(["8.8.8.0/24", "8.8.8.0/99"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNetwork(..)));
    }

    #[test]
    fn test_invalid_status_fails_build() {
        for code in [0, 42, 600, 999, 1000] {
            let err = PolicySet::builder()
                .reject_status_code(code)
                .build()
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidStatusCode(c) if c == code));
        }
        let policy = PolicySet::builder().reject_status_code(404).build().unwrap();
        assert_eq!(policy.reject_status(), StatusCode::NOT_FOUND);
    }
}
