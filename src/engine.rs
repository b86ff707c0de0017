//! Per-address access decisions.
//!
//! The [`DecisionEngine`] combines a [`PolicySet`] with a [`GeoLookup`] and
//! turns one candidate address into a [`Verdict`].
//!
//! ## Precedence
//!
//! 1. Private addresses are decided by `allow_private` alone.
//! 2. Network rules outrank country rules. Between the allow and block
//!    networks, the longer matching prefix wins; equal prefixes favour allow.
//! 3. Country allow list, then country block list.
//! 4. `default_allow`.

use crate::error::EvalError;
use crate::geo::{GeoLookup, Location};
use crate::policy::PolicySet;
use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// The rule that decided a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The address has no public location; `allow_private` decided.
    PrivateAddress,
    /// An allowed network matched at least as specifically as any blocked one.
    AllowedNetwork,
    /// A blocked network matched more specifically than any allowed one.
    BlockedNetwork,
    /// The country is on the allow list.
    AllowedCountry,
    /// The country is on the block list.
    BlockedCountry,
    /// Nothing matched; `default_allow` decided.
    Default,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrivateAddress => "private address",
            Self::AllowedNetwork => "allowed network",
            Self::BlockedNetwork => "blocked network",
            Self::AllowedCountry => "allowed country",
            Self::BlockedCountry => "blocked country",
            Self::Default => "default policy",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the address may pass.
    pub allowed: bool,
    /// Where the address was located.
    pub location: Location,
    /// Prefix length of the network rule that decided, if one did.
    pub specificity: Option<u8>,
    /// Which rule decided.
    pub reason: Reason,
}

impl Verdict {
    fn new(allowed: bool, location: Location, specificity: Option<u8>, reason: Reason) -> Self {
        Self {
            allowed,
            location,
            specificity,
            reason,
        }
    }
}

/// Evaluates candidate addresses against a policy.
///
/// # Example
/// ```
/// use axum_geoblock::{DecisionEngine, PolicySet, Reason, StaticGeoLookup};
///
/// let lookup = StaticGeoLookup::new()
///     .with("8.8.8.0/24", "US").unwrap();
/// let policy = PolicySet::builder()
///     .block_networks(["8.8.8.0/24"])
///     .allow_networks(["8.8.8.7/32"])
///     .default_allow(true)
///     .build()
///     .unwrap();
/// let engine = DecisionEngine::new(policy, lookup);
///
/// let verdict = engine.evaluate("8.8.8.7").unwrap();
/// assert!(verdict.allowed);
/// assert_eq!(verdict.reason, Reason::AllowedNetwork);
///
/// let verdict = engine.evaluate("8.8.8.9").unwrap();
/// assert!(!verdict.allowed);
/// assert_eq!(verdict.specificity, Some(24));
/// ```
#[derive(Clone)]
pub struct DecisionEngine {
    policy: Arc<PolicySet>,
    lookup: Arc<dyn GeoLookup>,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Create an engine from a policy and a lookup backend.
    pub fn new(policy: impl Into<Arc<PolicySet>>, lookup: impl GeoLookup + 'static) -> Self {
        Self {
            policy: policy.into(),
            lookup: Arc::new(lookup),
        }
    }

    /// Create an engine sharing an existing lookup handle.
    pub fn with_shared_lookup(policy: impl Into<Arc<PolicySet>>, lookup: Arc<dyn GeoLookup>) -> Self {
        Self {
            policy: policy.into(),
            lookup,
        }
    }

    /// The policy this engine applies.
    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    /// Evaluate an address given as text.
    pub fn evaluate(&self, ip: &str) -> Result<Verdict, EvalError> {
        let addr = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| EvalError::invalid_address(ip, e))?;
        self.evaluate_addr(addr)
    }

    /// Evaluate a parsed address.
    pub fn evaluate_addr(&self, ip: IpAddr) -> Result<Verdict, EvalError> {
        let ip = ip.to_canonical();
        let location = self
            .lookup
            .lookup(ip)
            .map_err(|source| EvalError::Lookup { ip, source })?;

        let verdict = self.decide(ip, location);
        tracing::debug!(
            ip = %ip,
            country = %verdict.location,
            reason = %verdict.reason,
            specificity = ?verdict.specificity,
            allowed = verdict.allowed,
            "Geoblock verdict"
        );
        Ok(verdict)
    }

    fn decide(&self, ip: IpAddr, location: Location) -> Verdict {
        let policy = &*self.policy;

        if location.is_private() {
            return Verdict::new(policy.allow_private, location, None, Reason::PrivateAddress);
        }
        let country = location.country_code().unwrap_or_default();
        let country_allowed = policy.is_country_allowed(country);
        let country_blocked = policy.is_country_blocked(country);

        // None orders below every Some, so an unmatched list never wins.
        let allowed = policy.allowed_networks.contains(ip);
        let blocked = policy.blocked_networks.contains(ip);

        match allowed.cmp(&blocked) {
            Ordering::Greater => {
                return Verdict::new(true, location, allowed, Reason::AllowedNetwork);
            }
            Ordering::Less => {
                return Verdict::new(false, location, blocked, Reason::BlockedNetwork);
            }
            Ordering::Equal if allowed.is_some() => {
                return Verdict::new(true, location, allowed, Reason::AllowedNetwork);
            }
            Ordering::Equal => {}
        }

        if country_allowed {
            Verdict::new(true, location, None, Reason::AllowedCountry)
        } else if country_blocked {
            Verdict::new(false, location, None, Reason::BlockedCountry)
        } else {
            Verdict::new(policy.default_allow, location, None, Reason::Default)
        }
    }
}
