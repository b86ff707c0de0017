//! Geolocation lookup.
//!
//! The decision engine only needs one thing from a geolocation backend: the
//! country an address belongs to, or the fact that the address has no public
//! location at all. [`GeoLookup`] is that seam.
//!
//! Two implementations ship with the crate:
//! - [`MaxMindLookup`]: a MaxMind / GeoLite2 country database read into memory
//! - [`StaticGeoLookup`]: an in-memory CIDR to country table
//!
//! ## Custom Backends
//!
//! ```
//! use axum_geoblock::{GeoLookup, Location, LookupError};
//! use std::net::IpAddr;
//!
//! /// Everything is German.
//! struct Germany;
//!
//! impl GeoLookup for Germany {
//!     fn lookup(&self, _ip: IpAddr) -> Result<Location, LookupError> {
//!         Ok(Location::country("DE"))
//!     }
//! }
//! ```

use crate::config::ConfigError;
use crate::error::LookupError;
use ipnetwork::IpNetwork;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

/// Sentinel code for addresses without a public location.
pub const PRIVATE_SENTINEL: &str = "-";

/// Where an address is located.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A two-letter ISO 3166-1 country code.
    Country(String),
    /// Private, reserved or otherwise unroutable address.
    Private,
}

impl Location {
    /// Create a country location.
    pub fn country(code: impl Into<String>) -> Self {
        Self::Country(code.into())
    }

    /// Interpret a raw country code returned by a string-based backend.
    ///
    /// `-` and the empty string mean the address has no public location.
    /// Codes starting with `invalid` (any case) are error messages in
    /// disguise and become [`LookupError::Rejected`].
    ///
    /// ```
    /// use axum_geoblock::{Location, LookupError};
    ///
    /// assert_eq!(Location::from_code("US"), Ok(Location::country("US")));
    /// assert_eq!(Location::from_code("-"), Ok(Location::Private));
    /// assert!(matches!(
    ///     Location::from_code("Invalid IP address."),
    ///     Err(LookupError::Rejected(_))
    /// ));
    /// ```
    pub fn from_code(code: &str) -> Result<Self, LookupError> {
        let code = code.trim();
        if code.is_empty() || code == PRIVATE_SENTINEL {
            return Ok(Self::Private);
        }
        if code
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("invalid"))
        {
            return Err(LookupError::Rejected(code.to_string()));
        }
        Ok(Self::Country(code.to_string()))
    }

    /// The country code, if the address has one.
    pub fn country_code(&self) -> Option<&str> {
        match self {
            Self::Country(code) => Some(code),
            Self::Private => None,
        }
    }

    /// Whether this is the private sentinel.
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Country(code) => f.write_str(code),
            Self::Private => f.write_str(PRIVATE_SENTINEL),
        }
    }
}

/// Trait for geolocation backends.
///
/// Implementations are shared by every concurrent request, so they must be
/// safe to call from many threads at once. The trait is synchronous because
/// lookups are expected to hit local memory.
pub trait GeoLookup: Send + Sync {
    /// Locate an address.
    fn lookup(&self, ip: IpAddr) -> Result<Location, LookupError>;
}

// Implement for Arc<T> where T: GeoLookup
impl<T: GeoLookup + ?Sized> GeoLookup for Arc<T> {
    fn lookup(&self, ip: IpAddr) -> Result<Location, LookupError> {
        (**self).lookup(ip)
    }
}

// Implement for Box<T> where T: GeoLookup
impl<T: GeoLookup + ?Sized> GeoLookup for Box<T> {
    fn lookup(&self, ip: IpAddr) -> Result<Location, LookupError> {
        (**self).lookup(ip)
    }
}

/// Whether an address belongs to a range with no public geolocation.
///
/// Covers private, loopback, link-local, shared (CGNAT), unspecified,
/// broadcast and documentation ranges for IPv4, and loopback, unspecified,
/// unique local, link-local and documentation ranges for IPv6.
pub fn is_private_address(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 0x40)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7
        || (first & 0xfe00) == 0xfc00
        // fe80::/10
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// Lookup backed by a MaxMind DB (GeoIP2 / GeoLite2 Country or City).
///
/// The whole database is read into memory when opened; lookups never touch
/// the disk and need no locking.
///
/// ```no_run
/// use axum_geoblock::{GeoLookup, MaxMindLookup};
///
/// let db = MaxMindLookup::open("/var/lib/geoip/GeoLite2-Country.mmdb").unwrap();
/// let location = db.lookup("1.1.1.1".parse().unwrap()).unwrap();
/// println!("{location}");
/// ```
pub struct MaxMindLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLookup {
    /// Open a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::DatabaseNotFound(path.display().to_string()));
        }
        let reader = Reader::open_readfile(path)
            .map_err(|e| ConfigError::Database(path.display().to_string(), e.to_string()))?;
        tracing::debug!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "Opened geolocation database"
        );
        Ok(Self { reader })
    }

    /// Load a database from bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ConfigError> {
        let reader = Reader::from_source(data)
            .map_err(|e| ConfigError::Database("<memory>".to_string(), e.to_string()))?;
        Ok(Self { reader })
    }
}

impl fmt::Debug for MaxMindLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxMindLookup")
            .field("database_type", &self.reader.metadata.database_type)
            .field("build_epoch", &self.reader.metadata.build_epoch)
            .finish()
    }
}

impl GeoLookup for MaxMindLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Location, LookupError> {
        if is_private_address(ip) {
            return Ok(Location::Private);
        }

        let result: Result<geoip2::Country, _> = self.reader.lookup(ip);
        match result {
            Ok(record) => {
                // Fall back to the registered country for anonymous proxies
                // and satellite providers, which carry no `country`.
                let code = record
                    .country
                    .and_then(|c| c.iso_code)
                    .or_else(|| record.registered_country.and_then(|c| c.iso_code));
                Location::from_code(code.unwrap_or(PRIVATE_SENTINEL))
            }
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(Location::Private),
            Err(e) => Err(LookupError::Backend(e.to_string())),
        }
    }
}

/// In-memory lookup table mapping networks to country codes.
///
/// The most specific network containing an address decides its country.
/// Addresses in private ranges and addresses not covered by any entry are
/// reported as [`Location::Private`], like a real database would.
///
/// ```
/// use axum_geoblock::{GeoLookup, Location, StaticGeoLookup};
///
/// let lookup = StaticGeoLookup::new()
///     .with("1.1.1.0/24", "US").unwrap()
///     .with("185.5.82.0/24", "DE").unwrap();
///
/// assert_eq!(lookup.lookup("1.1.1.1".parse().unwrap()), Ok(Location::country("US")));
/// assert_eq!(lookup.lookup("192.168.1.1".parse().unwrap()), Ok(Location::Private));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticGeoLookup {
    entries: Vec<(IpNetwork, String)>,
}

impl StaticGeoLookup {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network with its country code.
    pub fn with(mut self, network: &str, code: impl Into<String>) -> Result<Self, ConfigError> {
        let parsed = network
            .trim()
            .parse::<IpNetwork>()
            .map_err(|e| ConfigError::InvalidNetwork(network.to_string(), e.to_string()))?;
        self.entries.push((parsed, code.into()));
        Ok(self)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GeoLookup for StaticGeoLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Location, LookupError> {
        if is_private_address(ip) {
            return Ok(Location::Private);
        }
        let ip = ip.to_canonical();
        let code = self
            .entries
            .iter()
            .filter(|(network, _)| network.contains(ip))
            .max_by_key(|(network, _)| network.prefix())
            .map(|(_, code)| code.as_str());
        Location::from_code(code.unwrap_or(PRIVATE_SENTINEL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Location::from_code("DE"), Ok(Location::country("DE")));
        assert_eq!(Location::from_code(" US "), Ok(Location::country("US")));
        assert_eq!(Location::from_code("-"), Ok(Location::Private));
        assert_eq!(Location::from_code(""), Ok(Location::Private));
        assert_eq!(
            Location::from_code("INVALID DATABASE FILE."),
            Err(LookupError::Rejected("INVALID DATABASE FILE.".into()))
        );
        // Short codes never look like errors
        assert_eq!(Location::from_code("IN"), Ok(Location::country("IN")));
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::country("US").to_string(), "US");
        assert_eq!(Location::Private.to_string(), "-");
        assert_eq!(Location::country("US").country_code(), Some("US"));
        assert_eq!(Location::Private.country_code(), None);
    }

    #[test]
    fn test_private_ranges() {
        for addr in [
            "10.1.2.3",
            "172.16.0.1",
            "192.168.178.66",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "0.0.0.0",
            "255.255.255.255",
            "::1",
            "::",
            "fd00::1",
            "fe80::1",
            "::ffff:192.168.1.1",
        ] {
            assert!(is_private_address(ip(addr)), "{addr} should be private");
        }
        for addr in ["1.1.1.1", "8.8.8.8", "100.128.0.1", "2606:4700::1111"] {
            assert!(!is_private_address(ip(addr)), "{addr} should be public");
        }
    }

    #[test]
    fn test_static_lookup_most_specific() {
        let lookup = StaticGeoLookup::new()
            .with("8.0.0.0/8", "US")
            .unwrap()
            .with("8.8.4.0/24", "CA")
            .unwrap();
        assert_eq!(lookup.lookup(ip("8.8.4.4")), Ok(Location::country("CA")));
        assert_eq!(lookup.lookup(ip("8.8.8.8")), Ok(Location::country("US")));
        assert_eq!(lookup.lookup(ip("9.9.9.9")), Ok(Location::Private));
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn test_static_lookup_error_code() {
        let lookup = StaticGeoLookup::new().with("1.0.0.0/8", "invalid record").unwrap();
        assert!(matches!(
            lookup.lookup(ip("1.1.1.1")),
            Err(LookupError::Rejected(_))
        ));
    }

    #[test]
    fn test_static_lookup_rejects_bad_network() {
        assert!(StaticGeoLookup::new().with("1.1.1.1/40", "US").is_err());
    }

    #[test]
    fn test_maxmind_missing_file() {
        let err = MaxMindLookup::open("/nonexistent/GeoLite2-Country.mmdb").unwrap_err();
        assert!(matches!(err, ConfigError::DatabaseNotFound(_)));
    }

    /// Writers for the MaxMind DB data section encoding.
    mod mmdb {
        fn control(out: &mut Vec<u8>, kind: u8, size: usize) {
            assert!(size < 29);
            if kind <= 7 {
                out.push((kind << 5) | size as u8);
            } else {
                out.push(size as u8);
                out.push(kind - 7);
            }
        }

        pub fn string(out: &mut Vec<u8>, value: &str) {
            control(out, 2, value.len());
            out.extend_from_slice(value.as_bytes());
        }

        pub fn uint16(out: &mut Vec<u8>, value: u16) {
            control(out, 5, 2);
            out.extend_from_slice(&value.to_be_bytes());
        }

        pub fn uint32(out: &mut Vec<u8>, value: u32) {
            control(out, 6, 4);
            out.extend_from_slice(&value.to_be_bytes());
        }

        pub fn uint64(out: &mut Vec<u8>, value: u64) {
            control(out, 9, 8);
            out.extend_from_slice(&value.to_be_bytes());
        }

        pub fn map(out: &mut Vec<u8>, entries: usize) {
            control(out, 7, entries);
        }

        pub fn array(out: &mut Vec<u8>, items: usize) {
            control(out, 11, items);
        }
    }

    /// A four node IPv4 country database with 24-bit records:
    /// - `80.0.0.0/4` has `country.iso_code = GB`
    /// - `0.0.0.0/2` has only `registered_country.iso_code = IT`
    /// - everything else is absent
    fn country_database() -> Vec<u8> {
        const NODE_COUNT: u32 = 4;
        const EMPTY: u32 = NODE_COUNT;

        let mut data = Vec::new();
        mmdb::map(&mut data, 1);
        mmdb::string(&mut data, "country");
        mmdb::map(&mut data, 1);
        mmdb::string(&mut data, "iso_code");
        mmdb::string(&mut data, "GB");

        let registered_only = data.len() as u32;
        mmdb::map(&mut data, 1);
        mmdb::string(&mut data, "registered_country");
        mmdb::map(&mut data, 1);
        mmdb::string(&mut data, "iso_code");
        mmdb::string(&mut data, "IT");

        let record = |offset: u32| NODE_COUNT + 16 + offset;
        let nodes = [
            [1, EMPTY],
            [record(registered_only), 2],
            [3, EMPTY],
            [EMPTY, record(0)],
        ];

        let mut db = Vec::new();
        for node in nodes {
            for pointer in node {
                db.extend_from_slice(&pointer.to_be_bytes()[1..]);
            }
        }
        db.extend_from_slice(&[0u8; 16]);
        db.extend_from_slice(&data);

        db.extend_from_slice(b"\xab\xcd\xefMaxMind.com");
        mmdb::map(&mut db, 9);
        mmdb::string(&mut db, "binary_format_major_version");
        mmdb::uint16(&mut db, 2);
        mmdb::string(&mut db, "binary_format_minor_version");
        mmdb::uint16(&mut db, 0);
        mmdb::string(&mut db, "build_epoch");
        mmdb::uint64(&mut db, 1_700_000_000);
        mmdb::string(&mut db, "database_type");
        mmdb::string(&mut db, "GeoIP2-Country");
        mmdb::string(&mut db, "description");
        mmdb::map(&mut db, 0);
        mmdb::string(&mut db, "ip_version");
        mmdb::uint16(&mut db, 4);
        mmdb::string(&mut db, "languages");
        mmdb::array(&mut db, 1);
        mmdb::string(&mut db, "en");
        mmdb::string(&mut db, "node_count");
        mmdb::uint32(&mut db, NODE_COUNT);
        mmdb::string(&mut db, "record_size");
        mmdb::uint16(&mut db, 24);
        db
    }

    #[test]
    fn test_maxmind_lookup() {
        let db = MaxMindLookup::from_bytes(country_database()).unwrap();

        assert_eq!(db.lookup(ip("81.2.69.160")), Ok(Location::country("GB")));
        // No `country`, only `registered_country`
        assert_eq!(db.lookup(ip("2.125.160.216")), Ok(Location::country("IT")));
        // Not in the database
        assert_eq!(db.lookup(ip("64.1.2.3")), Ok(Location::Private));
        assert_eq!(db.lookup(ip("200.1.2.3")), Ok(Location::Private));
        // Private ranges never reach the reader
        assert_eq!(db.lookup(ip("10.0.0.1")), Ok(Location::Private));
    }

    #[test]
    fn test_maxmind_open_file() {
        let path = std::env::temp_dir().join(format!(
            "axum-geoblock-test-{}.mmdb",
            std::process::id()
        ));
        std::fs::write(&path, country_database()).unwrap();

        let db = MaxMindLookup::open(&path).unwrap();
        assert_eq!(db.lookup(ip("81.2.69.160")), Ok(Location::country("GB")));
        assert!(format!("{db:?}").contains("GeoIP2-Country"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_maxmind_garbage_bytes() {
        let err = MaxMindLookup::from_bytes(b"definitely not a database".to_vec()).unwrap_err();
        assert!(matches!(err, ConfigError::Database(..)));
    }

    #[test]
    fn test_lookup_through_arc() {
        let lookup: Arc<dyn GeoLookup> =
            Arc::new(StaticGeoLookup::new().with("1.1.1.0/24", "US").unwrap());
        assert_eq!(lookup.lookup(ip("1.1.1.1")), Ok(Location::country("US")));
    }
}
