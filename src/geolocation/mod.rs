//! IP geolocation for login events
//!
//! Every resolver implements [`GeoResolver::lookup`], which may fail. Callers
//! use [`GeoResolver::resolve`] instead, which never fails: loopback and
//! private addresses are answered without a lookup, and any lookup error is
//! logged and downgraded to an unknown location. An unknown location can
//! only suppress an unusual-login flag, never cause one.

pub mod cache;
pub mod ip_api;
pub mod maxmind;

pub use cache::CachedResolver;
pub use ip_api::IpApiResolver;
pub use maxmind::MaxMindResolver;

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{GeoProvider, GeolocationConfig};

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Failed to open database: {0}")]
    DatabaseOpen(#[from] maxminddb::MaxMindDBError),

    #[error("Database file not found: {0}")]
    FileNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lookup refused: {0}")]
    LookupFailed(String),

    #[error("IP address not found")]
    NotFound,

    #[error("Location data missing for IP address")]
    NoLocation,
}

/// Approximate location of an IP address
///
/// `country` is an ISO 3166-1 alpha-2 code. Both fields are `None` when the
/// address was not geolocated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl ResolvedLocation {
    /// Build a location, treating blank strings as absent
    pub fn new(country: Option<String>, city: Option<String>) -> Self {
        ResolvedLocation {
            country: non_blank(country),
            city: non_blank(city),
        }
    }

    pub fn unknown() -> Self {
        ResolvedLocation::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.country.is_none() && self.city.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Maps an IP address to an approximate country and city
pub trait GeoResolver: Send + Sync {
    /// Look up a routable address
    ///
    /// Implementations should bound any network I/O by a short timeout.
    fn lookup(&self, ip: IpAddr) -> Result<ResolvedLocation, GeoError>;

    /// Resolve an address as observed on the wire, never failing
    fn resolve(&self, ip_address: &str) -> ResolvedLocation {
        let ip = match ip_address.trim().parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                log::debug!("Skipping geolocation for unparseable address {:?}", ip_address);
                return ResolvedLocation::unknown();
            }
        };

        if is_non_routable(&ip) {
            log::debug!("Skipping geolocation for non-routable address {}", ip);
            return ResolvedLocation::unknown();
        }

        match self.lookup(ip) {
            Ok(location) => location,
            Err(e) => {
                log::warn!("Failed to geolocate IP {}: {}", ip, e);
                ResolvedLocation::unknown()
            }
        }
    }
}

/// Resolver used when geolocation is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl GeoResolver for NoopResolver {
    fn lookup(&self, _ip: IpAddr) -> Result<ResolvedLocation, GeoError> {
        Ok(ResolvedLocation::unknown())
    }
}

/// Build the resolver selected by the configuration
///
/// Network and database resolvers are wrapped in a [`CachedResolver`] unless
/// the cache TTL is zero.
pub fn build_resolver(config: &GeolocationConfig) -> Result<Arc<dyn GeoResolver>, GeoError> {
    match config.provider {
        GeoProvider::None => Ok(Arc::new(NoopResolver)),
        GeoProvider::IpApi => {
            let resolver = IpApiResolver::new(&config.ip_api_url, config.timeout())?;
            Ok(with_cache(resolver, config.cache_ttl()))
        }
        GeoProvider::Maxmind => {
            let path = config.maxmind_db_path.as_ref().ok_or_else(|| {
                GeoError::FileNotFound("geolocation.maxmind_db_path is not set".to_string())
            })?;
            let resolver = MaxMindResolver::new(path)?;
            Ok(with_cache(resolver, config.cache_ttl()))
        }
    }
}

fn with_cache<R: GeoResolver + 'static>(resolver: R, ttl: Duration) -> Arc<dyn GeoResolver> {
    if ttl.is_zero() {
        Arc::new(resolver)
    } else {
        Arc::new(CachedResolver::new(resolver, ttl))
    }
}

/// Loopback, private, link-local and unspecified addresses
///
/// None of these can be geolocated, so they are never sent to a resolver.
pub fn is_non_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_non_routable(&IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (first & 0xffc0) == 0xfe80
        }
    }
}
