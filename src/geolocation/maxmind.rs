//! Resolver backed by a local MaxMind GeoLite2-City database
//!
//! The database file has to be downloaded separately from MaxMind (free with
//! registration). Lookups are local, so no network timeout applies.

use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use super::{GeoError, GeoResolver, ResolvedLocation};

/// GeoIP lookup using MaxMind GeoLite2-City database
///
/// # Example
///
/// ```ignore
/// use loginwatch::geolocation::{GeoResolver, MaxMindResolver};
///
/// let resolver = MaxMindResolver::new("GeoLite2-City.mmdb")?;
/// let location = resolver.resolve("8.8.8.8");
/// println!("Country: {:?}", location.country);
/// ```
pub struct MaxMindResolver {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindResolver {
    /// Open a GeoLite2-City database file
    ///
    /// # Errors
    ///
    /// Returns an error if the database file cannot be opened or is invalid.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GeoError> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(GeoError::FileNotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        Ok(MaxMindResolver {
            reader: Arc::new(reader),
        })
    }
}

impl GeoResolver for MaxMindResolver {
    fn lookup(&self, ip: IpAddr) -> Result<ResolvedLocation, GeoError> {
        let record: geoip2::City = self.reader.lookup(ip).map_err(|e| match e {
            MaxMindDBError::AddressNotFoundError(_) => GeoError::NotFound,
            other => GeoError::DatabaseOpen(other),
        })?;

        let country = record
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(String::from);
        let city = record
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en").copied())
            .map(String::from);

        let location = ResolvedLocation::new(country, city);
        if location.is_unknown() {
            return Err(GeoError::NoLocation);
        }
        Ok(location)
    }
}

impl Clone for MaxMindResolver {
    fn clone(&self) -> Self {
        MaxMindResolver {
            reader: Arc::clone(&self.reader),
        }
    }
}
