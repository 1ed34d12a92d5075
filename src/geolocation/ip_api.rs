//! Resolver backed by the ip-api.com JSON endpoint
//!
//! The free endpoint needs no API key. Requests are blocking and bounded by
//! the client timeout, so this resolver must not be called from inside an
//! async runtime thread.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use super::{GeoError, GeoResolver, ResolvedLocation};

pub const DEFAULT_IP_API_URL: &str = "http://ip-api.com/json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
}

/// HTTP geolocation against ip-api.com (or a compatible endpoint)
pub struct IpApiResolver {
    client: Client,
    base_url: String,
}

impl IpApiResolver {
    /// Create a resolver whose requests give up after `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(IpApiResolver {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, ip: IpAddr) -> String {
        format!(
            "{}/{}?fields=status,message,countryCode,city",
            self.base_url, ip
        )
    }
}

impl GeoResolver for IpApiResolver {
    fn lookup(&self, ip: IpAddr) -> Result<ResolvedLocation, GeoError> {
        let response: IpApiResponse = self
            .client
            .get(self.lookup_url(ip))
            .send()?
            .error_for_status()?
            .json()?;

        if response.status != "success" {
            return Err(GeoError::LookupFailed(
                response.message.unwrap_or_else(|| response.status.clone()),
            ));
        }

        let location = ResolvedLocation::new(response.country_code, response.city);
        if location.is_unknown() {
            return Err(GeoError::NoLocation);
        }
        Ok(location)
    }
}
