use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A successful authentication, as handed to the recorder
///
/// `country` and `city` are optional pre-resolved values from a trusted
/// upstream (e.g. edge-network geolocation headers). When present they take
/// precedence over the configured resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEvent {
    pub user_id: Uuid,
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl LoginEvent {
    pub fn new(user_id: Uuid, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        LoginEvent {
            user_id,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            country: None,
            city: None,
        }
    }

    /// Attach an upstream-supplied location
    pub fn with_location(mut self, country: Option<&str>, city: Option<&str>) -> Self {
        self.country = country.map(String::from);
        self.city = city.map(String::from);
        self
    }
}
