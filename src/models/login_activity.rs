use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted login, immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginActivity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub country: Option<String>,
    pub city: Option<String>,
    /// Computed once before insert, never revised
    pub unusual: bool,
    pub created_at: DateTime<Utc>,
}

impl LoginActivity {
    /// Human-readable location, e.g. "Toronto, CA"
    pub fn display_location(&self) -> String {
        match (self.city.as_deref(), self.country.as_deref()) {
            (Some(city), Some(country)) => format!("{}, {}", city, country),
            (None, Some(country)) => country.to_string(),
            (Some(city), None) => city.to_string(),
            (None, None) => "Unknown location".to_string(),
        }
    }
}

/// A login activity about to be inserted
///
/// The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoginActivity {
    pub user_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub unusual: bool,
}
