//! Unusual-login email sent to the account owner

use serde::{Deserialize, Serialize};

use crate::models::{Account, LoginActivity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusualLoginEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl UnusualLoginEmail {
    pub fn render(account: &Account, activity: &LoginActivity, product_name: &str) -> Self {
        let subject = format!("Unusual login to your {} account", product_name);

        let body = format!(
            "Hi {name},\n\
             \n\
             We noticed a sign-in to your {product} account from a location you don't usually \
             sign in from.\n\
             \n\
             Location: {location}\n\
             IP address: {ip}\n\
             Time: {time}\n\
             Device: {device}\n\
             \n\
             If this was you, no action is needed. If you don't recognize this activity, change \
             your password right away and review your security settings.\n",
            name = account.display_name(),
            product = product_name,
            location = activity.display_location(),
            ip = activity.ip_address,
            time = activity.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            device = if activity.user_agent.is_empty() {
                "Unknown device"
            } else {
                activity.user_agent.as_str()
            },
        );

        UnusualLoginEmail {
            to: account.email.clone(),
            subject,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_render() {
        let account = Account::new("alice@example.com").with_name("Alice", "Smith");
        let activity = LoginActivity {
            id: Uuid::new_v4(),
            user_id: account.id,
            ip_address: "203.0.113.1".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            country: Some("CA".to_string()),
            city: Some("Toronto".to_string()),
            unusual: true,
            created_at: Utc.with_ymd_and_hms(2026, 1, 21, 9, 30, 0).unwrap(),
        };

        let email = UnusualLoginEmail::render(&account, &activity, "Loginwatch");

        assert_eq!(email.to, "alice@example.com");
        assert!(email.subject.contains("Unusual login"));
        assert!(email.body.contains("Hi Alice,"));
        assert!(email.body.contains("Toronto, CA"));
        assert!(email.body.contains("203.0.113.1"));
        assert!(email.body.contains("2026-01-21 09:30:00 UTC"));
        assert!(email.body.contains("Mozilla/5.0"));
    }
}
