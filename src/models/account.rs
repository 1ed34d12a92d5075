use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The account a login belongs to
///
/// Only the fields the alert email needs are kept here; the account itself
/// is owned by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Account {
    pub fn new(email: impl Into<String>) -> Self {
        Account {
            id: Uuid::new_v4(),
            email: email.into(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn with_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }

    /// Name used to greet the user, falling back to the email address
    pub fn display_name(&self) -> &str {
        match self.first_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &self.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_first_name() {
        let account = Account::new("bob@example.com").with_name("Bob", "Dylan");
        assert_eq!(account.display_name(), "Bob");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut account = Account::new("bob@example.com");
        assert_eq!(account.display_name(), "bob@example.com");

        account.first_name = Some("   ".to_string());
        assert_eq!(account.display_name(), "bob@example.com");
    }
}
