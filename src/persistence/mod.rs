//! Persistence for the login activity log
//!
//! The log is append-only: rows are inserted once and never updated. The
//! only deletion path is removing a whole account, which cascades to its
//! activities.

pub mod sqlite_store;

pub use sqlite_store::SqliteLoginStore;

use crate::models::{Account, LoginActivity, NewLoginActivity};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),
}

/// Storage for login activities
///
/// Implementations must order a user's activities strictly by creation, so
/// that "earliest" and "most recent" are well defined.
pub trait LoginActivityStore: Send + Sync {
    /// Insert a new activity atomically, assigning its id and creation time
    fn insert_login_activity(
        &self,
        activity: &NewLoginActivity,
    ) -> Result<LoginActivity, PersistenceError>;

    /// Fetch a single activity by id
    fn get_login_activity(&self, id: Uuid) -> Result<Option<LoginActivity>, PersistenceError>;

    /// Number of activities recorded for a user
    fn count_for_user(&self, user_id: Uuid) -> Result<usize, PersistenceError>;

    /// Country of each of the user's first `limit` activities, oldest first
    ///
    /// `None` marks an activity whose location was unknown.
    fn earliest_countries(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Option<String>>, PersistenceError>;

    /// The user's `limit` most recent activities, newest first
    fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LoginActivity>, PersistenceError>;

    /// All activities flagged unusual for a user, newest first
    fn unusual_for_user(&self, user_id: Uuid) -> Result<Vec<LoginActivity>, PersistenceError>;
}

/// Lookup of the accounts login activities belong to
pub trait AccountDirectory: Send + Sync {
    /// Insert an account or update its contact details
    fn upsert_account(&self, account: &Account) -> Result<(), PersistenceError>;

    fn get_account(&self, id: Uuid) -> Result<Option<Account>, PersistenceError>;

    /// Remove an account together with all of its login activities
    ///
    /// Returns false if the account did not exist.
    fn remove_account(&self, id: Uuid) -> Result<bool, PersistenceError>;
}
