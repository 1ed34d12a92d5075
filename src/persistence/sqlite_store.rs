//! SQLite implementation of the login activity store

use super::{AccountDirectory, LoginActivityStore, PersistenceError};
use crate::models::{Account, LoginActivity, NewLoginActivity};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// How long a write waits for another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ACTIVITY_COLUMNS: &str =
    "id, user_id, ip_address, user_agent, country, city, unusual, created_at";

/// SQLite-backed login activity log and account directory
pub struct SqliteLoginStore {
    conn: Mutex<Connection>,
}

/// Column values of a `login_activities` row before validation
struct StoredActivity {
    id: String,
    user_id: String,
    ip_address: String,
    user_agent: String,
    country: Option<String>,
    city: Option<String>,
    unusual: bool,
    created_at: i64,
}

impl StoredActivity {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredActivity {
            id: row.get(0)?,
            user_id: row.get(1)?,
            ip_address: row.get(2)?,
            user_agent: row.get(3)?,
            country: row.get(4)?,
            city: row.get(5)?,
            unusual: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_activity(self) -> Result<LoginActivity, PersistenceError> {
        Ok(LoginActivity {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            country: self.country,
            city: self.city,
            unusual: self.unusual,
            created_at: from_micros(self.created_at)?,
        })
    }
}

impl SqliteLoginStore {
    /// Open (or create) a store at the specified path
    ///
    /// Creates parent directories and the schema if they don't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // Other processes (the CLI next to the daemon) may hold the write lock
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(SqliteLoginStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_activities(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<LoginActivity>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, StoredActivity::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(StoredActivity::into_activity).collect()
    }
}

impl LoginActivityStore for SqliteLoginStore {
    fn insert_login_activity(
        &self,
        activity: &NewLoginActivity,
    ) -> Result<LoginActivity, PersistenceError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let user_id = activity.user_id.to_string();

        // Creation time must strictly increase per user, even if the clock
        // stalls or steps backwards
        let last: Option<i64> = tx.query_row(
            "SELECT MAX(created_at) FROM login_activities WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        let now = Utc::now().timestamp_micros();
        let created_at = match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        let id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO login_activities
             (id, user_id, ip_address, user_agent, country, city, unusual, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id.to_string(),
                user_id,
                activity.ip_address,
                activity.user_agent,
                activity.country,
                activity.city,
                activity.unusual,
                created_at
            ],
        )?;
        tx.commit()?;

        Ok(LoginActivity {
            id,
            user_id: activity.user_id,
            ip_address: activity.ip_address.clone(),
            user_agent: activity.user_agent.clone(),
            country: activity.country.clone(),
            city: activity.city.clone(),
            unusual: activity.unusual,
            created_at: from_micros(created_at)?,
        })
    }

    fn get_login_activity(&self, id: Uuid) -> Result<Option<LoginActivity>, PersistenceError> {
        let stored = {
            let conn = self.conn();
            conn.query_row(
                &format!("SELECT {} FROM login_activities WHERE id = ?", ACTIVITY_COLUMNS),
                params![id.to_string()],
                StoredActivity::from_row,
            )
            .optional()?
        };

        stored.map(StoredActivity::into_activity).transpose()
    }

    fn count_for_user(&self, user_id: Uuid) -> Result<usize, PersistenceError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM login_activities WHERE user_id = ?",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn earliest_countries(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Option<String>>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT country FROM login_activities
             WHERE user_id = ?
             ORDER BY created_at ASC, seq ASC
             LIMIT ?",
        )?;

        let countries = stmt
            .query_map(params![user_id.to_string(), limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<Option<String>>, _>>()?;

        Ok(countries)
    }

    fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LoginActivity>, PersistenceError> {
        self.query_activities(
            &format!(
                "SELECT {} FROM login_activities
                 WHERE user_id = ?
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?",
                ACTIVITY_COLUMNS
            ),
            params![user_id.to_string(), limit as i64],
        )
    }

    fn unusual_for_user(&self, user_id: Uuid) -> Result<Vec<LoginActivity>, PersistenceError> {
        self.query_activities(
            &format!(
                "SELECT {} FROM login_activities
                 WHERE user_id = ? AND unusual = 1
                 ORDER BY created_at DESC, seq DESC",
                ACTIVITY_COLUMNS
            ),
            params![user_id.to_string()],
        )
    }
}

impl AccountDirectory for SqliteLoginStore {
    fn upsert_account(&self, account: &Account) -> Result<(), PersistenceError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO accounts (id, email, first_name, last_name) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                first_name = excluded.first_name,
                last_name = excluded.last_name",
            params![
                account.id.to_string(),
                account.email,
                account.first_name,
                account.last_name
            ],
        )?;
        Ok(())
    }

    fn get_account(&self, id: Uuid) -> Result<Option<Account>, PersistenceError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, email, first_name, last_name FROM accounts WHERE id = ?",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, email, first_name, last_name)) => Ok(Some(Account {
                id: parse_uuid(&id)?,
                email,
                first_name,
                last_name,
            })),
            None => Ok(None),
        }
    }

    fn remove_account(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM accounts WHERE id = ?", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(value)
        .map_err(|_| PersistenceError::InvalidData(format!("Invalid UUID: {}", value)))
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, PersistenceError> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| PersistenceError::InvalidData(format!("Invalid timestamp: {}", micros)))
}
