//! Asynchronous unusual-login alerts
//!
//! The recorder enqueues an [`UnusualLoginAlert`] on an [`AlertQueue`] and
//! moves on. An [`AlertDispatcher`] running as a tokio task consumes the
//! queue, re-reads the login activity and account, and delivers the notice
//! with its own retry policy. Nothing on this path writes to the login
//! activity log, so a delivery outage can never change a recorded login.

pub mod email;
pub mod notifier;

pub use email::UnusualLoginEmail;
pub use notifier::{ChannelNotifier, Notifier, UnusualLoginNotice};

use crate::config::AlertConfig;
use crate::persistence::{AccountDirectory, LoginActivityStore, PersistenceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Errors that can occur during alert dispatch
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("{channel} rejected the alert with status {status}")]
    Rejected { channel: String, status: u16 },

    #[error("Login activity {0} not found")]
    ActivityNotFound(Uuid),

    #[error("Account {0} not found")]
    AccountNotFound(Uuid),
}

impl AlertError {
    /// Whether delivering again might succeed
    fn is_transient(&self) -> bool {
        matches!(self, AlertError::Http(_) | AlertError::Rejected { .. })
    }
}

/// Queue message: one unusual login awaiting notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusualLoginAlert {
    pub login_activity_id: Uuid,
}

/// Producer side of the alert queue
///
/// Cheap to clone; every clone feeds the same dispatcher.
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<UnusualLoginAlert>,
}

impl AlertQueue {
    /// Create a new alert queue with the given sender
    pub fn new(tx: mpsc::Sender<UnusualLoginAlert>) -> Self {
        AlertQueue { tx }
    }

    /// Create a queue together with the receiver a dispatcher consumes
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UnusualLoginAlert>) {
        let (tx, rx) = mpsc::channel(capacity);
        (AlertQueue::new(tx), rx)
    }

    /// Queue an alert for dispatch (non-blocking)
    ///
    /// Never blocks and never fails: a full or closed queue drops the alert
    /// with a warning.
    pub fn queue_alert(&self, alert: UnusualLoginAlert) {
        if let Err(e) = self.tx.try_send(alert) {
            match e {
                mpsc::error::TrySendError::Full(alert) => {
                    log::warn!(
                        "Alert queue full, dropping alert for login activity {}",
                        alert.login_activity_id
                    );
                }
                mpsc::error::TrySendError::Closed(alert) => {
                    log::warn!(
                        "Alert queue closed, dropping alert for login activity {}",
                        alert.login_activity_id
                    );
                }
            }
        }
    }
}

/// Consumer side of the alert queue
pub struct AlertDispatcher<N> {
    config: AlertConfig,
    store: Arc<dyn LoginActivityStore>,
    accounts: Arc<dyn AccountDirectory>,
    notifier: N,
}

impl<N: Notifier> AlertDispatcher<N> {
    pub fn new(
        config: AlertConfig,
        store: Arc<dyn LoginActivityStore>,
        accounts: Arc<dyn AccountDirectory>,
        notifier: N,
    ) -> Self {
        AlertDispatcher {
            config,
            store,
            accounts,
            notifier,
        }
    }

    /// Run the alert dispatch loop
    ///
    /// Meant to be spawned as a tokio task. Returns once every
    /// [`AlertQueue`] feeding `rx` has been dropped and the queue drained.
    pub async fn run(self, mut rx: mpsc::Receiver<UnusualLoginAlert>) {
        log::info!("Alert dispatcher started");

        while let Some(alert) = rx.recv().await {
            if !self.config.enabled {
                log::debug!(
                    "Alerting disabled, skipping login activity {}",
                    alert.login_activity_id
                );
                continue;
            }

            if let Err(e) = self.dispatch(alert).await {
                log::error!(
                    "Failed to deliver unusual login alert for {}: {}",
                    alert.login_activity_id,
                    e
                );
            }
        }

        log::info!("Alert dispatcher stopped");
    }

    /// Build the notice for one alert and deliver it
    ///
    /// Only the owner email is retried on transient failures. Secondary
    /// channels get a single copy whether or not the email went out.
    pub async fn dispatch(&self, alert: UnusualLoginAlert) -> Result<(), AlertError> {
        let notice = self.build_notice(alert)?;
        let result = self.deliver_with_retry(&notice).await;
        self.notifier.broadcast(&notice).await;
        result
    }

    async fn deliver_with_retry(&self, notice: &UnusualLoginNotice) -> Result<(), AlertError> {
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;

        loop {
            match self.notifier.deliver(notice).await {
                Ok(()) => {
                    log::info!(
                        "Delivered unusual login alert for {} to {}",
                        notice.activity.id,
                        notice.email.to
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    log::warn!(
                        "Alert delivery attempt {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        self.config.max_attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_notice(&self, alert: UnusualLoginAlert) -> Result<UnusualLoginNotice, AlertError> {
        let activity = self
            .store
            .get_login_activity(alert.login_activity_id)?
            .ok_or(AlertError::ActivityNotFound(alert.login_activity_id))?;
        let account = self
            .accounts
            .get_account(activity.user_id)?
            .ok_or(AlertError::AccountNotFound(activity.user_id))?;

        let email = UnusualLoginEmail::render(&account, &activity, &self.config.product_name);
        Ok(UnusualLoginNotice {
            account,
            activity,
            email,
        })
    }
}
