//! Delivery channels for unusual-login notices
//!
//! The owner is emailed through an HTTP mail relay, which is the only channel
//! retried on failure. A copy can go to a Slack security channel and to any
//! number of generic JSON webhooks; those are sent once per alert.

use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use super::{AlertError, UnusualLoginEmail};
use crate::config::{AlertConfig, EmailRelayConfig, SlackConfig, WebhookConfig};
use crate::models::{Account, LoginActivity};

/// Everything a channel needs to describe one unusual login
#[derive(Debug, Clone)]
pub struct UnusualLoginNotice {
    pub account: Account,
    pub activity: LoginActivity,
    pub email: UnusualLoginEmail,
}

/// Delivers a notice to the account owner and any secondary channels
pub trait Notifier: Send + Sync {
    /// Send the email to the account owner
    ///
    /// The dispatcher calls this again after a transient failure, so it must
    /// only touch the owner-facing channel.
    fn deliver(
        &self,
        notice: &UnusualLoginNotice,
    ) -> impl Future<Output = Result<(), AlertError>> + Send;

    /// Copy the notice to secondary channels, once and best-effort
    fn broadcast(&self, _notice: &UnusualLoginNotice) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    account_email: &'a str,
    login_activity: &'a LoginActivity,
}

/// Sends notices to every channel configured in [`AlertConfig`]
pub struct ChannelNotifier {
    email_relay: Option<EmailRelayConfig>,
    slack: Option<SlackConfig>,
    webhooks: Vec<WebhookConfig>,
    client: Client,
}

impl ChannelNotifier {
    pub fn new(config: &AlertConfig) -> Self {
        ChannelNotifier {
            email_relay: config.email_relay.clone(),
            slack: config.slack.clone(),
            webhooks: config.webhooks.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Whether any channel is configured at all
    pub fn has_channels(&self) -> bool {
        self.email_relay.is_some() || self.slack.is_some() || !self.webhooks.is_empty()
    }

    async fn send_email(
        &self,
        config: &EmailRelayConfig,
        notice: &UnusualLoginNotice,
    ) -> Result<(), AlertError> {
        let message = RelayMessage {
            from: &config.from,
            to: &notice.email.to,
            subject: &notice.email.subject,
            text: &notice.email.body,
        };

        let mut request = self.client.post(&config.url);
        if let Some(ref headers) = config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(&message).send().await?;
        check_status("email relay", response.status())
    }

    async fn send_slack_alert(
        &self,
        config: &SlackConfig,
        notice: &UnusualLoginNotice,
    ) -> Result<(), AlertError> {
        let activity = &notice.activity;
        let payload = serde_json::json!({
            "channel": config.channel,
            "username": config.username.as_deref().unwrap_or("Loginwatch"),
            "icon_emoji": ":shield:",
            "attachments": [{
                "color": "warning",
                "title": ":warning: Unusual login",
                "fields": [
                    { "title": "User", "value": &notice.account.email, "short": true },
                    { "title": "Location", "value": activity.display_location(), "short": true },
                    { "title": "IP", "value": &activity.ip_address, "short": true },
                    { "title": "User agent", "value": &activity.user_agent, "short": false },
                ],
                "text": format!("Login activity {}", activity.id),
                "ts": activity.created_at.timestamp(),
            }]
        });

        let response = self
            .client
            .post(&config.webhook_url)
            .json(&payload)
            .send()
            .await?;

        check_status("slack", response.status())
    }

    async fn send_generic_webhook(
        &self,
        config: &WebhookConfig,
        notice: &UnusualLoginNotice,
    ) -> Result<(), AlertError> {
        let method = config.method.as_deref().unwrap_or("POST");

        let mut request = match method.to_uppercase().as_str() {
            "PUT" => self.client.put(&config.url),
            _ => self.client.post(&config.url),
        };

        if let Some(ref headers) = config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let payload = WebhookPayload {
            event: "unusual_login",
            account_email: &notice.account.email,
            login_activity: &notice.activity,
        };

        let response = request.json(&payload).send().await?;
        check_status(&config.name, response.status())
    }
}

impl Notifier for ChannelNotifier {
    async fn deliver(&self, notice: &UnusualLoginNotice) -> Result<(), AlertError> {
        match self.email_relay {
            Some(ref relay) => self.send_email(relay, notice).await,
            None => {
                log::warn!(
                    "No email relay configured, {} is not emailed about login activity {}",
                    notice.email.to,
                    notice.activity.id
                );
                Ok(())
            }
        }
    }

    async fn broadcast(&self, notice: &UnusualLoginNotice) {
        if let Some(ref slack) = self.slack {
            if let Err(e) = self.send_slack_alert(slack, notice).await {
                log::warn!("Slack alert failed: {}", e);
            }
        }

        for webhook in &self.webhooks {
            if let Err(e) = self.send_generic_webhook(webhook, notice).await {
                log::warn!("Webhook {} failed: {}", webhook.name, e);
            }
        }
    }
}

fn check_status(channel: &str, status: reqwest::StatusCode) -> Result<(), AlertError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AlertError::Rejected {
            channel: channel.to_string(),
            status: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_channels() {
        let mut config = AlertConfig::default();
        assert!(!ChannelNotifier::new(&config).has_channels());

        config.webhooks.push(WebhookConfig {
            name: "siem".to_string(),
            url: "http://127.0.0.1:9/hook".to_string(),
            method: Some("PUT".to_string()),
            headers: None,
        });
        assert!(ChannelNotifier::new(&config).has_channels());
    }

    #[test]
    fn test_check_status() {
        assert!(check_status("slack", reqwest::StatusCode::OK).is_ok());
        assert!(matches!(
            check_status("slack", reqwest::StatusCode::BAD_GATEWAY),
            Err(AlertError::Rejected { status: 502, .. })
        ));
    }
}
