use async_trait::async_trait;
use thiserror::Error;

use super::email::EmailNotifier;
use super::webhook::WebhookNotifier;
use crate::model::{Channel, EpisodeKind, Monitor};

/// Delivery failure reported by a notifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Worth retrying: timeouts, connection errors, 5xx, rate limiting
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Retrying cannot help: malformed destination, rejected request, missing setup
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Transient(_))
    }
}

/// Capability that delivers one notification on one channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &Channel, monitor: &Monitor, kind: EpisodeKind) -> Result<(), NotifyError>;
}

/// Routes each channel variant to the notifier that handles it
pub struct ChannelNotifier {
    email: Option<EmailNotifier>,
    webhook: WebhookNotifier,
}

impl ChannelNotifier {
    pub fn new(email: Option<EmailNotifier>, webhook: WebhookNotifier) -> Self {
        Self { email, webhook }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, channel: &Channel, monitor: &Monitor, kind: EpisodeKind) -> Result<(), NotifyError> {
        match channel {
            Channel::Email { recipient } => match &self.email {
                Some(email) => email.send(recipient, monitor, kind).await,
                None => Err(NotifyError::Permanent("email delivery is not configured".into())),
            },
            Channel::Webhook { url } => self.webhook.send(url, monitor, kind).await,
        }
    }
}

/// Map an HTTP status from a delivery endpoint to a delivery result
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> Result<(), NotifyError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = format!("endpoint returned {status}: {}", body.chars().take(200).collect::<String>());
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        Err(NotifyError::Transient(detail))
    } else {
        Err(NotifyError::Permanent(detail))
    }
}

/// Map a transport error to a delivery result
pub(crate) fn classify_error(err: &reqwest::Error) -> NotifyError {
    if err.is_builder() {
        NotifyError::Permanent(format!("invalid request: {err}"))
    } else {
        NotifyError::Transient(format!("request failed: {err}"))
    }
}

/// Subject line shared by every channel
pub(crate) fn subject(monitor: &Monitor, kind: EpisodeKind) -> String {
    match kind {
        EpisodeKind::OutageStarted => format!("Alert: Monitor {} missed ping", monitor.name),
        EpisodeKind::OutagePersists => format!("Still down: Monitor {} has not pinged", monitor.name),
        EpisodeKind::Recovered => format!("Resolved: Monitor {} is pinging again", monitor.name),
        EpisodeKind::Expired => format!("Expired: Monitor {} is no longer watched", monitor.name),
    }
}

/// Human readable body shared by every channel
pub(crate) fn message(monitor: &Monitor, kind: EpisodeKind) -> String {
    let last_ping = monitor
        .last_ping_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    match kind {
        EpisodeKind::OutageStarted | EpisodeKind::OutagePersists => format!(
            "The monitor '{}' has not received a ping within the expected interval of {} seconds \
             (plus {} seconds grace). Last ping: {}.",
            monitor.name, monitor.interval_seconds, monitor.grace_period_seconds, last_ping
        ),
        EpisodeKind::Recovered => {
            format!("The monitor '{}' received a ping and is back up. Last ping: {}.", monitor.name, last_ping)
        }
        EpisodeKind::Expired => format!(
            "The monitor '{}' reached its expiry time and will no longer raise alerts.",
            monitor.name
        ),
    }
}
