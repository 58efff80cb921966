use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::notifier::{NotifyError, classify_error, classify_status, message};
use crate::model::{EpisodeKind, Monitor};

/// JSON body posted to webhook channels
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event: &'static str,
    pub monitor_id: Uuid,
    pub monitor_name: &'a str,
    pub interval_seconds: u64,
    pub grace_period_seconds: u64,
    pub last_ping: Option<DateTime<Utc>>,
    pub outage_started_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl<'a> WebhookPayload<'a> {
    pub fn new(monitor: &'a Monitor, kind: EpisodeKind) -> Self {
        let event = match kind {
            EpisodeKind::OutageStarted => "monitor_missed_ping",
            EpisodeKind::OutagePersists => "monitor_still_missing",
            EpisodeKind::Recovered => "monitor_recovered",
            EpisodeKind::Expired => "monitor_expired",
        };
        Self {
            event,
            monitor_id: monitor.id,
            monitor_name: &monitor.name,
            interval_seconds: monitor.interval_seconds,
            grace_period_seconds: monitor.grace_period_seconds,
            last_ping: monitor.last_ping_at,
            outage_started_at: monitor.outage_started_at,
            message: message(monitor, kind),
        }
    }
}

/// Posts JSON notifications to per-monitor webhook URLs
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_seconds)).build()?;
        Ok(Self { client })
    }

    pub async fn send(&self, url: &str, monitor: &Monitor, kind: EpisodeKind) -> Result<(), NotifyError> {
        let url = validate_webhook_url(url)?;
        let payload = WebhookPayload::new(monitor, kind);

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

/// A webhook target must be an absolute http(s) URL with a host
fn validate_webhook_url(raw: &str) -> Result<Url, NotifyError> {
    let url = Url::parse(raw).map_err(|e| NotifyError::Permanent(format!("invalid webhook URL {raw}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(NotifyError::Permanent(format!("unsupported webhook scheme: {other}"))),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(NotifyError::Permanent(format!("webhook URL has no host: {raw}")));
    }

    Ok(url)
}
