use reqwest::Client;
use std::time::Duration;

use super::notifier::{NotifyError, classify_error, classify_status, message, subject};
use crate::config::EmailSettings;
use crate::model::{EpisodeKind, Monitor};

/// Sends email through an HTTP mail API (Mailgun message format)
pub struct EmailNotifier {
    client: Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl EmailNotifier {
    pub fn new(settings: &EmailSettings, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_seconds)).build()?;
        let endpoint = format!("{}/v3/{}/messages", settings.api_base.trim_end_matches('/'), settings.domain);
        let from = settings.from.clone().unwrap_or_else(|| format!("no-reply@{}", settings.domain));

        Ok(Self { client, endpoint, api_key: settings.api_key.clone(), from })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn send(&self, recipient: &str, monitor: &Monitor, kind: EpisodeKind) -> Result<(), NotifyError> {
        if !recipient.contains('@') {
            return Err(NotifyError::Permanent(format!("invalid email recipient: {recipient}")));
        }

        let subject = subject(monitor, kind);
        let text = message(monitor, kind);
        let form = [("from", self.from.as_str()), ("to", recipient), ("subject", subject.as_str()), ("text", text.as_str())];

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}
