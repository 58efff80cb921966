use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::DEFAULT_GRACE_PERIOD_SECS;
use crate::error::LivenessError;

/// Liveness status of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// Created, never pinged, first deadline not reached yet
    Pending,
    Up,
    /// Interval elapsed, still inside the grace period
    Late,
    Down,
    /// Past `expires_at`, permanently inert
    Expired,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Pending => "pending",
            MonitorStatus::Up => "up",
            MonitorStatus::Late => "late",
            MonitorStatus::Down => "down",
            MonitorStatus::Expired => "expired",
        }
    }

    /// Statuses the missed-check sweep has to look at
    pub fn is_live(&self) -> bool {
        !matches!(self, MonitorStatus::Expired)
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MonitorStatus::Pending),
            "up" => Ok(MonitorStatus::Up),
            "late" => Ok(MonitorStatus::Late),
            "down" => Ok(MonitorStatus::Down),
            "expired" => Ok(MonitorStatus::Expired),
            other => Err(format!("unknown monitor status: {other}")),
        }
    }
}

/// Why a notification is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeKind {
    OutageStarted,
    OutagePersists,
    Recovered,
    Expired,
}

impl EpisodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeKind::OutageStarted => "outage_started",
            EpisodeKind::OutagePersists => "outage_persists",
            EpisodeKind::Recovered => "recovered",
            EpisodeKind::Expired => "expired",
        }
    }

    /// Outage notifications count towards "someone was alerted" for recovery
    pub fn is_outage(&self) -> bool {
        matches!(self, EpisodeKind::OutageStarted | EpisodeKind::OutagePersists)
    }
}

impl fmt::Display for EpisodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outage_started" => Ok(EpisodeKind::OutageStarted),
            "outage_persists" => Ok(EpisodeKind::OutagePersists),
            "recovered" => Ok(EpisodeKind::Recovered),
            "expired" => Ok(EpisodeKind::Expired),
            other => Err(format!("unknown episode kind: {other}")),
        }
    }
}

/// A notification destination configured on a monitor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Channel {
    Email { recipient: String },
    Webhook { url: String },
}

impl Channel {
    /// Short channel name as stored on alert records
    pub fn kind(&self) -> &'static str {
        match self {
            Channel::Email { .. } => "email",
            Channel::Webhook { .. } => "webhook",
        }
    }

    /// Address the channel delivers to
    pub fn target(&self) -> &str {
        match self {
            Channel::Email { recipient } => recipient,
            Channel::Webhook { url } => url,
        }
    }

    pub fn from_parts(kind: &str, target: String) -> Option<Self> {
        match kind {
            "email" => Some(Channel::Email { recipient: target }),
            "webhook" => Some(Channel::Webhook { url: target }),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.target())
    }
}

/// Monitor model - a tracked periodic job and its liveness state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    /// Maximum seconds expected between check-ins
    pub interval_seconds: u64,
    /// Extra seconds tolerated after the interval before declaring an outage
    pub grace_period_seconds: u64,
    pub email_recipient: Option<String>,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,

    // Liveness fields, written only by the engine
    pub status: MonitorStatus,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub last_alert_sent_at: Option<DateTime<Utc>>,
    pub outage_started_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency counter, bumped on every successful save
    pub version: i64,
}

impl Monitor {
    /// Create a new, never pinged monitor
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        interval_seconds: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            name: name.into(),
            interval_seconds,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECS,
            email_recipient: None,
            webhook_url: None,
            created_at,
            expires_at: None,
            status: MonitorStatus::Pending,
            last_ping_at: None,
            last_alert_sent_at: None,
            outage_started_at: None,
            version: 0,
        }
    }

    pub fn with_grace_period(mut self, seconds: u64) -> Self {
        self.grace_period_seconds = seconds;
        self
    }

    pub fn with_email(mut self, recipient: impl Into<String>) -> Self {
        self.email_recipient = Some(recipient.into());
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Configured notification channels, email first
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(2);
        if let Some(recipient) = self.email_recipient.as_ref().filter(|r| !r.is_empty()) {
            channels.push(Channel::Email { recipient: recipient.clone() });
        }
        if let Some(url) = self.webhook_url.as_ref().filter(|u| !u.is_empty()) {
            channels.push(Channel::Webhook { url: url.clone() });
        }
        channels
    }

    /// Reject configurations the state machine cannot evaluate
    pub fn validate(&self) -> Result<(), LivenessError> {
        if self.interval_seconds == 0 {
            return Err(LivenessError::InvalidMonitor {
                id: self.id,
                reason: "interval must be greater than zero".into(),
            });
        }
        self.deadline().map(|_| ())
    }

    /// Start of the current waiting period: last ping, or creation if never pinged
    pub fn anchor(&self) -> DateTime<Utc> {
        self.last_ping_at.unwrap_or(self.created_at)
    }

    /// `anchor + interval`: past this point the job is late
    pub fn soft_deadline(&self) -> Result<DateTime<Utc>, LivenessError> {
        self.offset_anchor(self.interval_seconds)
    }

    /// `anchor + interval + grace_period`: past this point the job is down
    pub fn deadline(&self) -> Result<DateTime<Utc>, LivenessError> {
        let total = self.interval_seconds.checked_add(self.grace_period_seconds).ok_or_else(|| {
            LivenessError::InvalidMonitor {
                id: self.id,
                reason: "interval plus grace period overflows".into(),
            }
        })?;
        self.offset_anchor(total)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    fn offset_anchor(&self, seconds: u64) -> Result<DateTime<Utc>, LivenessError> {
        let invalid = |reason: &str| LivenessError::InvalidMonitor { id: self.id, reason: reason.into() };
        if self.interval_seconds == 0 {
            return Err(invalid("interval must be greater than zero"));
        }
        let seconds = i64::try_from(seconds).map_err(|_| invalid("interval out of range"))?;
        let delta = TimeDelta::try_seconds(seconds).ok_or_else(|| invalid("interval out of range"))?;
        self.anchor()
            .checked_add_signed(delta)
            .ok_or_else(|| invalid("deadline out of range"))
    }

    /// Convert a timestamp to Unix seconds for storage
    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp()
    }

    /// Convert stored Unix seconds back into a timestamp
    pub fn i64_to_timestamp(timestamp: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(timestamp, 0)
    }
}

/// Read-only view of a monitor's liveness, for list and detail pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub id: Uuid,
    pub status: MonitorStatus,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub outage_started_at: Option<DateTime<Utc>>,
    /// `None` for expired or malformed monitors
    pub deadline: Option<DateTime<Utc>>,
}

impl From<&Monitor> for StatusView {
    fn from(monitor: &Monitor) -> Self {
        let deadline = match monitor.status {
            MonitorStatus::Expired => None,
            _ => monitor.deadline().ok(),
        };
        Self {
            id: monitor.id,
            status: monitor.status,
            last_ping_at: monitor.last_ping_at,
            outage_started_at: monitor.outage_started_at,
            deadline,
        }
    }
}

/// One dispatched notification on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub monitor_id: Uuid,
    /// The `outage_started_at` of the episode this record belongs to
    pub episode_start: DateTime<Utc>,
    pub kind: EpisodeKind,
    pub channel: Channel,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered: bool,
    /// Set when the episode closed; closed records are never touched again
    pub closed: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn is_final(&self) -> bool {
        self.delivered || self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_deadline_anchors_on_creation_until_first_ping() {
        let mut monitor = Monitor::new("acct-1", "nightly backup", 300, t0()).with_grace_period(60);
        assert_eq!(monitor.deadline().unwrap(), t0() + TimeDelta::seconds(360));
        assert_eq!(monitor.soft_deadline().unwrap(), t0() + TimeDelta::seconds(300));

        monitor.last_ping_at = Some(t0() + TimeDelta::seconds(100));
        assert_eq!(monitor.deadline().unwrap(), t0() + TimeDelta::seconds(460));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let monitor = Monitor::new("acct-1", "broken", 0, t0());
        assert!(matches!(monitor.validate(), Err(LivenessError::InvalidMonitor { .. })));
        assert!(monitor.deadline().is_err());
    }

    #[test]
    fn test_huge_interval_is_invalid() {
        let monitor = Monitor::new("acct-1", "forever", u64::MAX, t0());
        assert!(monitor.validate().is_err());
    }

    #[test]
    fn test_channels() {
        let monitor = Monitor::new("acct-1", "job", 60, t0());
        assert!(monitor.channels().is_empty());

        let monitor = monitor.with_email("ops@example.com").with_webhook("https://hooks.example.com/x");
        let channels = monitor.channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].kind(), "email");
        assert_eq!(channels[1].target(), "https://hooks.example.com/x");

        let empty = Monitor::new("acct-1", "job", 60, t0()).with_email("");
        assert!(empty.channels().is_empty());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            MonitorStatus::Pending,
            MonitorStatus::Up,
            MonitorStatus::Late,
            MonitorStatus::Down,
            MonitorStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<MonitorStatus>().unwrap(), status);
        }
        assert!("sideways".parse::<MonitorStatus>().is_err());
    }

    #[test]
    fn test_status_view_hides_deadline_when_expired() {
        let mut monitor = Monitor::new("acct-1", "job", 60, t0());
        assert!(StatusView::from(&monitor).deadline.is_some());

        monitor.status = MonitorStatus::Expired;
        assert!(StatusView::from(&monitor).deadline.is_none());
    }
}
