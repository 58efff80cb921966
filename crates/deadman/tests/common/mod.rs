#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use deadman::config::Config;
use deadman::{Channel, EpisodeKind, ManualClock, MemoryStore, Monitor, Notifier, NotifyError, Orchestrator};

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub kind: EpisodeKind,
    pub channel: &'static str,
    pub monitor_name: String,
}

/// Notifier that records every call and replays scripted failures
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    attempts: Mutex<usize>,
    script: Mutex<VecDeque<Result<(), NotifyError>>>,
}

impl RecordingNotifier {
    /// Queue results for the next calls; once drained every call succeeds
    pub fn fail_next(&self, results: impl IntoIterator<Item = Result<(), NotifyError>>) {
        self.script.lock().unwrap().extend(results);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EpisodeKind> {
        self.sent().into_iter().map(|s| s.kind).collect()
    }

    pub fn count(&self, kind: EpisodeKind) -> usize {
        self.sent().iter().filter(|s| s.kind == kind).count()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: &Channel, monitor: &Monitor, kind: EpisodeKind) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        let scripted = self.script.lock().unwrap().pop_front();
        let result = scripted.unwrap_or(Ok(()));
        if result.is_ok() {
            self.sent.lock().unwrap().push(Sent { kind, channel: channel.kind(), monitor_name: monitor.name.clone() });
        }
        result
    }
}

pub struct Harness {
    pub engine: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = Orchestrator::new(config, store.clone(), store.clone(), notifier.clone(), clock.clone());
        Self { engine, store, notifier, clock }
    }

    /// Register a webhook-only monitor created at T0
    pub async fn monitor(&self, interval: u64, grace: u64) -> Monitor {
        let monitor = Monitor::new("acct-1", "nightly backup", interval, t0())
            .with_grace_period(grace)
            .with_webhook("https://hooks.example.com/deadman");
        self.engine.register_monitor(monitor).await.unwrap()
    }

    pub async fn scan(&self, secs: i64) -> deadman::SweepOutcome {
        self.clock.set(at(secs));
        let outcome = self.engine.run_scan_tick(Some(at(secs))).await;
        self.engine.wait_idle().await;
        outcome
    }

    pub async fn ping(&self, id: uuid::Uuid, secs: i64) -> Result<deadman::PingReceipt, deadman::LivenessError> {
        self.clock.set(at(secs));
        let result = self.engine.handle_ping(id, Some(at(secs))).await;
        self.engine.wait_idle().await;
        result
    }
}

/// Fast retries so tests do not sleep for real backoff periods
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.alerts.initial_backoff_ms = 1;
    config.alerts.max_backoff_ms = 5;
    config
}
