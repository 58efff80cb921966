//! Alert dispatcher.
//!
//! The scanner and the check-in handler only enqueue [`DispatchJob`]s; a pool
//! of worker tasks does the slow part (talking to the notifier, retrying,
//! recording attempts). Jobs are sharded by monitor id, so all jobs of one
//! monitor run on the same worker in the order they were enqueued: an
//! `OUTAGE_STARTED` job is always finished before the `RECOVERED` job that
//! closes its episode is looked at.

pub mod email;
pub mod notifier;
pub mod webhook;

pub use email::EmailNotifier;
pub use notifier::{ChannelNotifier, Notifier, NotifyError};
pub use webhook::WebhookNotifier;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AlertSettings;
use crate::model::{Channel, EpisodeKind, Monitor, MonitorStatus};
use crate::store::{AlertLog, MonitorStore};

/// Retry and fan-out settings for delivery
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Number of worker tasks
    pub workers: usize,
    /// Delivery attempts per channel, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Add up to 25% random delay to each backoff
    pub jitter: bool,
    pub notify_on_expiry: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            jitter: true,
            notify_on_expiry: true,
        }
    }
}

impl DispatchPolicy {
    pub fn from_settings(settings: &AlertSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            jitter: true,
            notify_on_expiry: settings.notify_on_expiry,
        }
    }

    /// Delay before retry number `attempt` (1-based): exponential, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self.initial_backoff.saturating_mul(factor).min(self.max_backoff);
        if self.jitter && !base.is_zero() {
            let extra_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
            base + Duration::from_millis(extra_ms)
        } else {
            base
        }
    }
}

/// One notification request
#[derive(Debug, Clone)]
pub struct DispatchJob {
    /// Snapshot of the monitor taken when the job was enqueued
    pub monitor: Monitor,
    pub kind: EpisodeKind,
    /// The outage episode the job belongs to, if any
    pub episode_start: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Front door of the dispatch worker pool
pub struct AlertDispatcher {
    queues: Vec<mpsc::UnboundedSender<DispatchJob>>,
    pending: Arc<Pending>,
}

impl AlertDispatcher {
    /// Start the worker pool
    pub fn spawn(
        store: Arc<dyn MonitorStore>,
        alerts: Arc<dyn AlertLog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: DispatchPolicy,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let pending = Arc::new(Pending::default());
        let worker = Arc::new(DispatchWorker { store, alerts, notifier, clock, policy: policy.clone() });

        let mut queues = Vec::with_capacity(policy.workers.max(1));
        let mut handles = Vec::with_capacity(policy.workers.max(1));

        for index in 0..policy.workers.max(1) {
            let (tx, mut rx) = mpsc::unbounded_channel::<DispatchJob>();
            let worker = Arc::clone(&worker);
            let pending = Arc::clone(&pending);

            handles.push(tokio::spawn(async move {
                debug!("Dispatch worker {} started", index);
                while let Some(job) = rx.recv().await {
                    worker.handle(job).await;
                    pending.done();
                }
                debug!("Dispatch worker {} stopped", index);
            }));
            queues.push(tx);
        }

        (Self { queues, pending }, handles)
    }

    /// Enqueue a notification without waiting for delivery
    pub fn dispatch(&self, monitor: &Monitor, kind: EpisodeKind, episode_start: Option<DateTime<Utc>>) {
        let shard = (monitor.id.as_u128() % self.queues.len() as u128) as usize;
        let job = DispatchJob { monitor: monitor.clone(), kind, episode_start };

        self.pending.add();
        if let Err(e) = self.queues[shard].send(job) {
            self.pending.done();
            error!(
                "Dispatch worker {} is gone, dropping {} notification for monitor {}",
                shard, e.0.kind, e.0.monitor.id
            );
        }
    }

    /// Jobs enqueued but not finished yet
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued job has been handled
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct DispatchWorker {
    store: Arc<dyn MonitorStore>,
    alerts: Arc<dyn AlertLog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    policy: DispatchPolicy,
}

impl DispatchWorker {
    async fn handle(&self, job: DispatchJob) {
        match job.kind {
            EpisodeKind::OutageStarted | EpisodeKind::OutagePersists => self.handle_outage(job).await,
            EpisodeKind::Recovered => self.handle_recovery(job).await,
            EpisodeKind::Expired => self.handle_expiry(job).await,
        }
    }

    async fn handle_outage(&self, job: DispatchJob) {
        let Some(episode) = job.episode_start else {
            error!("{} job for monitor {} has no episode, dropping", job.kind, job.monitor.id);
            return;
        };

        // The episode may have closed while the job sat in the queue.
        let current = match self.store.load(job.monitor.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!("Monitor {} was deleted before its {} alert went out", job.monitor.id, job.kind);
                return;
            }
            Err(e) => {
                warn!("Could not reload monitor {} before alerting, using snapshot: {}", job.monitor.id, e);
                job.monitor.clone()
            }
        };

        if current.status != MonitorStatus::Down || current.outage_started_at != Some(episode) {
            debug!(
                "Dropping stale {} alert for monitor {} (episode {} no longer open)",
                job.kind, current.id, episode
            );
            return;
        }

        self.deliver(&current, job.kind, episode).await;
    }

    async fn handle_recovery(&self, job: DispatchJob) {
        let Some(episode) = job.episode_start else {
            error!("Recovery job for monitor {} has no episode, dropping", job.monitor.id);
            return;
        };

        let alerted = match self.alerts.has_outage_alerts(job.monitor.id, episode).await {
            Ok(alerted) => alerted,
            Err(e) => {
                error!("Could not look up alerts for monitor {} episode {}: {}", job.monitor.id, episode, e);
                return;
            }
        };

        self.close_episode(&job.monitor, episode).await;

        if alerted {
            self.deliver(&job.monitor, EpisodeKind::Recovered, episode).await;
        } else {
            debug!(
                "Monitor {} recovered before anyone was alerted, no recovery notice",
                job.monitor.id
            );
        }
    }

    async fn handle_expiry(&self, job: DispatchJob) {
        if let Some(episode) = job.episode_start {
            self.close_episode(&job.monitor, episode).await;
        }

        if !self.policy.notify_on_expiry {
            return;
        }

        let key = job
            .episode_start
            .or(job.monitor.expires_at)
            .unwrap_or_else(|| self.clock.now());
        self.deliver(&job.monitor, EpisodeKind::Expired, key).await;
    }

    /// Whether the monitor is still DOWN in the given episode; store errors count as open
    async fn episode_open(&self, monitor_id: Uuid, episode: DateTime<Utc>) -> bool {
        match self.store.load(monitor_id).await {
            Ok(Some(current)) => current.status == MonitorStatus::Down && current.outage_started_at == Some(episode),
            Ok(None) => false,
            Err(e) => {
                warn!("Could not reload monitor {} between retries: {}", monitor_id, e);
                true
            }
        }
    }

    async fn close_episode(&self, monitor: &Monitor, episode: DateTime<Utc>) {
        match self.alerts.close_episode(monitor.id, episode).await {
            Ok(0) => {}
            Ok(closed) => debug!("Closed {} alert records for monitor {} episode {}", closed, monitor.id, episode),
            Err(e) => error!("Failed to close alert records for monitor {}: {}", monitor.id, e),
        }
    }

    /// Send on every channel of the monitor; channels do not wait on each other
    async fn deliver(&self, monitor: &Monitor, kind: EpisodeKind, episode: DateTime<Utc>) {
        let channels = monitor.channels();
        if channels.is_empty() {
            warn!("Monitor {} ({}) has no notification channel, {} not sent", monitor.name, monitor.id, kind);
            return;
        }

        join_all(channels.iter().map(|channel| self.deliver_channel(monitor, kind, episode, channel))).await;
    }

    async fn deliver_channel(&self, monitor: &Monitor, kind: EpisodeKind, episode: DateTime<Utc>, channel: &Channel) {
        let record = match self.alerts.open_record(monitor.id, episode, kind, channel, self.clock.now()).await {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to open alert record for monitor {} on {}: {}", monitor.id, channel.kind(), e);
                return;
            }
        };

        for attempt in 1..=self.policy.max_attempts {
            let result = self.notifier.send(channel, monitor, kind).await;
            let now = self.clock.now();

            let (delivered, failure) = match &result {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            };

            let still_open = match self.alerts.record_attempt(record.id, now, delivered, failure.as_deref()).await {
                Ok(open) => open,
                Err(e) => {
                    warn!("Failed to record delivery attempt {} for alert {}: {}", attempt, record.id, e);
                    true
                }
            };

            match result {
                Ok(()) => {
                    info!(
                        "Sent {} notification for monitor {} via {} (attempt {})",
                        kind, monitor.name, channel.kind(), attempt
                    );
                    return;
                }
                Err(NotifyError::Permanent(reason)) => {
                    error!(
                        "Permanent failure sending {} for monitor {} via {}: {}",
                        kind, monitor.name, channel.kind(), reason
                    );
                    return;
                }
                Err(NotifyError::Transient(reason)) => {
                    if !still_open {
                        debug!("Episode for monitor {} closed, abandoning {} retries", monitor.id, kind);
                        return;
                    }
                    if attempt == self.policy.max_attempts {
                        warn!(
                            "Giving up on {} for monitor {} via {} after {} attempts: {}",
                            kind, monitor.name, channel.kind(), attempt, reason
                        );
                        return;
                    }
                    let delay = self.policy.backoff(attempt);
                    debug!(
                        "Transient failure sending {} for monitor {} via {}, retrying in {:?}: {}",
                        kind, monitor.name, channel.kind(), delay, reason
                    );
                    tokio::time::sleep(delay).await;

                    if kind.is_outage() && !self.episode_open(monitor.id, episode).await {
                        debug!("Monitor {} left episode {} while {} was retrying, giving up", monitor.id, episode, kind);
                        return;
                    }
                }
            }
        }
    }
}
