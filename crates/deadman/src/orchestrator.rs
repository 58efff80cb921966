//! Orchestrator - owns and wires the engine components
//!
//! - Builds the store, notifier and dispatcher from [`Config`]
//! - Exposes the three core entry points (`handle_ping`, `run_scan_tick`, `get_status`)
//! - Runs the periodic sweep and drains the dispatch queue on shutdown

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkin::{CheckInHandler, PingReceipt};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::{AlertDispatcher, ChannelNotifier, DispatchPolicy, EmailNotifier, Notifier, WebhookNotifier};
use crate::error::LivenessError;
use crate::model::{AlertRecord, Monitor, StatusView};
use crate::scanner::{MissedCheckScanner, SweepOutcome};
use crate::store::migrations::run_migrations;
use crate::store::pool::open_pool;
use crate::store::{AlertLog, LibsqlStore, MemoryStore, MonitorStore};

/// How long shutdown waits for queued notifications
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<dyn MonitorStore>,
    alerts: Arc<dyn AlertLog>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<AlertDispatcher>,
    checkin: CheckInHandler,
    scanner: Arc<MissedCheckScanner>,
    worker_handles: Vec<JoinHandle<()>>,
    scan_handle: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Wire the engine around explicit collaborators; must run inside a tokio runtime
    pub fn new(
        config: Config,
        store: Arc<dyn MonitorStore>,
        alerts: Arc<dyn AlertLog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);

        let (dispatcher, worker_handles) = AlertDispatcher::spawn(
            Arc::clone(&store),
            Arc::clone(&alerts),
            notifier,
            Arc::clone(&clock),
            DispatchPolicy::from_settings(&config.alerts),
        );
        let dispatcher = Arc::new(dispatcher);

        let checkin = CheckInHandler::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            config.pings.record_after_expiry,
        );
        let scanner = Arc::new(MissedCheckScanner::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            config.alerts.renotify_cooldown_seconds.map(Duration::from_secs),
        ));

        Self { config, store, alerts, clock, dispatcher, checkin, scanner, worker_handles, scan_handle: None }
    }

    /// Build a production engine: libsql store, real notifiers, wall clock
    pub async fn from_config(config: Config) -> Result<Self> {
        info!("Opening database at {}", config.database.path);
        let pool = open_pool(&config.database.path, config.database.pool_size)
            .await
            .with_context(|| format!("failed to open database {}", config.database.path))?;

        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("failed to get connection: {e}"))?;
        run_migrations(&conn).await.context("failed to run migrations")?;
        drop(conn);

        let store = Arc::new(LibsqlStore::new_from_pool(pool));
        let notifier = Arc::new(Self::build_notifier(&config)?);

        Ok(Self::new(config, store.clone(), store, notifier, Arc::new(SystemClock)))
    }

    /// Build an engine that keeps everything in memory
    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(Self::build_notifier(&config)?);
        Ok(Self::new(config, store.clone(), store, notifier, Arc::new(SystemClock)))
    }

    fn build_notifier(config: &Config) -> Result<ChannelNotifier> {
        let timeout = config.webhook.timeout_seconds;
        let email = match &config.email {
            Some(settings) => Some(EmailNotifier::new(settings, timeout).context("failed to build email client")?),
            None => {
                warn!("No [email] section configured, email channels will fail");
                None
            }
        };
        let webhook = WebhookNotifier::new(timeout).context("failed to build webhook client")?;
        Ok(ChannelNotifier::new(email, webhook))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate and persist a new monitor
    pub async fn register_monitor(&self, monitor: Monitor) -> Result<Monitor, LivenessError> {
        monitor.validate()?;
        let created = self.store.create(&monitor).await?;
        info!("Registered monitor {} ({}) every {}s", created.name, created.id, created.interval_seconds);
        Ok(created)
    }

    pub async fn handle_ping(&self, monitor_id: Uuid, at: Option<DateTime<Utc>>) -> Result<PingReceipt, LivenessError> {
        self.checkin.handle_ping(monitor_id, at).await
    }

    /// Run one sweep; `None` means now
    pub async fn run_scan_tick(&self, now: Option<DateTime<Utc>>) -> SweepOutcome {
        let now = now.unwrap_or_else(|| self.clock.now());
        self.scanner.run_scan_tick(now).await
    }

    pub async fn get_status(&self, monitor_id: Uuid) -> Result<StatusView, LivenessError> {
        let monitor = self.store.load(monitor_id).await?.ok_or(LivenessError::NotFound(monitor_id))?;
        Ok(StatusView::from(&monitor))
    }

    pub async fn alert_history(&self, monitor_id: Uuid) -> Result<Vec<AlertRecord>, LivenessError> {
        Ok(self.alerts.records_for_monitor(monitor_id).await?)
    }

    /// Start the periodic sweep at the configured interval
    pub fn start(&mut self) {
        if self.scan_handle.is_some() {
            return;
        }
        let every = Duration::from_secs(self.config.scanner.interval_seconds);
        self.scan_handle = Some(self.scanner.start_periodic_scan(every));
    }

    /// Notifications queued or in flight
    pub fn pending_alerts(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Wait until every queued notification has been handled
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    /// Stop sweeping, give queued notifications a bounded time to finish, stop the workers
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.scan_handle.take() {
            handle.abort();
        }

        let pending = self.dispatcher.pending();
        if pending > 0 {
            info!("Waiting for {} queued notifications", pending);
        }
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.dispatcher.wait_idle()).await.is_err() {
            warn!("Gave up waiting on {} notifications at shutdown", self.dispatcher.pending());
        }

        for handle in self.worker_handles.drain(..) {
            handle.abort();
        }
        info!("Engine stopped");
    }
}
