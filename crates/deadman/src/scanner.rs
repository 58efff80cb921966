//! Missed-check scanner.
//!
//! A full sweep over every live monitor. Each monitor is evaluated and saved on
//! its own (versioned save, one retry on conflict), and a failure on one
//! monitor is logged and counted without stopping the sweep.
//!
//! Outage alerts are de-duplicated by writing `last_alert_sent_at` in the same
//! save that decides to alert: whichever writer wins the version race is the
//! only one that enqueues.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::dispatch::AlertDispatcher;
use crate::error::LivenessError;
use crate::liveness::{Transition, apply_evaluation, evaluate};
use crate::model::{EpisodeKind, Monitor, MonitorStatus};
use crate::store::MonitorStore;

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub transitioned: usize,
    pub alerts_enqueued: usize,
    pub conflicts: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep was still running
    Skipped,
}

#[derive(Debug, Default)]
struct Step {
    transitioned: bool,
    alerted: bool,
}

/// Clears the in-progress flag when the sweep ends, including on panic
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MissedCheckScanner {
    store: Arc<dyn MonitorStore>,
    dispatcher: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
    renotify_cooldown: Option<TimeDelta>,
    in_progress: AtomicBool,
}

impl MissedCheckScanner {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        dispatcher: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        renotify_cooldown: Option<Duration>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            renotify_cooldown: renotify_cooldown.and_then(|d| TimeDelta::from_std(d).ok()),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one sweep as of `now`, unless one is already in progress
    pub async fn run_scan_tick(&self, now: DateTime<Utc>) -> SweepOutcome {
        if self.in_progress.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("Previous missed-check sweep still running, skipping tick");
            return SweepOutcome::Skipped;
        }
        let _guard = SweepGuard(&self.in_progress);

        let report = self.sweep(now).await;
        if report.transitioned > 0 || report.failures > 0 || report.conflicts > 0 {
            info!(
                "Sweep done: {} evaluated, {} transitioned, {} alerts queued, {} conflicts, {} failures",
                report.evaluated, report.transitioned, report.alerts_enqueued, report.conflicts, report.failures
            );
        } else {
            debug!("Sweep done: {} monitors evaluated, nothing changed", report.evaluated);
        }
        SweepOutcome::Completed(report)
    }

    /// Start the background sweep loop.
    ///
    /// Every tick runs in its own task, so a sweep that overruns the interval
    /// makes the next tick hit the single-flight guard instead of queueing up.
    pub fn start_periodic_scan(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let scanner = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Missed-check scanner started (every {:?})", every);

            loop {
                interval.tick().await;

                let scanner = Arc::clone(&scanner);
                tokio::spawn(async move {
                    let now = scanner.clock.now();
                    if let SweepOutcome::Completed(report) = scanner.run_scan_tick(now).await {
                        if report.failures > 0 {
                            warn!("Sweep at {} had {} failed monitors", now, report.failures);
                        }
                    }
                });
            }
        })
    }

    async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let candidates = match self.store.load_overdue_candidates(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to load monitors for sweep: {}", e);
                report.failures += 1;
                return report;
            }
        };

        for monitor in candidates {
            report.evaluated += 1;
            let id = monitor.id;

            match self.process(monitor, now).await {
                Ok(step) => {
                    report.transitioned += usize::from(step.transitioned);
                    report.alerts_enqueued += usize::from(step.alerted);
                }
                Err(LivenessError::NotFound(_)) => debug!("Monitor {} deleted during sweep", id),
                Err(LivenessError::Conflict(_)) => {
                    warn!("Monitor {} kept changing during sweep, leaving it for the next tick", id);
                    report.conflicts += 1;
                }
                Err(e) => {
                    error!("Failed to evaluate monitor {}: {}", id, e);
                    report.failures += 1;
                }
            }
        }

        report
    }

    /// Evaluate one monitor, re-reading it once if the save loses a race
    async fn process(&self, monitor: Monitor, now: DateTime<Utc>) -> Result<Step, LivenessError> {
        let id = monitor.id;
        match self.try_process(monitor, now).await {
            Err(LivenessError::Conflict(_)) => {
                debug!("Monitor {} changed underneath the sweep, re-evaluating", id);
                let fresh = self.store.load(id).await?.ok_or(LivenessError::NotFound(id))?;
                self.try_process(fresh, now).await
            }
            other => other,
        }
    }

    async fn try_process(&self, mut monitor: Monitor, now: DateTime<Utc>) -> Result<Step, LivenessError> {
        let expected_version = monitor.version;
        let evaluation = evaluate(&monitor, now)?;

        let job = match evaluation.transition {
            Some(Transition::OutageStarted { episode_start }) => {
                apply_evaluation(&mut monitor, &evaluation);
                monitor.last_alert_sent_at = Some(now);
                Some((EpisodeKind::OutageStarted, Some(episode_start)))
            }
            Some(Transition::Expired { closed_episode }) => {
                apply_evaluation(&mut monitor, &evaluation);
                Some((EpisodeKind::Expired, closed_episode))
            }
            Some(Transition::Late) => {
                apply_evaluation(&mut monitor, &evaluation);
                None
            }
            None if self.renotify_due(&monitor, now) => {
                monitor.last_alert_sent_at = Some(now);
                Some((EpisodeKind::OutagePersists, monitor.outage_started_at))
            }
            None => return Ok(Step::default()),
        };

        let saved = self.store.save(&monitor, expected_version).await?;
        let transitioned = evaluation.transition.is_some();
        if transitioned {
            debug!("Monitor {} is now {}", saved.id, saved.status);
        }

        let alerted = match job {
            Some((kind, episode)) => {
                if kind.is_outage() {
                    info!("Monitor {} ({}) is down, queueing {} alert", saved.name, saved.id, kind);
                } else {
                    info!("Monitor {} ({}) expired", saved.name, saved.id);
                }
                self.dispatcher.dispatch(&saved, kind, episode);
                true
            }
            None => false,
        };

        Ok(Step { transitioned, alerted })
    }

    /// A DOWN monitor is due a reminder once the cooldown passed since the last alert
    fn renotify_due(&self, monitor: &Monitor, now: DateTime<Utc>) -> bool {
        let Some(cooldown) = self.renotify_cooldown else {
            return false;
        };
        if monitor.status != MonitorStatus::Down {
            return false;
        }
        monitor
            .last_alert_sent_at
            .or(monitor.outage_started_at)
            .is_some_and(|last| now - last >= cooldown)
    }
}
