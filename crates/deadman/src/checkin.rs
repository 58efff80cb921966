//! Check-in (ping) handling.
//!
//! A ping is a read-apply-save cycle against the monitor store. The save is
//! versioned, so a ping racing with a scan either lands on top of the scan's
//! write or forces one re-read; it never half-applies. Notifications that
//! follow from a ping (recovery, expiry) are handed to the dispatcher and
//! never awaited here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::dispatch::AlertDispatcher;
use crate::error::{LivenessError, StoreError};
use crate::liveness::{PingEffect, apply_ping};
use crate::model::{EpisodeKind, Monitor, MonitorStatus};
use crate::store::MonitorStore;

/// Result of an accepted ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PingReceipt {
    pub status: MonitorStatus,
    pub accepted: bool,
}

pub struct CheckInHandler {
    store: Arc<dyn MonitorStore>,
    dispatcher: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
    record_after_expiry: bool,
}

impl CheckInHandler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        dispatcher: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        record_after_expiry: bool,
    ) -> Self {
        Self { store, dispatcher, clock, record_after_expiry }
    }

    /// Record a check-in for `monitor_id` at `at` (defaults to now).
    ///
    /// Fails with [`LivenessError::NotFound`] for unknown monitors and
    /// [`LivenessError::AlreadyExpired`] for expired ones; the latter still
    /// reports whether the ping timestamp was kept for audit.
    pub async fn handle_ping(
        &self,
        monitor_id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<PingReceipt, LivenessError> {
        let at = at.unwrap_or_else(|| self.clock.now());

        for attempt in 1..=2 {
            let mut monitor = self.store.load(monitor_id).await?.ok_or(LivenessError::NotFound(monitor_id))?;
            let expected_version = monitor.version;
            let effect = apply_ping(&mut monitor, at, self.record_after_expiry);

            let saved = if effect.changed() {
                match self.store.save(&monitor, expected_version).await {
                    Ok(saved) => saved,
                    Err(StoreError::Conflict { .. }) if attempt == 1 => {
                        debug!("Ping for monitor {} lost a race, re-reading", monitor_id);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                monitor
            };

            return self.finish(saved, effect);
        }

        warn!("Giving up on ping for monitor {} after repeated conflicts", monitor_id);
        Err(LivenessError::Conflict(monitor_id))
    }

    fn finish(&self, monitor: Monitor, effect: PingEffect) -> Result<PingReceipt, LivenessError> {
        match effect {
            PingEffect::Accepted { previous, recovered_episode } => {
                if let Some(episode) = recovered_episode {
                    info!("Monitor {} ({}) recovered, outage began {}", monitor.name, monitor.id, episode);
                    self.dispatcher.dispatch(&monitor, EpisodeKind::Recovered, Some(episode));
                } else if previous != MonitorStatus::Up {
                    debug!("Monitor {} moved {} -> {}", monitor.id, previous, monitor.status);
                }
                Ok(PingReceipt { status: monitor.status, accepted: true })
            }
            PingEffect::Expired { newly_expired, closed_episode, recorded } => {
                if newly_expired {
                    info!("Monitor {} ({}) expired", monitor.name, monitor.id);
                    self.dispatcher.dispatch(&monitor, EpisodeKind::Expired, closed_episode);
                }
                Err(LivenessError::AlreadyExpired { id: monitor.id, recorded })
            }
        }
    }
}
