//! Liveness state machine.
//!
//! Pure functions only: nothing in here touches the store, the clock or the
//! network. Callers load a monitor, ask [`evaluate`] or [`apply_ping`] what
//! should happen, write the result back with a versioned save and act on the
//! returned transition.
//!
//! ```text
//!  PENDING ──deadline──▶ DOWN ◀──deadline── LATE ◀──interval── UP
//!     │                   │                                    ▲
//!     └──────── ping ─────┴──────────── ping ──────────────────┘
//!  any live state ──expires_at──▶ EXPIRED (terminal)
//! ```

use chrono::{DateTime, Utc};

use crate::error::LivenessError;
use crate::model::{Monitor, MonitorStatus};

/// State change produced by an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// UP went past its interval but is still inside the grace period
    Late,
    /// The deadline passed without a ping; the episode starts at the deadline
    OutageStarted { episode_start: DateTime<Utc> },
    /// `expires_at` passed; carries the outage episode that was open, if any
    Expired { closed_episode: Option<DateTime<Utc>> },
}

/// Outcome of evaluating a monitor at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: MonitorStatus,
    pub transition: Option<Transition>,
}

impl Evaluation {
    fn unchanged(status: MonitorStatus) -> Self {
        Self { status, transition: None }
    }

    fn to(status: MonitorStatus, transition: Transition) -> Self {
        Self { status, transition: Some(transition) }
    }
}

/// Compute the status a monitor should have at `now`.
///
/// Only pings close an outage: a `DOWN` monitor stays `DOWN` here even if the
/// clock moved backwards past its deadline, and evaluating it again yields no
/// transition.
pub fn evaluate(monitor: &Monitor, now: DateTime<Utc>) -> Result<Evaluation, LivenessError> {
    if monitor.status == MonitorStatus::Expired {
        return Ok(Evaluation::unchanged(MonitorStatus::Expired));
    }

    if monitor.is_expired_at(now) {
        return Ok(Evaluation::to(
            MonitorStatus::Expired,
            Transition::Expired { closed_episode: monitor.outage_started_at },
        ));
    }

    let deadline = monitor.deadline()?;

    if monitor.status == MonitorStatus::Down {
        return Ok(Evaluation::unchanged(MonitorStatus::Down));
    }

    if now > deadline {
        return Ok(Evaluation::to(
            MonitorStatus::Down,
            Transition::OutageStarted { episode_start: deadline },
        ));
    }

    if monitor.status == MonitorStatus::Up && now > monitor.soft_deadline()? {
        return Ok(Evaluation::to(MonitorStatus::Late, Transition::Late));
    }

    Ok(Evaluation::unchanged(monitor.status))
}

/// Write an evaluation's effects onto the monitor's liveness fields
pub fn apply_evaluation(monitor: &mut Monitor, evaluation: &Evaluation) {
    monitor.status = evaluation.status;
    match evaluation.transition {
        Some(Transition::OutageStarted { episode_start }) => {
            monitor.outage_started_at = Some(episode_start);
            monitor.last_alert_sent_at = None;
        }
        Some(Transition::Expired { .. }) => clear_outage(monitor),
        Some(Transition::Late) | None => {}
    }
}

/// What a ping did to a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingEffect {
    Accepted {
        previous: MonitorStatus,
        /// Start of the outage episode this ping closed
        recovered_episode: Option<DateTime<Utc>>,
    },
    /// The monitor is (or just became) expired; the ping does not count
    Expired {
        /// The ping itself performed the `→EXPIRED` transition
        newly_expired: bool,
        closed_episode: Option<DateTime<Utc>>,
        /// `last_ping_at` was updated for audit purposes
        recorded: bool,
    },
}

impl PingEffect {
    /// Whether the monitor needs to be written back
    pub fn changed(&self) -> bool {
        match self {
            PingEffect::Accepted { .. } => true,
            PingEffect::Expired { newly_expired, recorded, .. } => *newly_expired || *recorded,
        }
    }
}

/// Apply a check-in received at `at`.
///
/// A ping moves every live status to `UP` and closes any open outage episode.
/// Expired monitors are never revived; their ping is only recorded when
/// `record_after_expiry` is set. `last_ping_at` never moves backwards, so a
/// delayed ping cannot shorten the current waiting period.
pub fn apply_ping(monitor: &mut Monitor, at: DateTime<Utc>, record_after_expiry: bool) -> PingEffect {
    if monitor.status == MonitorStatus::Expired || monitor.is_expired_at(at) {
        let newly_expired = monitor.status != MonitorStatus::Expired;
        let closed_episode = if newly_expired { monitor.outage_started_at } else { None };
        if newly_expired {
            monitor.status = MonitorStatus::Expired;
            clear_outage(monitor);
        }
        let recorded = record_after_expiry && record_ping(monitor, at);
        return PingEffect::Expired { newly_expired, closed_episode, recorded };
    }

    let previous = monitor.status;
    let recovered_episode = match previous {
        MonitorStatus::Down => monitor.outage_started_at,
        _ => None,
    };

    record_ping(monitor, at);
    monitor.status = MonitorStatus::Up;
    clear_outage(monitor);

    PingEffect::Accepted { previous, recovered_episode }
}

fn record_ping(monitor: &mut Monitor, at: DateTime<Utc>) -> bool {
    match monitor.last_ping_at {
        Some(last) if last >= at => false,
        _ => {
            monitor.last_ping_at = Some(at);
            true
        }
    }
}

fn clear_outage(monitor: &mut Monitor) {
    monitor.outage_started_at = None;
    monitor.last_alert_sent_at = None;
}
