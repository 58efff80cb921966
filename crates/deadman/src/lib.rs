//! Deadman - dead man's switch liveness engine
//!
//! Monitored jobs check in ("ping") after every successful run. This crate
//! decides when a job has stopped checking in on schedule and notifies its
//! operators once per outage, with recovery detection.
//!
//! The pieces, leaf-first:
//! - [`clock`]: injectable time source
//! - [`store`]: monitor and alert record persistence (libsql or in-memory)
//! - [`liveness`]: the pure state machine
//! - [`checkin`]: ping handling
//! - [`scanner`]: the periodic missed-check sweep
//! - [`dispatch`]: alert de-duplication, retry and delivery
//! - [`orchestrator`]: wires everything together for a running service

pub mod checkin;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod model;
pub mod orchestrator;
pub mod scanner;
pub mod store;

pub use checkin::{CheckInHandler, PingReceipt};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use dispatch::{AlertDispatcher, DispatchPolicy, Notifier, NotifyError};
pub use error::{LivenessError, StoreError};
pub use model::{AlertRecord, Channel, EpisodeKind, Monitor, MonitorStatus, StatusView};
pub use orchestrator::Orchestrator;
pub use scanner::{MissedCheckScanner, SweepOutcome, SweepReport};
pub use store::{AlertLog, LibsqlStore, MemoryStore, MonitorStore};

/// Grace period applied to monitors created without an explicit one.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 60;

/// Default cadence of the missed-check sweep.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
