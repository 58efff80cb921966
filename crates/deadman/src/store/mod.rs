//! Storage abstraction layer
//!
//! Monitors and alert records live behind two traits so the engine can run
//! against the LibSQL backend in production and an in-process map in tests.
//! Both backends implement optimistic concurrency the same way: a save only
//! lands if the caller's `expected_version` is still current.

pub mod libsql_store;
pub mod memory;
pub mod migrations;
pub mod pool;

pub use libsql_store::LibsqlStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{AlertRecord, Channel, EpisodeKind, Monitor};

/// Monitor persistence
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Insert a new monitor; its version becomes 1
    async fn create(&self, monitor: &Monitor) -> Result<Monitor, StoreError>;

    /// Load a monitor by id
    async fn load(&self, id: Uuid) -> Result<Option<Monitor>, StoreError>;

    /// Every monitor the missed-check sweep has to evaluate at `now`
    async fn load_overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Monitor>, StoreError>;

    /// Write the liveness fields of `monitor` if its stored version still equals
    /// `expected_version`, returning the monitor with its new version.
    ///
    /// Fails with [`StoreError::Conflict`] when another writer got there first
    /// and [`StoreError::NotFound`] when the monitor was deleted.
    async fn save(&self, monitor: &Monitor, expected_version: i64) -> Result<Monitor, StoreError>;

    /// Delete a monitor and its alert records
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Append/update-only log of dispatched notifications
#[async_trait]
pub trait AlertLog: Send + Sync {
    /// Create the record for a first delivery attempt
    async fn open_record(
        &self,
        monitor_id: Uuid,
        episode_start: DateTime<Utc>,
        kind: EpisodeKind,
        channel: &Channel,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError>;

    /// Count one delivery attempt against a record.
    ///
    /// Returns `false` without touching anything when the record is already
    /// delivered or its episode closed.
    async fn record_attempt(
        &self,
        record_id: i64,
        at: DateTime<Utc>,
        delivered: bool,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Whether any outage notification was ever attempted for the episode
    async fn has_outage_alerts(&self, monitor_id: Uuid, episode_start: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Finalize every open record of the episode; returns how many were closed
    async fn close_episode(&self, monitor_id: Uuid, episode_start: DateTime<Utc>) -> Result<usize, StoreError>;

    /// All records of a monitor, oldest first
    async fn records_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<AlertRecord>, StoreError>;
}
