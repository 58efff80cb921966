use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{AlertLog, MonitorStore};
use crate::error::StoreError;
use crate::model::{AlertRecord, Channel, EpisodeKind, Monitor};

#[derive(Default)]
struct Inner {
    monitors: HashMap<Uuid, Monitor>,
    records: Vec<AlertRecord>,
    /// Last issued record id; never reused after a delete
    last_record_id: i64,
}

/// In-process store with the same versioning rules as the database backend
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn create(&self, monitor: &Monitor) -> Result<Monitor, StoreError> {
        let mut inner = self.lock();
        if inner.monitors.contains_key(&monitor.id) {
            return Err(StoreError::AlreadyExists(monitor.id));
        }
        let mut stored = monitor.clone();
        stored.version = 1;
        inner.monitors.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Monitor>, StoreError> {
        Ok(self.lock().monitors.get(&id).cloned())
    }

    async fn load_overdue_candidates(&self, _now: DateTime<Utc>) -> Result<Vec<Monitor>, StoreError> {
        let inner = self.lock();
        let mut candidates: Vec<Monitor> =
            inner.monitors.values().filter(|m| m.status.is_live()).cloned().collect();
        candidates.sort_by_key(|m| m.created_at);
        Ok(candidates)
    }

    async fn save(&self, monitor: &Monitor, expected_version: i64) -> Result<Monitor, StoreError> {
        let mut inner = self.lock();
        let stored = inner.monitors.get_mut(&monitor.id).ok_or(StoreError::NotFound(monitor.id))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict { id: monitor.id, expected: expected_version });
        }

        stored.status = monitor.status;
        stored.last_ping_at = monitor.last_ping_at;
        stored.last_alert_sent_at = monitor.last_alert_sent_at;
        stored.outage_started_at = monitor.outage_started_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.monitors.remove(&id);
        inner.records.retain(|r| r.monitor_id != id);
        Ok(())
    }
}

#[async_trait]
impl AlertLog for MemoryStore {
    async fn open_record(
        &self,
        monitor_id: Uuid,
        episode_start: DateTime<Utc>,
        kind: EpisodeKind,
        channel: &Channel,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        let mut inner = self.lock();
        inner.last_record_id += 1;
        let record = AlertRecord {
            id: inner.last_record_id,
            monitor_id,
            episode_start,
            kind,
            channel: channel.clone(),
            attempt_count: 0,
            last_attempt_at: None,
            delivered: false,
            closed: false,
            last_error: None,
            created_at: at,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn record_attempt(
        &self,
        record_id: i64,
        at: DateTime<Utc>,
        delivered: bool,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(record) = inner.records.iter_mut().find(|r| r.id == record_id) else {
            return Ok(false);
        };
        if record.is_final() {
            return Ok(false);
        }
        record.attempt_count += 1;
        record.last_attempt_at = Some(at);
        record.delivered = delivered;
        record.last_error = error.map(str::to_owned);
        Ok(true)
    }

    async fn has_outage_alerts(&self, monitor_id: Uuid, episode_start: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .records
            .iter()
            .any(|r| r.monitor_id == monitor_id && r.episode_start == episode_start && r.kind.is_outage()))
    }

    async fn close_episode(&self, monitor_id: Uuid, episode_start: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let mut closed = 0;
        for record in inner
            .records
            .iter_mut()
            .filter(|r| r.monitor_id == monitor_id && r.episode_start == episode_start && !r.closed)
        {
            record.closed = true;
            closed += 1;
        }
        Ok(closed)
    }

    async fn records_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self.lock().records.iter().filter(|r| r.monitor_id == monitor_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MonitorStatus;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn test_save_requires_current_version() {
        let store = MemoryStore::new();
        let created = store.create(&Monitor::new("acct-1", "job", 60, t0())).await.unwrap();
        assert_eq!(created.version, 1);

        let mut update = created.clone();
        update.status = MonitorStatus::Up;
        update.last_ping_at = Some(t0());
        let saved = store.save(&update, 1).await.unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.status, MonitorStatus::Up);

        // Stale writer loses.
        let err = store.save(&update, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, .. }));

        store.delete(created.id).await.unwrap();
        assert!(matches!(store.save(&update, 2).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_candidates_skip_expired() {
        let store = MemoryStore::new();
        let live = store.create(&Monitor::new("acct-1", "live", 60, t0())).await.unwrap();
        let mut gone = store.create(&Monitor::new("acct-1", "gone", 60, t0())).await.unwrap();
        gone.status = MonitorStatus::Expired;
        store.save(&gone, gone.version).await.unwrap();

        let candidates = store.load_overdue_candidates(t0()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, live.id);
    }

    #[tokio::test]
    async fn test_record_ids_are_not_reused_after_delete() {
        let store = MemoryStore::new();
        let channel = Channel::Webhook { url: "https://hooks.example.com/x".into() };
        let a = store.create(&Monitor::new("acct-1", "a", 60, t0())).await.unwrap();
        let b = store.create(&Monitor::new("acct-1", "b", 60, t0())).await.unwrap();
        let c = store.create(&Monitor::new("acct-1", "c", 60, t0())).await.unwrap();

        store.open_record(a.id, t0(), EpisodeKind::OutageStarted, &channel, t0()).await.unwrap();
        let rb = store.open_record(b.id, t0(), EpisodeKind::OutageStarted, &channel, t0()).await.unwrap();
        store.delete(a.id).await.unwrap();
        let rc = store.open_record(c.id, t0(), EpisodeKind::OutageStarted, &channel, t0()).await.unwrap();
        assert_ne!(rc.id, rb.id);

        assert!(store.record_attempt(rc.id, t0(), true, None).await.unwrap());
        let c_records = store.records_for_monitor(c.id).await.unwrap();
        assert!(c_records[0].delivered);
        assert_eq!(c_records[0].attempt_count, 1);
        let b_records = store.records_for_monitor(b.id).await.unwrap();
        assert!(!b_records[0].delivered);
        assert_eq!(b_records[0].attempt_count, 0);
    }

    #[tokio::test]
    async fn test_closed_records_are_frozen() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let channel = Channel::Email { recipient: "ops@example.com".into() };
        let record = store.open_record(id, t0(), EpisodeKind::OutageStarted, &channel, t0()).await.unwrap();

        assert!(store.record_attempt(record.id, t0(), false, Some("timeout")).await.unwrap());
        assert!(store.has_outage_alerts(id, t0()).await.unwrap());
        assert_eq!(store.close_episode(id, t0()).await.unwrap(), 1);
        assert!(!store.record_attempt(record.id, t0(), true, None).await.unwrap());

        let records = store.records_for_monitor(id).await.unwrap();
        assert_eq!(records[0].attempt_count, 1);
        assert!(!records[0].delivered);
        assert!(records[0].closed);
    }
}
