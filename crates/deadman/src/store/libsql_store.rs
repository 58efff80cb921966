use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::pool::{LibsqlManager, LibsqlPool};
use super::{AlertLog, MonitorStore};
use crate::error::StoreError;
use crate::model::{AlertRecord, Channel, EpisodeKind, Monitor, MonitorStatus};

const MONITOR_COLUMNS: &str = "id, owner, name, interval_seconds, grace_period_seconds, email_recipient, \
     webhook_url, created_at, expires_at, status, last_ping_at, last_alert_sent_at, outage_started_at, version";

const RECORD_COLUMNS: &str = "id, monitor_id, episode_start, kind, channel, target, attempt_count, \
     last_attempt_at, delivered, closed, last_error, created_at";

/// LibSQL-backed monitor store and alert log
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a store from a pool whose database is already migrated
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

fn ts(time: DateTime<Utc>) -> i64 {
    Monitor::timestamp_to_i64(time)
}

fn opt_ts(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.map(ts)
}

fn parse_ts(raw: i64, column: &str) -> Result<DateTime<Utc>, StoreError> {
    Monitor::i64_to_timestamp(raw).ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {raw}")))
}

fn parse_opt_ts(raw: Option<i64>, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|v| parse_ts(v, column)).transpose()
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("bad uuid {raw}: {e}")))
}

fn non_negative(raw: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {raw}")))
}

fn monitor_from_row(row: &Row) -> Result<Monitor, StoreError> {
    let id: String = row.get(0)?;
    let status: String = row.get(9)?;

    Ok(Monitor {
        id: parse_uuid(&id)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        interval_seconds: non_negative(row.get(3)?, "interval_seconds")?,
        grace_period_seconds: non_negative(row.get(4)?, "grace_period_seconds")?,
        email_recipient: row.get(5)?,
        webhook_url: row.get(6)?,
        created_at: parse_ts(row.get(7)?, "created_at")?,
        expires_at: parse_opt_ts(row.get(8)?, "expires_at")?,
        status: status.parse::<MonitorStatus>().map_err(StoreError::Corrupt)?,
        last_ping_at: parse_opt_ts(row.get(10)?, "last_ping_at")?,
        last_alert_sent_at: parse_opt_ts(row.get(11)?, "last_alert_sent_at")?,
        outage_started_at: parse_opt_ts(row.get(12)?, "outage_started_at")?,
        version: row.get(13)?,
    })
}

fn record_from_row(row: &Row) -> Result<AlertRecord, StoreError> {
    let monitor_id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let channel: String = row.get(4)?;
    let target: String = row.get(5)?;

    Ok(AlertRecord {
        id: row.get(0)?,
        monitor_id: parse_uuid(&monitor_id)?,
        episode_start: parse_ts(row.get(2)?, "episode_start")?,
        kind: kind.parse::<EpisodeKind>().map_err(StoreError::Corrupt)?,
        channel: Channel::from_parts(&channel, target)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown channel: {channel}")))?,
        attempt_count: u32::try_from(row.get::<i64>(6)?).unwrap_or(u32::MAX),
        last_attempt_at: parse_opt_ts(row.get(7)?, "last_attempt_at")?,
        delivered: row.get::<i64>(8)? != 0,
        closed: row.get::<i64>(9)? != 0,
        last_error: row.get(10)?,
        created_at: parse_ts(row.get(11)?, "created_at")?,
    })
}

#[async_trait]
impl MonitorStore for LibsqlStore {
    async fn create(&self, monitor: &Monitor) -> Result<Monitor, StoreError> {
        if self.load(monitor.id).await?.is_some() {
            return Err(StoreError::AlreadyExists(monitor.id));
        }

        let conn = self.get_conn().await?;
        conn.execute(
            &format!("INSERT INTO monitors ({MONITOR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"),
            params![
                monitor.id.to_string(),
                monitor.owner.clone(),
                monitor.name.clone(),
                monitor.interval_seconds as i64,
                monitor.grace_period_seconds as i64,
                monitor.email_recipient.clone(),
                monitor.webhook_url.clone(),
                ts(monitor.created_at),
                opt_ts(monitor.expires_at),
                monitor.status.as_str(),
                opt_ts(monitor.last_ping_at),
                opt_ts(monitor.last_alert_sent_at),
                opt_ts(monitor.outage_started_at)
            ],
        )
        .await?;

        let mut stored = monitor.clone();
        stored.version = 1;
        Ok(stored)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Monitor>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id.to_string()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn load_overdue_candidates(&self, _now: DateTime<Utc>) -> Result<Vec<Monitor>, StoreError> {
        // Full sweep: DOWN monitors are included for re-notification and expiry.
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE status != 'expired' ORDER BY created_at"),
                (),
            )
            .await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            match monitor_from_row(&row) {
                Ok(monitor) => monitors.push(monitor),
                // One unreadable row must not hide every other monitor from the sweep.
                Err(e) => tracing::error!("Skipping unreadable monitor row: {}", e),
            }
        }

        Ok(monitors)
    }

    async fn save(&self, monitor: &Monitor, expected_version: i64) -> Result<Monitor, StoreError> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE monitors SET status = ?, last_ping_at = ?, last_alert_sent_at = ?, outage_started_at = ?, \
                 version = version + 1 WHERE id = ? AND version = ?",
                params![
                    monitor.status.as_str(),
                    opt_ts(monitor.last_ping_at),
                    opt_ts(monitor.last_alert_sent_at),
                    opt_ts(monitor.outage_started_at),
                    monitor.id.to_string(),
                    expected_version
                ],
            )
            .await?;

        if updated == 0 {
            drop(conn);
            return match self.load(monitor.id).await? {
                Some(_) => Err(StoreError::Conflict { id: monitor.id, expected: expected_version }),
                None => Err(StoreError::NotFound(monitor.id)),
            };
        }

        // The row now holds exactly what was written, at the next version.
        let mut saved = monitor.clone();
        saved.version = expected_version + 1;
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM alert_records WHERE monitor_id = ?", params![id.to_string()]).await?;
        conn.execute("DELETE FROM monitors WHERE id = ?", params![id.to_string()]).await?;
        Ok(())
    }
}

#[async_trait]
impl AlertLog for LibsqlStore {
    async fn open_record(
        &self,
        monitor_id: Uuid,
        episode_start: DateTime<Utc>,
        kind: EpisodeKind,
        channel: &Channel,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO alert_records (monitor_id, episode_start, kind, channel, target, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                monitor_id.to_string(),
                ts(episode_start),
                kind.as_str(),
                channel.kind(),
                channel.target().to_string(),
                ts(at)
            ],
        )
        .await?;

        Ok(AlertRecord {
            id: conn.last_insert_rowid(),
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
        })
    }

    async fn record_attempt(
        &self,
        record_id: i64,
        at: DateTime<Utc>,
        delivered: bool,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE alert_records SET attempt_count = attempt_count + 1, last_attempt_at = ?, delivered = ?, \
                 last_error = ? WHERE id = ? AND delivered = 0 AND closed = 0",
                params![ts(at), i64::from(delivered), error.map(str::to_owned), record_id],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn has_outage_alerts(&self, monitor_id: Uuid, episode_start: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM alert_records WHERE monitor_id = ? AND episode_start = ? \
                 AND kind IN ('outage_started', 'outage_persists')",
                params![monitor_id.to_string(), ts(episode_start)],
            )
            .await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    async fn close_episode(&self, monitor_id: Uuid, episode_start: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.get_conn().await?;
        let closed = conn
            .execute(
                "UPDATE alert_records SET closed = 1 WHERE monitor_id = ? AND episode_start = ? AND closed = 0",
                params![monitor_id.to_string(), ts(episode_start)],
            )
            .await?;
        Ok(closed as usize)
    }

    async fn records_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<AlertRecord>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM alert_records WHERE monitor_id = ? ORDER BY id"),
                params![monitor_id.to_string()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }
}
