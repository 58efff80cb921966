mod common;

use std::sync::Arc;
use tempfile::{TempDir, tempdir};

use common::{RecordingNotifier, at, t0, test_config};
use deadman::store::migrations::run_migrations;
use deadman::store::pool::open_pool;
use deadman::{EpisodeKind, LibsqlStore, ManualClock, Monitor, MonitorStatus, Orchestrator};

async fn libsql_engine() -> (Orchestrator, Arc<RecordingNotifier>, TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deadman.db");
    let pool = open_pool(path.to_str().unwrap(), 4).await.unwrap();
    let conn = pool.get().await.unwrap();
    run_migrations(&conn).await.unwrap();
    drop(conn);

    let store = Arc::new(LibsqlStore::new_from_pool(pool));
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Orchestrator::new(test_config(), store.clone(), store, notifier.clone(), clock);
    (engine, notifier, dir)
}

#[tokio::test]
async fn test_full_episode_against_libsql() {
    let (engine, notifier, _dir) = libsql_engine().await;
    let monitor = Monitor::new("acct-1", "nightly backup", 300, t0())
        .with_grace_period(60)
        .with_email("ops@example.com")
        .with_webhook("https://hooks.example.com/deadman");
    let monitor = engine.register_monitor(monitor).await.unwrap();

    engine.run_scan_tick(Some(at(361))).await;
    engine.run_scan_tick(Some(at(500))).await;
    engine.wait_idle().await;

    let status = engine.get_status(monitor.id).await.unwrap();
    assert_eq!(status.status, MonitorStatus::Down);
    assert_eq!(status.outage_started_at, Some(at(360)));
    assert_eq!(notifier.count(EpisodeKind::OutageStarted), 2);

    engine.handle_ping(monitor.id, Some(at(600))).await.unwrap();
    engine.wait_idle().await;
    assert_eq!(notifier.count(EpisodeKind::Recovered), 2);

    let records = engine.alert_history(monitor.id).await.unwrap();
    assert_eq!(records.len(), 4);
    let outage: Vec<_> = records.iter().filter(|r| r.kind == EpisodeKind::OutageStarted).collect();
    assert!(outage.iter().all(|r| r.closed && r.delivered && r.episode_start == at(360)));
    assert!(records.iter().any(|r| r.channel.kind() == "email"));

    let status = engine.get_status(monitor.id).await.unwrap();
    assert_eq!(status.status, MonitorStatus::Up);
    assert_eq!(status.last_ping_at, Some(at(600)));
    assert_eq!(status.outage_started_at, None);
}

#[tokio::test]
async fn test_from_config_migrates_and_runs() {
    let dir = tempdir().unwrap();
    let mut config = test_config();
    config.database.path = dir.path().join("engine.db").to_string_lossy().to_string();

    let engine = Orchestrator::from_config(config.clone()).await.unwrap();
    let monitor = engine
        .register_monitor(Monitor::new("acct-1", "silent", 60, engine.now()).with_grace_period(0))
        .await
        .unwrap();
    assert_eq!(engine.get_status(monitor.id).await.unwrap().status, MonitorStatus::Pending);
    engine.shutdown().await;

    // Reopening runs the migrations again without touching existing rows.
    let engine = Orchestrator::from_config(config).await.unwrap();
    assert_eq!(engine.get_status(monitor.id).await.unwrap().id, monitor.id);
    engine.shutdown().await;
}
