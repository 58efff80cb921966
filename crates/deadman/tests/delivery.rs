mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, RecordingNotifier, at, t0, test_config};
use deadman::{
    AlertDispatcher, AlertLog, DispatchPolicy, EpisodeKind, ManualClock, MemoryStore, Monitor, MonitorStatus,
    MonitorStore, NotifyError,
};

fn fast_policy() -> DispatchPolicy {
    DispatchPolicy {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: false,
        ..DispatchPolicy::default()
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new();
    let monitor = h.monitor(300, 60).await;
    h.notifier.fail_next([
        Err(NotifyError::Transient("502 from hook".into())),
        Err(NotifyError::Transient("timeout".into())),
    ]);

    h.scan(361).await;

    assert_eq!(h.notifier.attempts(), 3);
    assert_eq!(h.notifier.kinds(), vec![EpisodeKind::OutageStarted]);

    let records = h.engine.alert_history(monitor.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempt_count, 3);
    assert!(records[0].delivered);
    assert_eq!(records[0].last_error, None);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let h = Harness::new();
    let monitor = h.monitor(300, 60).await;
    h.notifier.fail_next((0..3).map(|_| Err(NotifyError::Transient("down".into()))));

    let outcome = h.scan(361).await;
    assert!(matches!(outcome, deadman::SweepOutcome::Completed(_)));

    assert_eq!(h.notifier.attempts(), 3);
    let records = h.engine.alert_history(monitor.id).await.unwrap();
    assert_eq!(records[0].attempt_count, 3);
    assert!(!records[0].delivered);
    assert!(records[0].last_error.as_deref().unwrap().contains("down"));

    // The monitor is still DOWN and the scanner does not re-alert on its own.
    h.scan(2_000).await;
    assert_eq!(h.notifier.attempts(), 3);
    assert_eq!(h.engine.get_status(monitor.id).await.unwrap().status, MonitorStatus::Down);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = Harness::new();
    let monitor = h.monitor(300, 60).await;
    h.notifier.fail_next([Err(NotifyError::Permanent("malformed webhook URL".into()))]);

    h.scan(361).await;

    assert_eq!(h.notifier.attempts(), 1);
    let records = h.engine.alert_history(monitor.id).await.unwrap();
    assert_eq!(records[0].attempt_count, 1);
    assert!(!records[0].delivered);

    // An undelivered alert still counts as "someone was alerted".
    h.ping(monitor.id, 400).await.unwrap();
    assert_eq!(h.notifier.kinds(), vec![EpisodeKind::Recovered]);
}

#[tokio::test]
async fn test_channels_fail_independently() {
    let h = Harness::new();
    let monitor = Monitor::new("acct-1", "billing export", 300, t0())
        .with_grace_period(60)
        .with_email("ops@example.com")
        .with_webhook("https://hooks.example.com/deadman");
    let monitor = h.engine.register_monitor(monitor).await.unwrap();

    // Email is attempted first.
    h.notifier.fail_next([Err(NotifyError::Permanent("mailbox rejected".into()))]);
    h.scan(361).await;

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "webhook");

    let records = h.engine.alert_history(monitor.id).await.unwrap();
    assert_eq!(records.len(), 2);
    let email = records.iter().find(|r| r.channel.kind() == "email").unwrap();
    let webhook = records.iter().find(|r| r.channel.kind() == "webhook").unwrap();
    assert!(!email.delivered);
    assert!(webhook.delivered);
}

#[tokio::test]
async fn test_monitor_without_channels_is_skipped() {
    let h = Harness::new();
    let monitor = Monitor::new("acct-1", "silent", 300, t0()).with_grace_period(60);
    let monitor = h.engine.register_monitor(monitor).await.unwrap();

    h.scan(361).await;
    assert_eq!(h.engine.get_status(monitor.id).await.unwrap().status, MonitorStatus::Down);
    assert_eq!(h.notifier.attempts(), 0);
    assert!(h.engine.alert_history(monitor.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_without_alert_records_is_silent() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(at(400)));
    let (dispatcher, _workers) =
        AlertDispatcher::spawn(store.clone(), store.clone(), notifier.clone(), clock, fast_policy());

    let monitor = Monitor::new("acct-1", "job", 300, t0()).with_webhook("https://hooks.example.com/x");
    let monitor = store.create(&monitor).await.unwrap();

    dispatcher.dispatch(&monitor, EpisodeKind::Recovered, Some(at(360)));
    dispatcher.wait_idle().await;

    assert_eq!(notifier.attempts(), 0);
    assert!(store.records_for_monitor(monitor.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_outage_job_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(at(400)));
    let (dispatcher, _workers) =
        AlertDispatcher::spawn(store.clone(), store.clone(), notifier.clone(), clock, fast_policy());

    // The stored monitor is UP again by the time the job runs.
    let mut monitor = store
        .create(&Monitor::new("acct-1", "job", 300, t0()).with_webhook("https://hooks.example.com/x"))
        .await
        .unwrap();
    monitor.status = MonitorStatus::Up;
    monitor.last_ping_at = Some(at(390));
    let monitor = store.save(&monitor, monitor.version).await.unwrap();

    dispatcher.dispatch(&monitor, EpisodeKind::OutageStarted, Some(at(360)));
    dispatcher.wait_idle().await;

    assert_eq!(notifier.attempts(), 0);
    assert_eq!(dispatcher.pending(), 0);
}

#[tokio::test]
async fn test_closed_episode_stops_retries() {
    let store = Arc::new(MemoryStore::new());
    let monitor = store.create(&Monitor::new("acct-1", "job", 300, t0())).await.unwrap();
    let channel = deadman::Channel::Webhook { url: "https://hooks.example.com/x".into() };

    let record = store.open_record(monitor.id, at(360), EpisodeKind::OutageStarted, &channel, at(361)).await.unwrap();
    assert!(store.record_attempt(record.id, at(361), false, Some("timeout")).await.unwrap());

    assert_eq!(store.close_episode(monitor.id, at(360)).await.unwrap(), 1);
    assert!(!store.record_attempt(record.id, at(370), true, None).await.unwrap());

    let records = store.records_for_monitor(monitor.id).await.unwrap();
    assert_eq!(records[0].attempt_count, 1);
    assert!(!records[0].delivered);
    assert!(records[0].closed);
}

#[tokio::test]
async fn test_recovery_during_backoff_abandons_outage_retries() {
    let mut config = test_config();
    config.alerts.max_attempts = 5;
    config.alerts.initial_backoff_ms = 200;
    config.alerts.max_backoff_ms = 200;
    let h = Harness::with_config(config);
    let monitor = h.monitor(300, 60).await;
    h.notifier.fail_next([Err(NotifyError::Transient("502 from hook".into()))]);

    h.clock.set(at(361));
    h.engine.run_scan_tick(Some(at(361))).await;
    // First attempt has failed, the worker is now sleeping before the retry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifier.attempts(), 1);

    h.ping(monitor.id, 362).await.unwrap();

    assert_eq!(h.notifier.count(EpisodeKind::OutageStarted), 0);
    let records = h.engine.alert_history(monitor.id).await.unwrap();
    let outage = records.iter().find(|r| r.kind == EpisodeKind::OutageStarted).unwrap();
    assert_eq!(outage.attempt_count, 1);
    assert!(!outage.delivered);
    assert!(outage.closed);
}

#[tokio::test]
async fn test_expiry_notice_can_be_disabled() {
    let mut config = test_config();
    config.alerts.notify_on_expiry = false;
    let h = Harness::with_config(config);
    let monitor = Monitor::new("acct-1", "job", 300, t0())
        .with_webhook("https://hooks.example.com/x")
        .expiring_at(at(50));
    h.engine.register_monitor(monitor).await.unwrap();

    h.scan(60).await;
    assert!(h.notifier.sent().is_empty());
}
