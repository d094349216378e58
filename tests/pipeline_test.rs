mod common;

use chrono::Duration;
use common::{msg, reading, t0, with_status, Harness, OWNER, RACK};
use intellirack::model::SENSOR_ERROR_STATUS;
use intellirack::store::{DeviceRegistry, SlotStatusStore};
use intellirack::{AlertType, EventTag, IngestOutcome, RealtimeEvent};

#[tokio::test]
async fn test_first_reading_is_logged() {
    let h = Harness::new().await;

    let report = h.pipeline.handle_at(msg(reading("Flour", 750.0)), t0()).await;

    assert_eq!(report.outcome, IngestOutcome::Classified);
    assert!(report.logged);
    assert!(report.alerts_created.is_empty());
    let logs = h.store.logs_for(RACK, "S1").await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].weight, 750.0);
    assert_eq!(logs[0].user_id.as_deref(), Some(OWNER));
}

#[tokio::test]
async fn test_small_change_is_not_logged() {
    let h = Harness::new().await;
    h.pipeline.handle_at(msg(reading("Flour", 500.0)), t0()).await;

    // Given |delta| <= 10 and nothing else changed
    let report = h
        .pipeline
        .handle_at(msg(reading("Flour", 508.0)), t0() + Duration::seconds(5))
        .await;

    // Then no log and no alert
    assert!(!report.logged);
    assert!(report.alerts_created.is_empty());
    assert_eq!(h.store.logs_for(RACK, "S1").await.len(), 1);
    assert!(h.store.alerts().await.is_empty());

    // Slot row still tracks the latest weight
    let slot = h.store.get(RACK, "S1").await.unwrap().unwrap();
    assert_eq!(slot.weight, Some(508.0));
}

#[tokio::test]
async fn test_implausible_weight_flags_sensor_error() {
    let h = Harness::new().await;
    h.pipeline.handle_at(msg(reading("Flour", 19_000.0)), t0()).await;

    let report = h
        .pipeline
        .handle_at(msg(reading("Flour", 25_000.0)), t0() + Duration::seconds(5))
        .await;

    let decision = report.decision.unwrap();
    assert_eq!(decision.logged_status, SENSOR_ERROR_STATUS);
    assert_eq!(decision.alert_type, Some(AlertType::SensorError));
    assert!(report.logged);
    assert_eq!(report.alerts_created, vec![AlertType::SensorError]);
}

#[tokio::test]
async fn test_negative_weight_alerts_without_logging() {
    let h = Harness::new().await;
    h.pipeline.handle_at(msg(reading("Flour", 500.0)), t0()).await;

    let report = h
        .pipeline
        .handle_at(msg(reading("Flour", -5.0)), t0() + Duration::seconds(5))
        .await;

    // Never persisted, but the SENSOR_ERROR alert still fires
    assert!(!report.logged);
    assert_eq!(h.store.logs_for(RACK, "S1").await.len(), 1);
    assert_eq!(report.alerts_created, vec![AlertType::SensorError]);
}

#[tokio::test]
async fn test_restock_creates_one_alert() {
    let h = Harness::new().await;
    h.pipeline.handle_at(msg(reading("Rice", 500.0)), t0()).await;

    let report = h
        .pipeline
        .handle_at(msg(reading("Rice", 650.0)), t0() + Duration::seconds(5))
        .await;

    let decision = report.decision.unwrap();
    assert_eq!(decision.event_tag, Some(EventTag::Restock));
    assert_eq!(decision.alert_type, Some(AlertType::Restock));
    let logs = h.store.logs_for(RACK, "S1").await;
    assert_eq!(logs.last().unwrap().event_tag, Some(EventTag::Restock));

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Restock);
}

#[tokio::test]
async fn test_batch_usage_creates_one_alert() {
    let h = Harness::new().await;
    h.pipeline.handle_at(msg(reading("Rice", 2000.0)), t0()).await;

    let report = h
        .pipeline
        .handle_at(msg(reading("Rice", 800.0)), t0() + Duration::seconds(5))
        .await;

    let decision = report.decision.unwrap();
    assert_eq!(decision.event_tag, Some(EventTag::BatchUsage));
    assert_eq!(decision.alert_type, Some(AlertType::BatchUsage));

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::BatchUsage);
}

#[tokio::test]
async fn test_repeated_empty_status_keeps_one_open_alert() {
    let h = Harness::new().await;

    let first = h
        .pipeline
        .handle_at(with_status(reading("Sugar", 0.0), "EMPTY"), t0())
        .await;
    let second = h
        .pipeline
        .handle_at(
            with_status(reading("Sugar", 0.0), "EMPTY"),
            t0() + Duration::seconds(5),
        )
        .await;

    assert_eq!(first.alerts_created, vec![AlertType::Empty]);
    assert!(second.alerts_created.is_empty());
    assert_eq!(second.alerts_suppressed, vec![AlertType::Empty]);

    let open = h.store.open_alerts().await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, AlertType::Empty);
}

#[tokio::test]
async fn test_acknowledged_alert_can_fire_again() {
    let h = Harness::new().await;
    h.pipeline
        .handle_at(with_status(reading("Sugar", 40.0), "LOW"), t0())
        .await;
    let alert = h.store.open_alerts().await.remove(0);
    assert!(h.alerts.acknowledge(alert.id).await.unwrap());

    let report = h
        .pipeline
        .handle_at(
            with_status(reading("Sugar", 40.0), "LOW"),
            t0() + Duration::seconds(5),
        )
        .await;

    assert_eq!(report.alerts_created, vec![AlertType::LowStock]);
    assert_eq!(h.store.alerts().await.len(), 2);
    assert_eq!(h.store.open_alerts().await.len(), 1);
}

#[tokio::test]
async fn test_reading_pushes_update_and_marks_device_online() {
    let h = Harness::new().await;
    let mut realtime = h.hub.subscribe();

    h.pipeline.handle_at(msg(reading("Oats", 320.0)), t0()).await;

    match realtime.recv().await.unwrap() {
        RealtimeEvent::Update(push) => {
            assert_eq!(push.device_id, RACK);
            assert_eq!(push.weight, Some(320.0));
            assert!(push.is_online);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(realtime.recv().await.unwrap().channel(), "deviceStatus");

    let device = h.store.find_by_rack_id(RACK).await.unwrap().unwrap();
    assert!(device.is_online);
    assert_eq!(device.last_seen, Some(t0()));
    assert_eq!(h.live.last_heartbeat(RACK), Some(t0()));
}

#[tokio::test]
async fn test_same_timestamp_is_logged_once() {
    let h = Harness::new().await;
    let mut first = reading("Flour", 500.0);
    first.timestamp = Some(t0());
    let mut replayed = reading("Flour", 900.0);
    replayed.timestamp = Some(t0());

    h.pipeline.handle_at(msg(first), t0()).await;
    let report = h
        .pipeline
        .handle_at(msg(replayed), t0() + Duration::seconds(1))
        .await;

    assert_eq!(report.outcome, IngestOutcome::Stale);
    assert!(!report.logged);
    assert!(report.failures.is_empty());
    assert!(report.alerts_created.is_empty());
    assert_eq!(h.store.logs_for(RACK, "S1").await.len(), 1);
    assert!(h.store.alerts().await.is_empty());
}

#[tokio::test]
async fn test_redelivered_older_reading_is_ignored() {
    let h = Harness::new().await;
    let t1 = t0();
    let t2 = t0() + Duration::minutes(1);
    let mut full = reading("Rice", 2000.0);
    full.timestamp = Some(t1);
    let mut used = reading("Rice", 800.0);
    used.timestamp = Some(t2);

    h.pipeline.handle_at(msg(full.clone()), t1).await;
    let report = h.pipeline.handle_at(msg(used), t2).await;
    assert_eq!(report.alerts_created, vec![AlertType::BatchUsage]);

    // Given the broker redelivers the first reading after the second
    let report = h
        .pipeline
        .handle_at(msg(full), t2 + Duration::seconds(5))
        .await;

    // Then slot state stays on the newer reading and no RESTOCK appears
    assert_eq!(report.outcome, IngestOutcome::Stale);
    assert!(report.decision.is_none());
    assert!(report.alerts_created.is_empty());
    let slot = h.store.get(RACK, "S1").await.unwrap().unwrap();
    assert_eq!(slot.weight, Some(800.0));
    let types: Vec<_> = h.store.alerts().await.iter().map(|a| a.alert_type).collect();
    assert_eq!(types, vec![AlertType::BatchUsage]);
    assert_eq!(h.store.logs_for(RACK, "S1").await.len(), 2);
}

#[tokio::test]
async fn test_redelivered_critical_reading_raises_nothing_after_ack() {
    let h = Harness::new().await;
    let mut empty = reading("Salt", 0.0);
    empty.timestamp = Some(t0());
    empty.status = Some("EMPTY".to_string());

    h.pipeline.handle_at(msg(empty.clone()), t0()).await;
    let alert = h.store.open_alerts().await.remove(0);
    h.alerts.acknowledge(alert.id).await.unwrap();

    let report = h
        .pipeline
        .handle_at(msg(empty), t0() + Duration::seconds(30))
        .await;

    assert_eq!(report.outcome, IngestOutcome::Stale);
    assert!(report.alerts_created.is_empty());
    assert!(h.store.open_alerts().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readings_for_one_slot_log_once() {
    let h = Harness::new().await;

    // Given 16 identical readings for a fresh slot arriving together
    let mut handles = Vec::new();
    for i in 0..16 {
        let pipeline = h.pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .handle_at(msg(reading("Flour", 500.0)), t0() + Duration::milliseconds(i))
                .await
        }));
    }
    let mut logged = 0;
    for handle in handles {
        if handle.await.unwrap().logged {
            logged += 1;
        }
    }

    // Then only the first one through the slot lock is logged
    assert_eq!(logged, 1);
    assert_eq!(h.store.logs_for(RACK, "S1").await.len(), 1);
}
