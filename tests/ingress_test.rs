mod common;

use chrono::Duration;
use common::{msg, reading, t0, Harness, RACK};
use intellirack::notification::NfcEventType;
use intellirack::store::SlotStatusStore;
use intellirack::{route_frame, DeviceLanes, IngestOutcome, IngressError, RealtimeEvent};
use std::time::Duration as StdDuration;
use tracing::Span;

const NS: &str = "intellirack";

#[tokio::test]
async fn test_data_frame_flows_into_log() {
    let h = Harness::new().await;
    let message = route_frame(
        NS,
        "intellirack/rack-1/data",
        br#"{"deviceId":"rack-1","slotId":3,"ingredientName":"Cocoa","weight":"410.5","status":"GOOD","tagUID":"04AABB"}"#,
    )
    .unwrap();

    let report = h.pipeline.handle_at(message, t0()).await;

    assert_eq!(report.outcome, IngestOutcome::Classified);
    assert!(report.logged);
    let logs = h.store.logs_for(RACK, "3").await;
    assert_eq!(logs[0].ingredient, "Cocoa");
    assert_eq!(logs[0].weight, 410.5);
    assert_eq!(logs[0].tag_uid.as_deref(), Some("04AABB"));
}

#[tokio::test]
async fn test_response_frame_sets_slot_tag() {
    let h = Harness::new().await;
    let mut realtime = h.hub.subscribe();
    let message = route_frame(
        NS,
        "intellirack/rack-1/response",
        br#"{"slotId":"S4","command":"nfc_read","response":{"uid":"04:a1:b2:c3","ingredient":"Yeast"}}"#,
    )
    .unwrap();

    let report = h.pipeline.handle_at(message, t0()).await;

    assert_eq!(report.outcome, IngestOutcome::Command);
    assert_eq!(report.command, Some(NfcEventType::Read));
    let slot = h.store.get(RACK, "S4").await.unwrap().unwrap();
    assert_eq!(slot.tag_uid.as_deref(), Some("04A1B2C3"));
    assert_eq!(slot.ingredient.as_deref(), Some("Yeast"));

    let mut channels = Vec::new();
    while let Ok(event) = realtime.try_recv() {
        if let RealtimeEvent::NfcEvent(push) = &event {
            assert_eq!(push.tag_uid.as_deref(), Some("04A1B2C3"));
        }
        channels.push(event.channel());
    }
    assert_eq!(channels, vec!["nfcEvent", "commandResponse"]);
}

#[tokio::test]
async fn test_status_frame_is_heartbeat_only() {
    let h = Harness::new().await;
    let message = route_frame(
        NS,
        "intellirack/rack-1/status",
        br#"{"slotId":"S1","ingredient":"Flour","weight":100}"#,
    )
    .unwrap();

    let report = h.pipeline.handle_at(message, t0()).await;

    assert_eq!(report.outcome, IngestOutcome::Heartbeat);
    assert!(h.store.logs_for(RACK, "S1").await.is_empty());
    assert_eq!(h.live.last_heartbeat(RACK), Some(t0()));
}

#[test]
fn test_malformed_frames_are_rejected() {
    assert!(matches!(
        route_frame(NS, "intellirack/rack-1/data", b"not json"),
        Err(IngressError::MalformedPayload(_))
    ));
    assert!(matches!(
        route_frame(NS, "intellirack/rack-1/data", br#"{"weight":5}"#),
        Err(IngressError::MalformedPayload(_))
    ));
    assert!(matches!(
        route_frame(NS, "intellirack/rack-1/data", br#"{"slotId":"S1","weight":"heavy"}"#),
        Err(IngressError::MalformedPayload(_))
    ));
    assert!(matches!(
        route_frame(NS, "intellirack/rack-1/data", br#"{"deviceId":"rack-2","slotId":"S1"}"#),
        Err(IngressError::MalformedPayload(_))
    ));
    assert!(matches!(
        route_frame(NS, "elsewhere/rack-1/data", br#"{"slotId":"S1"}"#),
        Err(IngressError::InvalidTopic(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lane_keeps_device_order() {
    let h = Harness::new().await;
    let lanes = DeviceLanes::new(h.pipeline.clone(), 4, StdDuration::from_secs(60));

    // Given more readings than the lane holds, with rising timestamps
    for i in 0..20 {
        let mut next = reading("Flour", 500.0 + 20.0 * i as f64);
        next.timestamp = Some(t0() + Duration::seconds(i));
        lanes.dispatch(msg(next), Span::none()).await;
    }
    lanes.close().await;

    // Then none was seen as stale, so every one was logged in order
    let weights: Vec<f64> = h
        .store
        .logs_for(RACK, "S1")
        .await
        .iter()
        .map(|log| log.weight)
        .collect();
    let expected: Vec<f64> = (0..20).map(|i| 500.0 + 20.0 * i as f64).collect();
    assert_eq!(weights, expected);
}

#[tokio::test]
async fn test_idle_lane_is_retired_and_respawned() {
    let h = Harness::new().await;
    let lanes = DeviceLanes::new(h.pipeline.clone(), 8, StdDuration::from_millis(20));

    lanes.dispatch(msg(reading("Flour", 500.0)), Span::none()).await;
    assert_eq!(lanes.active_lanes(), 1);

    tokio::time::timeout(StdDuration::from_secs(2), async {
        while lanes.active_lanes() > 0 {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    lanes.dispatch(msg(reading("Flour", 900.0)), Span::none()).await;
    lanes.close().await;

    assert_eq!(h.store.logs_for(RACK, "S1").await.len(), 2);
}
