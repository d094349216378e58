mod common;

use chrono::Duration;
use common::{t0, Harness, RACK};
use intellirack::ingress::Heartbeat;
use intellirack::store::DeviceRegistry;
use intellirack::{AlertType, Liveness, RealtimeEvent, TelemetryMessage};

fn heartbeat() -> TelemetryMessage {
    TelemetryMessage::Heartbeat(Heartbeat {
        device_id: RACK.to_string(),
        ip_address: Some("10.0.0.12".to_string()),
        firmware_version: Some("1.4.2".to_string()),
    })
}

#[tokio::test]
async fn test_offline_exactly_once_after_threshold() {
    let h = Harness::new().await;
    h.pipeline.handle_at(heartbeat(), t0()).await;

    // At exactly T + threshold the device is still online
    let report = h.monitor.sweep_at(t0() + Duration::seconds(30)).await;
    assert!(report.went_offline.is_empty());

    // One millisecond later it goes offline
    let report = h
        .monitor
        .sweep_at(t0() + Duration::seconds(30) + Duration::milliseconds(1))
        .await;
    assert_eq!(report.went_offline, vec![RACK.to_string()]);
    assert_eq!(h.monitor.liveness(RACK), Some(Liveness::Offline));

    // Later sweeps do not repeat the transition or the alert
    for secs in [40, 60, 120] {
        let report = h.monitor.sweep_at(t0() + Duration::seconds(secs)).await;
        assert!(report.went_offline.is_empty());
    }

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Offline);

    let device = h.store.find_by_rack_id(RACK).await.unwrap().unwrap();
    assert!(!device.is_online);
    assert_eq!(device.ip_address.as_deref(), Some("10.0.0.12"));
}

#[tokio::test]
async fn test_offline_transition_pushes_device_status() {
    let h = Harness::new().await;
    h.pipeline.handle_at(heartbeat(), t0()).await;
    let mut realtime = h.hub.subscribe();

    h.monitor.sweep_at(t0() + Duration::minutes(5)).await;

    match realtime.recv().await.unwrap() {
        RealtimeEvent::DeviceStatus(push) => {
            assert_eq!(push.device_id, RACK);
            assert!(!push.is_online);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(realtime.recv().await.unwrap().channel(), "alert");
}

#[tokio::test]
async fn test_heartbeat_after_outage_brings_device_back() {
    let h = Harness::new().await;
    h.pipeline.handle_at(heartbeat(), t0()).await;
    h.monitor.sweep_at(t0() + Duration::minutes(1)).await;

    let back = t0() + Duration::minutes(2);
    h.pipeline.handle_at(heartbeat(), back).await;
    let report = h.monitor.sweep_at(back + Duration::seconds(5)).await;

    assert_eq!(report.came_online, vec![RACK.to_string()]);
    assert_eq!(h.monitor.liveness(RACK), Some(Liveness::Online));
    let device = h.store.find_by_rack_id(RACK).await.unwrap().unwrap();
    assert!(device.is_online);

    // OFFLINE stays open until acknowledged; ONLINE is its own key
    let open: Vec<_> = h
        .store
        .open_alerts()
        .await
        .into_iter()
        .map(|a| a.alert_type)
        .collect();
    assert_eq!(open, vec![AlertType::Offline, AlertType::Online]);
}

#[tokio::test]
async fn test_devices_never_heard_from_are_not_swept() {
    let h = Harness::new().await;

    let report = h.monitor.sweep_at(t0()).await;

    assert_eq!(report.checked, 0);
    assert!(h.store.alerts().await.is_empty());
}
