mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{eventually, fast_settings, spawn, spawn_with, within, FakeDispatch, RecordingPlatform};
use driver_tracker::engine::tracker::TrackerPhase;
use driver_tracker::error::AppError;
use driver_tracker::manifest::NoticeKind;
use driver_tracker::models::location::LocationFix;
use serde_json::json;

#[tokio::test]
async fn going_online_connects_and_announces_the_driver() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();

    let init = dispatch.next_of_type("driver_init").await;
    assert_eq!(init["driver_id"], 7);
    assert_eq!(init["driver_status"], "READY");
    assert_eq!(init["driver_stationed_at"], json!(null));
    assert_eq!(init["driver_orders"], json!([]));

    eventually("connected status", || {
        harness.tracker.status().phase == TrackerPhase::OnlineConnected
    })
    .await;

    let status = harness.tracker.status();
    assert!(status.online);
    assert!(status.heartbeat_active);
    assert!(status.watcher_active);
    assert_eq!(harness.platform.foreground_starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.platform.channels.lock().unwrap()[0].id, "orders_channel");
}

#[tokio::test]
async fn go_online_twice_keeps_a_single_connection() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    let later = dispatch.collect_for(Duration::from_millis(400)).await;
    assert!(later.iter().all(|message| message["type"] != "driver_init"));
    assert_eq!(dispatch.connections(), 1);
    assert_eq!(harness.platform.foreground_starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn startup_continues_when_foreground_indicator_fails() {
    let mut dispatch = FakeDispatch::start().await;
    let platform = RecordingPlatform {
        fail_foreground: true,
        ..RecordingPlatform::default()
    };
    let harness = spawn_with(fast_settings(&dispatch.url), platform);

    harness.tracker.go_online().await.unwrap();

    dispatch.next_of_type("driver_init").await;
    assert!(harness.tracker.status().watcher_active);
}

#[tokio::test]
async fn live_fixes_are_pushed_while_connected() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;
    eventually("connected status", || harness.tracker.status().connected).await;

    harness.locations.push(LocationFix::new(14.5424, 49.1242));

    let update = dispatch.next_of_type("location_update").await;
    assert_eq!(update["driver_id"], 7);
    assert_eq!(update["location"]["lat"], 14.5424);
    assert_eq!(update["location"]["lng"], 49.1242);
    assert!(update["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn heartbeat_reports_the_latest_fix() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;
    eventually("connected status", || harness.tracker.status().connected).await;

    harness.locations.push(LocationFix::new(14.5424, 49.1242));
    harness.locations.push(LocationFix::new(14.5500, 49.1300));

    eventually("a heartbeat", || {
        harness
            .metrics
            .heartbeats_total
            .with_label_values(&["sent"])
            .get()
            >= 1
    })
    .await;

    let messages = dispatch.collect_for(Duration::from_millis(100)).await;
    let last = messages
        .iter()
        .rev()
        .find(|message| message["type"] == "location_update")
        .expect("a location update");
    assert_eq!(last["location"]["lat"], 14.55);
    assert_eq!(last["location"]["lng"], 49.13);
}

#[tokio::test]
async fn heartbeat_without_a_fix_sends_nothing() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    let messages = dispatch.collect_for(Duration::from_millis(800)).await;

    assert!(messages.iter().all(|message| message["type"] != "location_update"));
    assert!(
        harness
            .metrics
            .heartbeats_total
            .with_label_values(&["skipped"])
            .get()
            >= 1
    );
}

#[tokio::test]
async fn new_order_is_claimed_and_listed_first() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    dispatch.push(json!({
        "type": "new_order_nearby",
        "order": { "order_id": 42, "restaurant_id": 7, "restaurant": { "name": "Mandi House" } }
    }));

    let claim = dispatch.next_of_type("update_orders").await;
    assert_eq!(
        claim,
        json!({
            "type": "update_orders",
            "driver_id": 7,
            "order_id": 42,
            "driver_stationed_at": 7,
            "driver_status": "PICKING_UP"
        })
    );

    eventually("order in manifest", || !harness.tracker.orders().is_empty()).await;
    assert_eq!(harness.tracker.orders()[0].order_id, 42);
    assert_eq!(harness.tracker.status().driver.stationed_at, Some(7));

    eventually("new order notification", || {
        harness.platform.notification_titles() == vec!["New order nearby".to_string()]
    })
    .await;
    let body = harness.platform.notifications.lock().unwrap()[0].body.clone();
    assert!(body.contains("Mandi House"));
}

#[tokio::test]
async fn delivered_order_frees_the_driver() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    dispatch.push(json!({ "type": "new_order_nearby", "order": { "order_id": 42, "restaurant_id": 7 } }));
    dispatch.next_of_type("update_orders").await;

    dispatch.push(json!({ "type": "order_status_updated", "order_id": 42, "order_status": "delivered" }));

    let free = dispatch.next_of_type("free_driver").await;
    assert_eq!(free["driver_id"], 7);
    assert_eq!(free["driver_orders"], json!([]));
    assert_eq!(free["driver_stationed_at"], json!(null));
    assert_eq!(free["driver_status"], "READY");

    eventually("empty manifest", || harness.tracker.orders().is_empty()).await;

    let later = dispatch.collect_for(Duration::from_millis(200)).await;
    assert!(later.iter().all(|message| message["type"] != "free_driver"));
}

#[tokio::test]
async fn ready_status_notifies_and_updates_the_order() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    dispatch.push(json!({ "type": "new_order_nearby", "order": { "order_id": 5, "restaurant_id": 2 } }));
    dispatch.next_of_type("update_orders").await;
    dispatch.push(json!({ "type": "order_status_updated", "order_id": 5, "order_status": "ready" }));

    eventually("ready status applied", || {
        harness
            .tracker
            .orders()
            .first()
            .is_some_and(|order| order.order_status == "ready")
    })
    .await;
    eventually("order updated notification", || {
        harness
            .platform
            .notification_titles()
            .contains(&"Order updated".to_string())
    })
    .await;
}

#[tokio::test]
async fn updated_order_merges_and_unknown_messages_are_ignored() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));
    let mut notices = harness.tracker.subscribe_notices();

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    dispatch.push(json!({ "type": "new_order_nearby", "order": { "order_id": 5, "restaurant_id": 2, "user_name": "Huda" } }));
    dispatch.push(json!({ "type": "surge_pricing", "factor": 2 }));
    dispatch.push(json!({ "type": "updated_order", "order": { "order_id": 5, "order_notes": "gate 3" } }));
    dispatch.push(json!({ "type": "updated_order", "order": { "order_id": 99, "order_notes": "x" } }));

    eventually("merged order", || {
        harness
            .tracker
            .orders()
            .first()
            .is_some_and(|order| order.order_notes.as_deref() == Some("gate 3"))
    })
    .await;

    let order = harness.tracker.orders()[0].clone();
    assert_eq!(order.user_name.as_deref(), Some("Huda"));
    assert_eq!(harness.tracker.orders().len(), 1);

    let mut kinds = Vec::new();
    while kinds.len() < 3 {
        kinds.push(within("a notice", notices.recv()).await.unwrap().kind);
    }
    assert_eq!(
        kinds,
        vec![NoticeKind::OrderAdded, NoticeKind::OrderUpdated, NoticeKind::OrderNotFound]
    );
}

#[tokio::test]
async fn lost_connection_reconnects_once_while_online() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    dispatch.drop_connection();

    eventually("close handshake reply", || dispatch.close_codes() == vec![Some(1011)]).await;

    let init = dispatch.next_of_type("driver_init").await;
    assert_eq!(init["driver_id"], 7);
    assert_eq!(dispatch.connections(), 2);
    assert_eq!(harness.metrics.reconnects_total.get(), 1);

    eventually("reconnected status", || {
        harness.tracker.status().phase == TrackerPhase::OnlineConnected
    })
    .await;

    dispatch.collect_for(Duration::from_millis(500)).await;
    assert_eq!(dispatch.connections(), 2);
}

#[tokio::test]
async fn going_offline_tears_everything_down_without_reconnecting() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    harness.tracker.go_offline().await.unwrap();

    let status = harness.tracker.status();
    assert_eq!(status.phase, TrackerPhase::Offline);
    assert!(!status.online);
    assert!(!status.heartbeat_active);
    assert!(!status.watcher_active);
    assert!(!status.reconnect_pending);
    assert_eq!(harness.platform.foreground_stops.load(Ordering::SeqCst), 1);

    eventually("watcher released", || harness.locations.watcher_count() == 0).await;
    eventually("normal closure", || dispatch.close_codes() == vec![Some(1000)]).await;

    let messages = dispatch.collect_for(Duration::from_millis(700)).await;
    assert!(messages.iter().all(|message| message["type"] != "location_update"));
    assert_eq!(dispatch.connections(), 1);
    assert_eq!(harness.metrics.reconnects_total.get(), 0);

    harness.tracker.go_offline().await.unwrap();
    assert_eq!(harness.platform.foreground_stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn offline_then_online_starts_a_fresh_session_link() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    harness.tracker.go_offline().await.unwrap();
    harness.tracker.go_online().await.unwrap();

    dispatch.next_of_type("driver_init").await;
    eventually("connected status", || harness.tracker.status().connected).await;
    assert!(harness.tracker.status().online);
}

#[tokio::test]
async fn unreachable_server_keeps_retrying_while_online() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    drop(listener);

    let harness = spawn(fast_settings(&url));
    harness.tracker.go_online().await.unwrap();

    eventually("two reconnect attempts", || {
        harness.metrics.reconnects_total.get() >= 2
    })
    .await;
    assert_eq!(
        harness.tracker.status().phase,
        TrackerPhase::OnlineDisconnected
    );

    harness.tracker.go_offline().await.unwrap();
    let attempts = harness.metrics.reconnects_total.get();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.metrics.reconnects_total.get(), attempts);
}

#[tokio::test]
async fn change_city_updates_profile_and_tells_the_server() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.change_city("Mukalla").await.unwrap();
    assert_eq!(harness.tracker.status().driver.driver_city, "Mukalla");
    assert_eq!(
        harness
            .metrics
            .messages_dropped_total
            .with_label_values(&["change_city"])
            .get(),
        1
    );

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;
    eventually("connected status", || harness.tracker.status().connected).await;

    harness.tracker.change_city("Taiz").await.unwrap();
    let change = dispatch.next_of_type("change_city").await;
    assert_eq!(change, json!({ "type": "change_city", "driver_id": 7, "driver_city": "Taiz" }));
}

#[tokio::test]
async fn handshake_carries_token_when_configured() {
    let mut dispatch = FakeDispatch::start().await;
    let mut settings = fast_settings(&dispatch.url);
    settings.handshake_token = Some("tok-7".to_string());
    let harness = spawn(settings);

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    assert_eq!(dispatch.authorizations(), vec![Some("Bearer tok-7".to_string())]);
}

#[tokio::test]
async fn user_mutations_report_missing_orders() {
    let dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    let err = harness.tracker.remove_order(404).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = harness.tracker.update_order_status(404, "ready").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn dropping_every_handle_stops_the_tracker() {
    let mut dispatch = FakeDispatch::start().await;
    let harness = spawn(fast_settings(&dispatch.url));

    harness.tracker.go_online().await.unwrap();
    dispatch.next_of_type("driver_init").await;

    let status = harness.tracker.subscribe_status();
    drop(harness.tracker);
    within("tracker exit", harness.task).await.unwrap();

    assert_eq!(status.borrow().phase, TrackerPhase::Offline);
    assert_eq!(harness.platform.foreground_stops.load(Ordering::SeqCst), 1);
}
