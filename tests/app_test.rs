//! End-to-end behavior of the assembled application with fake seams.

mod common;

use common::{test_config, wifi_down, wifi_up, FakeProber, FakeTransport, RecordingExecutor};
use lanscout::client::{ChannelState, MonitorState, QueuedUpdate, UpdateFilter, UpdatePriority};
use lanscout::offline::{OfflineAction, SyncSkip};
use lanscout::{App, AppError};
use lanscout_core::config::StorageBackend;
use lanscout_core::{AppConfig, NetworkNotification, ServiceKind};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;

struct Harness {
    app: App,
    prober: Arc<FakeProber>,
    transport: Arc<FakeTransport>,
    executor: Arc<RecordingExecutor>,
}

async fn harness(config: AppConfig) -> Harness {
    let prober = Arc::new(FakeProber::default());
    prober.answer("192.168.1.42", 3001, 40);
    prober.answer("127.0.0.1", 11434, 5);

    let transport = Arc::new(FakeTransport::default());
    let executor = Arc::new(RecordingExecutor::default());

    let app = App::builder(config)
        .prober(prober.clone())
        .channel_transport(transport.clone())
        .action_executor(executor.clone())
        .build()
        .await
        .unwrap();

    Harness {
        app,
        prober,
        transport,
        executor,
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_resolves_services_and_connects() {
    let h = harness(test_config()).await;
    assert!(h.app.handle_network_change(wifi_up()));

    let resolution = h.app.start().await;

    assert_eq!(
        h.app.get_endpoint(ServiceKind::Backend).as_deref(),
        Some("http://192.168.1.42:3001")
    );
    assert_eq!(
        h.app.get_endpoint(ServiceKind::Llm).as_deref(),
        Some("http://127.0.0.1:11434")
    );
    assert_eq!(h.app.get_endpoint(ServiceKind::Transcription), None);
    assert_eq!(resolution.len(), 4);
    assert!(resolution[&ServiceKind::SpeechSynthesis].is_none());

    assert!(h.app.channel().get_connection_status());
    assert_eq!(h.transport.connects(), 1);

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_first_online_after_start_connects_channel_and_drains_queue() {
    let h = harness(test_config()).await;

    h.app.start().await;
    assert_eq!(h.app.monitor().state(), MonitorState::Unknown);
    assert_eq!(h.app.channel().state(), ChannelState::Disconnected);
    assert_eq!(h.transport.connects(), 0);
    assert!(h.app.get_endpoint(ServiceKind::Backend).is_some());

    let id = h
        .app
        .offline()
        .enqueue(OfflineAction::new("price_report", json!({"commodity": "maize", "price": 40})))
        .await
        .unwrap();

    assert!(h.app.handle_network_change(wifi_up()));
    sleep(Duration::from_millis(2500)).await;
    h.app.settle().await;

    assert_eq!(h.app.monitor().state(), MonitorState::Online);
    assert_eq!(h.app.channel().state(), ChannelState::Connected);
    assert_eq!(h.transport.connects(), 1);
    assert_eq!(h.executor.executed(), vec![id]);
    assert!(h.app.offline().is_empty().await);

    // Nothing else reconnects once the network has settled.
    sleep(Duration::from_secs(120)).await;
    h.app.settle().await;
    assert_eq!(h.transport.connects(), 1);
    assert!(h.app.channel().get_connection_status());

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_long_outage_refreshes_endpoints_and_reconnects_channel() {
    let h = harness(test_config()).await;
    h.app.handle_network_change(wifi_up());
    h.app.start().await;
    assert_eq!(h.transport.connects(), 1);

    sleep(Duration::from_millis(6500)).await;
    assert!(h.app.handle_network_change(wifi_down()));
    assert!(h.app.channel().is_network_flapping());

    // The backend moves while the device is offline.
    h.transport.set_up(false);
    h.prober.silence("192.168.1.42", 3001);
    h.prober.answer("192.168.1.43", 3001, 40);

    sleep(Duration::from_secs(12)).await;
    assert_eq!(h.app.channel().state(), ChannelState::Disconnected);
    assert_eq!(h.transport.connects(), 1);

    h.transport.set_up(true);
    assert!(h.app.handle_network_change(wifi_up()));

    // Recovery window after a long outage is 10s.
    sleep(Duration::from_secs(9)).await;
    assert_eq!(h.app.monitor().state(), MonitorState::StabilizingOnline);
    assert_eq!(
        h.app.get_endpoint(ServiceKind::Backend).as_deref(),
        Some("http://192.168.1.42:3001")
    );
    assert!(!h.app.channel().get_connection_status());

    sleep(Duration::from_secs(2)).await;
    h.app.settle().await;

    assert_eq!(h.app.monitor().state(), MonitorState::Online);
    assert_eq!(
        h.app.get_endpoint(ServiceKind::Backend).as_deref(),
        Some("http://192.168.1.43:3001")
    );
    assert!(!h.app.channel().is_network_flapping());
    assert!(h.app.channel().get_connection_status());
    assert_eq!(h.transport.connects(), 2);

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_short_outage_replays_offline_actions_without_rediscovery() {
    let h = harness(test_config()).await;
    h.app.handle_network_change(wifi_up());
    h.app.start().await;
    let scans = h.app.discovery().stats().scans_started;

    sleep(Duration::from_secs(6)).await;
    h.app.handle_network_change(wifi_down());

    let id = assert_ok!(
        h.app
            .offline()
            .enqueue(OfflineAction::new("price_report", json!({"commodity": "maize", "price": 42})))
            .await
    );

    let report = h.app.force_sync().await;
    assert_eq!(report.offline.skipped, Some(SyncSkip::Offline));
    assert!(h.executor.executed().is_empty());

    sleep(Duration::from_secs(6)).await;
    h.app.handle_network_change(wifi_up());

    sleep(Duration::from_millis(2500)).await;
    h.app.settle().await;

    assert_eq!(h.executor.executed(), vec![id]);
    assert!(h.app.offline().is_empty().await);
    assert_eq!(h.app.discovery().stats().scans_started, scans);

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_replay_keeps_action_for_next_sync() {
    let h = harness(test_config()).await;
    h.app.handle_network_change(wifi_up());
    h.app.start().await;
    sleep(Duration::from_secs(3)).await;

    h.executor.set_failing(true);
    h.app
        .offline()
        .enqueue(OfflineAction::new("price_report", json!({"price": 7})))
        .await
        .unwrap();

    let report = h.app.force_sync().await;
    assert!(report.offline.ran());
    assert_eq!(report.offline.failed, 1);
    assert_eq!(report.offline.remaining, 1);
    assert!(report.channel_connected);

    h.executor.set_failing(false);
    let report = h.app.force_sync().await;
    assert_eq!(report.offline.succeeded, 1);
    assert_eq!(report.offline.remaining, 0);

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_change_invalidates_discovery_cache() {
    let h = harness(test_config()).await;
    h.app.handle_network_change(wifi_up());
    h.app.start().await;
    let scans = h.app.discovery().stats().scans_started;

    sleep(Duration::from_secs(6)).await;
    assert!(h
        .app
        .handle_network_change(NetworkNotification::new(true, "cellular", Some(true))));
    h.app.settle().await;

    let outcome = h.app.discovery().discover(ServiceKind::Backend).await;
    assert!(outcome.is_discovered());
    assert_eq!(h.app.discovery().stats().scans_started, scans + 1);

    // Registry URLs stay put without a forced refresh.
    assert_eq!(
        h.app.get_endpoint(ServiceKind::Backend).as_deref(),
        Some("http://192.168.1.42:3001")
    );

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_updates_reach_subscribers() {
    let h = harness(test_config()).await;
    h.app.handle_network_change(wifi_up());
    h.app.start().await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let filter = UpdateFilter::any().with("commodity", json!("maize"));
    h.app
        .channel()
        .subscribe("price", filter, move |update| sink.lock().push(update.payload.clone()))
        .unwrap();

    h.transport
        .push_update(QueuedUpdate::new("price", json!({"commodity": "rice", "price": 9}), UpdatePriority::Low));
    h.transport
        .push_update(QueuedUpdate::new("price", json!({"commodity": "maize", "price": 42}), UpdatePriority::High));

    sleep(Duration::from_millis(5500)).await;

    assert_eq!(*received.lock(), vec![json!({"commodity": "maize", "price": 42})]);
    assert_eq!(h.app.channel().queue_len(), 0);

    h.app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_background_work() {
    let h = harness(test_config()).await;
    h.app.handle_network_change(wifi_up());
    h.app.start().await;

    h.app.shutdown().await;
    assert_eq!(h.app.monitor().listener_count(), 0);
    assert_eq!(h.app.channel().state(), ChannelState::Disconnected);

    sleep(Duration::from_secs(6)).await;
    h.app.handle_network_change(wifi_down());
    sleep(Duration::from_secs(6)).await;
    h.app.handle_network_change(wifi_up());
    sleep(Duration::from_secs(120)).await;
    h.app.settle().await;

    assert!(!h.app.channel().is_network_flapping());
    assert_eq!(h.transport.connects(), 1);
}

#[tokio::test]
async fn test_file_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.storage.backend = StorageBackend::File;
    config.storage.data_dir = dir.path().to_path_buf();

    let first = harness(config.clone()).await;
    first.app.start().await;
    assert!(first.app.get_endpoint(ServiceKind::Backend).is_some());
    let id = first
        .app
        .offline()
        .enqueue(OfflineAction::new("price_report", json!({"price": 42})))
        .await
        .unwrap();
    first.app.shutdown().await;
    drop(first);

    // Nothing answers any more: the backend comes from the persisted cache.
    let prober = Arc::new(FakeProber::default());
    let second = App::builder(config)
        .prober(prober.clone())
        .channel_transport(Arc::new(FakeTransport::default()))
        .action_executor(Arc::new(RecordingExecutor::default()))
        .build()
        .await
        .unwrap();
    second.start().await;

    assert_eq!(
        second.get_endpoint(ServiceKind::Backend).as_deref(),
        Some("http://192.168.1.42:3001")
    );
    let pending = second.offline().pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);

    second.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = test_config();
    config.discovery.batch_size = 0;

    let result = App::builder(config)
        .prober(Arc::new(FakeProber::default()))
        .build()
        .await;
    assert!(matches!(result, Err(AppError::Config(_))));
}
