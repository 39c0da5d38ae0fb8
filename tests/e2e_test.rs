//! Whole-stack tests: on-disk storage, controller and HTTP endpoint.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use beacon_core::{FixedDeviceId, Storage};
use beacon_sdk::{SdkConfig, SessionController, StaticDeviceInfo};
use beacon_testing::{MockResponse, MockServer, TEST_APP_KEY};
use http::StatusCode;

async fn start(
    server: &MockServer,
    storage: Storage,
    threshold: usize,
) -> anyhow::Result<SessionController> {
    let config = SdkConfig {
        server_url: server.url(),
        app_key: TEST_APP_KEY.to_string(),
        event_queue_threshold: threshold,
        read_timeout_secs: 2,
        ..SdkConfig::default()
    };
    Ok(SessionController::init(
        &config,
        storage,
        Arc::new(FixedDeviceId::new("e2e-device")),
        Arc::new(StaticDeviceInfo::current("0.0.1")),
    )
    .await?)
}

async fn wait_for_requests(server: &MockServer, expected: usize) -> usize {
    for _ in 0..200 {
        let count = server.received_requests().await.len();
        if count >= expected {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    server.received_requests().await.len()
}

#[tokio::test]
async fn undelivered_session_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("beacon.db");

    // First run: the endpoint is down, so everything stays on disk.
    let offline = MockServer::start().await;
    offline.mock_always_fail(StatusCode::SERVICE_UNAVAILABLE).await;
    {
        let storage = Storage::open(&db_path).await?;
        let controller = start(&offline, storage.clone(), 10).await?;

        controller.on_foreground_enter().await?;
        controller.record_event("offline_tap", None, 1, 0.0).await?;
        controller.on_foreground_exit().await?;
        controller.delivery_queue().await?.wait_until_idle().await;

        assert_eq!(storage.connections.len().await?, 3);
        storage.pool().close().await;
    }

    // Second run: a healthy endpoint receives the backlog in order.
    let online = MockServer::start().await;
    online.mock_ingest(MockResponse::Success).await;
    let storage = Storage::open(&db_path).await?;
    let _controller = start(&online, storage.clone(), 10).await?;

    assert_eq!(wait_for_requests(&online, 3).await, 3);
    let requests = online.received_requests().await;
    assert_eq!(requests[0].query_param("begin_session").as_deref(), Some("1"));
    assert_eq!(requests[1].query_param("end_session").as_deref(), Some("1"));
    assert!(requests[2].query_param("events").unwrap().contains("offline_tap"));
    assert!(requests.iter().all(|r| r.query_param("device_id").as_deref() == Some("e2e-device")));

    for _ in 0..100 {
        if storage.connections.is_empty().await? {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(storage.connections.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn rejected_acknowledgement_is_retried_later() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock_ingest_sequence(vec![MockResponse::NotSuccess { result: "queued".to_string() }])
        .await;
    server.mock_ingest(MockResponse::Success).await;
    let storage = Storage::in_memory().await?;
    let controller = start(&server, storage.clone(), 1).await?;

    controller.record_event("purchase", None, 1, 19.99).await?;
    let queue = controller.delivery_queue().await?;
    queue.wait_until_idle().await;
    assert_eq!(storage.connections.len().await?, 1);

    queue.tick().await?;
    queue.wait_until_idle().await;

    assert!(storage.connections.is_empty().await?);
    let requests = server.received_requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].query, requests[1].query);
    Ok(())
}
