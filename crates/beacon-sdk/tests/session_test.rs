//! End-to-end tests driving the controller against a mock endpoint.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use beacon_core::{FixedDeviceId, Storage, TestClock};
use beacon_sdk::{SdkConfig, SdkError, SessionController, StaticDeviceInfo};
use beacon_testing::{MockResponse, TestEnv, TEST_APP_KEY, TEST_DEVICE_ID};
use http::{Method, StatusCode};
use serde_json::Value;

fn config(env: &TestEnv) -> SdkConfig {
    SdkConfig {
        server_url: env.http_mock.url(),
        app_key: TEST_APP_KEY.to_string(),
        event_queue_threshold: 2,
        connect_timeout_secs: 2,
        read_timeout_secs: 2,
        ..SdkConfig::default()
    }
}

async fn controller(env: &TestEnv, clock: &TestClock) -> SessionController {
    SessionController::init_with_clock(
        &config(env),
        env.storage.clone(),
        Arc::new(FixedDeviceId::new(TEST_DEVICE_ID)),
        Arc::new(StaticDeviceInfo::current("3.1.0")),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap()
}

/// Waits for the queue to go idle, re-ticking if a request landed while the
/// previous run was finishing.
async fn settle(controller: &SessionController, storage: &Storage) {
    let queue = controller.delivery_queue().await.unwrap();
    for _ in 0..20 {
        queue.wait_until_idle().await;
        if storage.connections.is_empty().await.unwrap() {
            return;
        }
        queue.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn session_is_delivered_in_order() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_ingest(MockResponse::Success).await;
    let clock = TestClock::new();
    let controller = controller(&env, &clock).await;

    controller.on_foreground_enter().await?;
    controller.record_event("screen_view", None, 1, 0.0).await?;
    clock.advance(Duration::from_secs(30));
    controller.on_foreground_exit().await?;
    settle(&controller, &env.storage).await;

    let requests = env.http_mock.received_requests().await;
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].query_param("begin_session").as_deref(), Some("1"));
    assert_eq!(requests[1].query_param("end_session").as_deref(), Some("1"));
    assert_eq!(requests[1].query_param("session_duration").as_deref(), Some("30"));
    assert!(requests[2].query_param("events").unwrap().contains("screen_view"));

    for request in &requests {
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query_param("app_key").as_deref(), Some(TEST_APP_KEY));
        assert_eq!(request.query_param("device_id").as_deref(), Some(TEST_DEVICE_ID));
    }

    let metrics: Value = serde_json::from_str(&requests[0].query_param("metrics").unwrap())?;
    assert_eq!(metrics["_app_version"], "3.1.0");

    assert!(env.storage.connections.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn non_positive_heartbeat_enqueues_nothing() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_ingest(MockResponse::Success).await;
    let controller = controller(&env, &TestClock::new()).await;
    let queue = controller.delivery_queue().await?;

    controller.heartbeat(0).await?;
    controller.heartbeat(-1).await?;

    assert!(env.storage.connections.is_empty().await?);
    assert_eq!(queue.worker_runs(), 0);
    env.http_mock.assert_request_count(0).await;
    Ok(())
}

#[tokio::test]
async fn threshold_batch_is_sent_as_one_request() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_ingest(MockResponse::Success).await;
    let controller = controller(&env, &TestClock::new()).await;

    controller.record_event("add_to_cart", None, 1, 4.5).await?;
    env.http_mock.assert_request_count(0).await;
    controller.record_event("checkout", None, 1, 4.5).await?;
    settle(&controller, &env.storage).await;

    let requests = env.http_mock.received_requests().await;
    assert_eq!(requests.len(), 1);
    let events: Value = serde_json::from_str(&requests[0].query_param("events").unwrap())?;
    let keys: Vec<_> = events.as_array().unwrap().iter().map(|e| e["key"].clone()).collect();
    assert_eq!(keys, vec!["add_to_cart", "checkout"]);
    assert_eq!(controller.pending_event_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn crash_report_is_posted() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_ingest(MockResponse::Success).await;
    let controller = controller(&env, &TestClock::new()).await;

    controller.log_exception("thread 'main' panicked", false).await?;
    settle(&controller, &env.storage).await;

    let requests = env.http_mock.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].body_param("device_id").as_deref(), Some(TEST_DEVICE_ID));

    let crash: Value = serde_json::from_str(&requests[0].body_param("crash").unwrap())?;
    assert_eq!(crash["_error"], "thread 'main' panicked");
    assert_eq!(crash["_nonfatal"], "false");
    Ok(())
}

#[tokio::test]
async fn failed_delivery_keeps_requests_queued() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_always_fail(StatusCode::SERVICE_UNAVAILABLE).await;
    let controller = controller(&env, &TestClock::new()).await;

    controller.begin_session().await?;
    controller.end_session(5).await?;
    controller.delivery_queue().await?.wait_until_idle().await;

    let queued = env.storage.connections.read_all().await?;
    assert_eq!(queued.len(), 2);
    assert!(queued[0].contains("&begin_session=1"));

    // A later trigger may retry the head, but nothing behind it is sent.
    let requests = env.http_mock.received_requests().await;
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|r| r.query_param("begin_session").is_some()));
    Ok(())
}

#[tokio::test]
async fn backlog_from_previous_run_is_resumed() -> anyhow::Result<()> {
    let env = TestEnv::on_disk().await?;
    env.storage.connections.append("app_key=test-app-key&timestamp=1&end_session=1").await?;
    env.http_mock.mock_ingest(MockResponse::Success).await;

    let controller = controller(&env, &TestClock::new()).await;
    settle(&controller, &env.storage).await;

    let requests = env.http_mock.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query_param("end_session").as_deref(), Some("1"));
    Ok(())
}

#[tokio::test]
async fn halt_discards_everything() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_always_fail(StatusCode::INTERNAL_SERVER_ERROR).await;
    let controller = controller(&env, &TestClock::new()).await;

    controller.record_event("pending", None, 1, 0.0).await?;
    controller.begin_session().await?;
    controller.halt().await?;

    assert!(env.storage.connections.is_empty().await?);
    assert!(env.storage.events.is_empty().await?);
    assert!(matches!(controller.on_foreground_enter().await, Err(SdkError::NotInitialized)));
    assert!(matches!(controller.delivery_queue().await, Err(SdkError::NotInitialized)));
    Ok(())
}

#[tokio::test]
async fn segmentation_with_delimiter_is_delivered() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.http_mock.mock_ingest(MockResponse::Success).await;
    let controller = controller(&env, &TestClock::new()).await;
    let segmentation = beacon_core::Segmentation::from([("url".to_string(), "urn:::x".to_string())]);

    controller.record_event("open", Some(segmentation.clone()), 1, 0.0).await?;
    controller.record_event("open", Some(segmentation), 1, 0.0).await?;
    settle(&controller, &env.storage).await;

    let requests = env.http_mock.received_requests().await;
    assert_eq!(requests.len(), 1);
    let events: Value = serde_json::from_str(&requests[0].query_param("events").unwrap())?;
    assert_eq!(events.as_array().unwrap().len(), 2);
    assert_eq!(events[0]["segmentation"]["url"], "urn:::x");
    Ok(())
}
