//! Event ordering and flush behaviour over a real SQLite log.

#![allow(clippy::unwrap_used)]

use std::{
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use beacon_core::{encoding::query_value, Segmentation, Storage, TestClock};
use beacon_sdk::EventBatcher;
use serde_json::Value;

fn decode(fragment: &str) -> Value {
    let json = query_value(&format!("events={fragment}"), "events").unwrap();
    serde_json::from_str(&json).unwrap()
}

#[tokio::test]
async fn older_event_is_serialized_first() -> anyhow::Result<()> {
    let storage = Storage::in_memory().await?;
    let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let clock = TestClock::with_start_time(t);
    let batcher = EventBatcher::new(storage.events.clone(), Arc::new(clock.clone()));

    batcher.record("level_up", None, 1, 0.0).await?;
    clock.jump_to(t - Duration::from_secs(60));
    batcher.record("level_up", None, 1, 0.0).await?;

    let events = decode(&batcher.flush_to_payload_fragment().await?);
    let timestamps: Vec<_> =
        events.as_array().unwrap().iter().map(|e| e["timestamp"].as_i64().unwrap()).collect();
    assert_eq!(timestamps, vec![1_699_999_940, 1_700_000_000]);
    Ok(())
}

#[tokio::test]
async fn second_flush_is_empty() -> anyhow::Result<()> {
    let storage = Storage::in_memory().await?;
    let batcher = EventBatcher::new(storage.events.clone(), Arc::new(TestClock::new()));

    batcher.record("a", None, 1, 0.0).await?;
    batcher.record("b", None, 3, 1.5).await?;

    let first = decode(&batcher.flush_to_payload_fragment().await?);
    assert_eq!(first.as_array().unwrap().len(), 2);

    assert_eq!(batcher.flush_to_payload_fragment().await?, "%5B%5D");
    assert!(storage.events.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn events_recorded_after_read_survive_flush() -> anyhow::Result<()> {
    let storage = Storage::in_memory().await?;
    let batcher = EventBatcher::new(storage.events.clone(), Arc::new(TestClock::new()));

    batcher.record("first", None, 1, 0.0).await?;
    let fragment = batcher.flush_to_payload_fragment().await?;
    batcher.record("second", None, 1, 0.0).await?;

    assert_eq!(decode(&fragment).as_array().unwrap().len(), 1);
    let remaining = batcher.events_list().await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "second");
    Ok(())
}

#[tokio::test]
async fn duplicate_events_are_removed_once_each() -> anyhow::Result<()> {
    let storage = Storage::in_memory().await?;
    let batcher = EventBatcher::new(storage.events.clone(), Arc::new(TestClock::new()));

    batcher.record("tap", None, 1, 0.0).await?;
    batcher.record("tap", None, 1, 0.0).await?;

    let events = decode(&batcher.flush_to_payload_fragment().await?);
    assert_eq!(events.as_array().unwrap().len(), 2);
    assert_eq!(batcher.pending_count().await?, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_flushes_never_share_an_event() -> anyhow::Result<()> {
    let storage = Storage::in_memory().await?;
    let batcher = EventBatcher::new(storage.events.clone(), Arc::new(TestClock::new()));

    for round in 0..50 {
        batcher.record(&format!("e{round}"), None, 1, 0.0).await?;

        let (first, second) = {
            let a = batcher.clone();
            let b = batcher.clone();
            tokio::join!(
                tokio::spawn(async move { a.flush_to_payload_fragment().await }),
                tokio::spawn(async move { b.flush_to_payload_fragment().await }),
            )
        };
        let sizes: Vec<usize> = [first??, second??]
            .iter()
            .map(|fragment| decode(fragment).as_array().unwrap().len())
            .collect();

        assert_eq!(sizes.iter().sum::<usize>(), 1, "round {round}: {sizes:?}");
    }

    assert!(storage.events.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn delimiter_inside_segmentation_survives_storage() -> anyhow::Result<()> {
    let storage = Storage::in_memory().await?;
    let batcher = EventBatcher::new(storage.events.clone(), Arc::new(TestClock::new()));
    let segmentation = Segmentation::from([("url".to_string(), "urn:::x".to_string())]);

    batcher.record("open", Some(segmentation), 1, 0.0).await?;

    let events = batcher.events_list().await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].segmentation.as_ref().unwrap()["url"], "urn:::x");

    let flushed = decode(&batcher.flush_to_payload_fragment().await?);
    assert_eq!(flushed[0]["segmentation"]["url"], "urn:::x");
    Ok(())
}
