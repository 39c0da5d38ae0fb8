//! Persistent batching of recorded events.

use std::sync::Arc;

use beacon_core::{
    encoding::encode_component, Clock, CoreError, Event, EventStamp, PersistentLog, Result,
    Segmentation,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Accumulates events in the `EVENTS` log until they are folded into a
/// request.
#[derive(Debug, Clone)]
pub struct EventBatcher {
    log: Arc<PersistentLog>,
    clock: Arc<dyn Clock>,
}

impl EventBatcher {
    /// Creates a batcher over `log`, stamping events with `clock`.
    pub fn new(log: Arc<PersistentLog>, clock: Arc<dyn Clock>) -> Self {
        Self { log, clock }
    }

    /// Stamps and stores one event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty key and
    /// `CoreError::Database` if the append fails.
    pub async fn record(
        &self,
        key: &str,
        segmentation: Option<Segmentation>,
        count: i32,
        sum: f64,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(CoreError::InvalidInput("event key must not be empty".to_string()));
        }

        let stamp = EventStamp::from_system_time(self.clock.now_system());
        let event = Event::new(key, segmentation, count, sum, stamp);
        self.log.append(&event.to_json_string()).await?;

        debug!(key, timestamp = stamp.timestamp, "event recorded");
        Ok(())
    }

    /// Number of parseable events currently stored.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the log cannot be read.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.events_list().await?.len())
    }

    /// Stored events ordered by timestamp, oldest first.
    ///
    /// Entries that fail to parse are skipped. Events sharing a timestamp
    /// keep their storage order.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the log cannot be read.
    pub async fn events_list(&self) -> Result<Vec<Event>> {
        let raw = self.log.read_all().await?;
        Ok(parse_sorted(&raw))
    }

    /// Removes the current batch from the log and returns it as an encoded
    /// JSON array suitable for the `events` parameter.
    ///
    /// The batch is taken from the log atomically, so overlapping flushes
    /// never encode the same event twice and events recorded afterwards stay
    /// queued for the next flush. Unparseable entries are dropped here.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the log cannot be drained.
    pub async fn flush_to_payload_fragment(&self) -> Result<String> {
        let raw = self.log.take_all().await?;
        let events = parse_sorted(&raw);

        if events.len() != raw.len() {
            warn!(dropped = raw.len() - events.len(), "discarding unparseable events");
        }

        let batch = Value::Array(events.iter().map(Event::to_json).collect());
        debug!(events = events.len(), "event batch flushed");

        Ok(encode_component(&batch.to_string()))
    }
}

fn parse_sorted(raw: &[String]) -> Vec<Event> {
    let mut events: Vec<Event> = raw.iter().filter_map(|entry| Event::from_json(entry)).collect();
    events.sort_by_key(|event| event.timestamp);
    events
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_core::{Storage, TestClock};

    use super::*;

    async fn batcher() -> (EventBatcher, TestClock, Storage) {
        let storage = Storage::in_memory().await.unwrap();
        let clock = TestClock::new();
        let batcher = EventBatcher::new(storage.events.clone(), Arc::new(clock.clone()));
        (batcher, clock, storage)
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let (batcher, _, storage) = batcher().await;

        let result = batcher.record("", None, 1, 0.0).await;

        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
        assert!(storage.events.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn events_are_listed_oldest_first() {
        let (batcher, clock, storage) = batcher().await;
        let later = Event::new("late", None, 1, 0.0, EventStamp::from_system_time(clock.now_system()));
        storage.events.append(&later.to_json_string()).await.unwrap();

        let earlier = Event::new(
            "early",
            None,
            1,
            0.0,
            EventStamp::from_system_time(clock.now_system() - Duration::from_secs(60)),
        );
        storage.events.append(&earlier.to_json_string()).await.unwrap();

        let keys: Vec<_> = batcher.events_list().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn same_timestamp_keeps_storage_order() {
        let (batcher, _, _) = batcher().await;
        batcher.record("first", None, 1, 0.0).await.unwrap();
        batcher.record("second", None, 1, 0.0).await.unwrap();
        batcher.record("third", None, 1, 0.0).await.unwrap();

        let keys: Vec<_> = batcher.events_list().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn flush_empties_the_log() {
        let (batcher, _, storage) = batcher().await;
        batcher.record("purchase", None, 2, 9.5).await.unwrap();

        let fragment = batcher.flush_to_payload_fragment().await.unwrap();

        assert!(fragment.starts_with("%5B%7B"));
        assert!(fragment.contains("purchase"));
        assert!(storage.events.is_empty().await.unwrap());
        assert_eq!(batcher.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_drops_corrupt_entries() {
        let (batcher, _, storage) = batcher().await;
        storage.events.append("{not json").await.unwrap();
        batcher.record("valid", None, 1, 0.0).await.unwrap();

        assert_eq!(batcher.pending_count().await.unwrap(), 1);

        let fragment = batcher.flush_to_payload_fragment().await.unwrap();
        assert!(fragment.contains("valid"));
        assert!(storage.events.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn empty_flush_yields_empty_array() {
        let (batcher, _, _) = batcher().await;
        assert_eq!(batcher.flush_to_payload_fragment().await.unwrap(), "%5B%5D");
    }
}
