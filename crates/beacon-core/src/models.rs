//! Recorded analytics events and their stored JSON form.
//!
//! An `Event` is stamped once at record time and never changes afterwards.
//! Its identity for removal purposes is `(key, timestamp, hour, dow,
//! segmentation)`; `count` and `sum` do not participate.

use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    str::FromStr,
    time::SystemTime,
};

use chrono::{DateTime, Datelike, Local, Timelike};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Segmentation values attached to an event.
///
/// Ordered so the serialized form is stable across runs.
pub type Segmentation = BTreeMap<String, String>;

const KEY_KEY: &str = "key";
const COUNT_KEY: &str = "count";
const SUM_KEY: &str = "sum";
const TIMESTAMP_KEY: &str = "timestamp";
const HOUR_KEY: &str = "hour";
const DOW_KEY: &str = "dow";
const SEGMENTATION_KEY: &str = "segmentation";

/// Calendar fields captured when an event is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventStamp {
    /// Unix time in seconds.
    pub timestamp: i64,
    /// Local hour of day, 0 to 23.
    pub hour: u8,
    /// Local day of week, Sunday=0, Monday=1 through Saturday=6.
    pub dow: u8,
}

impl EventStamp {
    /// Derives the stamp for a wall-clock instant in the local time zone.
    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = DateTime::from(time);
        Self {
            timestamp: local.timestamp(),
            hour: u8::try_from(local.hour()).unwrap_or(0),
            dow: u8::try_from(local.weekday().num_days_from_sunday()).unwrap_or(0),
        }
    }
}

/// One recorded analytic occurrence.
#[derive(Debug, Clone)]
pub struct Event {
    /// Semantic event name, never empty for a valid event.
    pub key: String,
    /// Optional segmentation values.
    pub segmentation: Option<Segmentation>,
    /// Occurrence count.
    pub count: i32,
    /// Associated sum. Non-finite values are not serialized.
    pub sum: f64,
    /// Unix time in seconds at record time.
    pub timestamp: i64,
    /// Local hour at record time.
    pub hour: u8,
    /// Local day of week at record time.
    pub dow: u8,
}

impl Event {
    /// Creates an event stamped with `stamp`.
    pub fn new(
        key: impl Into<String>,
        segmentation: Option<Segmentation>,
        count: i32,
        sum: f64,
        stamp: EventStamp,
    ) -> Self {
        Self {
            key: key.into(),
            segmentation,
            count,
            sum,
            timestamp: stamp.timestamp,
            hour: stamp.hour,
            dow: stamp.dow,
        }
    }

    /// Builds the wire object for this event.
    ///
    /// `sum` is left out when it is NaN or infinite; every other field is
    /// always present.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(KEY_KEY.to_string(), Value::from(self.key.clone()));
        object.insert(COUNT_KEY.to_string(), Value::from(self.count));
        object.insert(TIMESTAMP_KEY.to_string(), Value::from(self.timestamp));
        object.insert(HOUR_KEY.to_string(), Value::from(self.hour));
        object.insert(DOW_KEY.to_string(), Value::from(self.dow));

        if let Some(segmentation) = &self.segmentation {
            let segments = segmentation
                .iter()
                .map(|(key, value)| (key.clone(), Value::from(value.clone())))
                .collect::<Map<_, _>>();
            object.insert(SEGMENTATION_KEY.to_string(), Value::Object(segments));
        }

        if self.sum.is_finite() {
            object.insert(SUM_KEY.to_string(), Value::from(self.sum));
        }

        Value::Object(object)
    }

    /// Serializes the event for storage.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Parses a stored event, discarding the reason it was rejected.
    ///
    /// Missing numeric fields default to zero and a missing segmentation to
    /// `None`. Returns `None` for anything that is not a JSON object, for a
    /// malformed segmentation, and for a null or empty `key`.
    pub fn from_json(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromStr for Event {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| CoreError::Corrupted(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::Corrupted("event is not a JSON object".to_string()))?;

        let key = match object.get(KEY_KEY) {
            Some(Value::String(key)) if !key.is_empty() => key.clone(),
            _ => return Err(CoreError::Corrupted("event has no key".to_string())),
        };

        let segmentation = match object.get(SEGMENTATION_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Object(segments)) => Some(
                segments
                    .iter()
                    .filter_map(|(name, value)| match value {
                        Value::Null => None,
                        Value::String(text) => Some((name.clone(), text.clone())),
                        other => Some((name.clone(), other.to_string())),
                    })
                    .collect(),
            ),
            Some(_) => {
                return Err(CoreError::Corrupted("segmentation is not an object".to_string()))
            },
        };

        Ok(Self {
            key,
            segmentation,
            count: int_field(object, COUNT_KEY),
            sum: object.get(SUM_KEY).and_then(Value::as_f64).unwrap_or(0.0),
            timestamp: object.get(TIMESTAMP_KEY).and_then(Value::as_i64).unwrap_or(0),
            hour: u8::try_from(int_field(object, HOUR_KEY)).unwrap_or(0),
            dow: u8::try_from(int_field(object, DOW_KEY)).unwrap_or(0),
        })
    }
}

fn int_field(object: &Map<String, Value>, name: &str) -> i32 {
    object
        .get(name)
        .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)))
        .and_then(|value| i32::try_from(value).ok())
        .unwrap_or(0)
}

// count and sum are deliberately left out of identity, see DESIGN.md.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.timestamp == other.timestamp
            && self.hour == other.hour
            && self.dow == other.dow
            && self.segmentation == other.segmentation
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.timestamp.hash(state);
        self.hour.hash(state);
        self.dow.hash(state);
        self.segmentation.hash(state);
    }
}
