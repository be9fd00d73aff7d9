//! Persisted file formats
//!
//! ## Subscriber File
//!
//! Written as schema version 2:
//!
//! ```json
//! {"version": 2, "subscribers": {"123": {"upper": 60.0, "lower": null, "last_zone": "above", "last_value": 61.2}}}
//! ```
//!
//! Three shapes are accepted on read:
//!
//! | Version | Shape                                   | Upgrade                        |
//! |---------|-----------------------------------------|--------------------------------|
//! | 2       | `{"version": 2, "subscribers": {...}}`  | none                           |
//! | 1       | `{"<id>": {...}, ...}` (flat keyed map) | same records, rewritten as v2  |
//! | 0       | `[123, "456", ...]` (list of ids)       | default record per id          |
//!
//! Decoding is tolerant: ids that do not parse are skipped, records that are not
//! objects become default records, and malformed fields become absent. Nothing
//! here fails on bad input.
//!
//! ## Global State File
//!
//! `{"last_zone": null, "last_value": 51.3, "updated_at": "2024-05-01T12:00:00Z"}`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::{GlobalState, Subscriber, SubscriberId, Zone};

/// Version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

/// Subscribers keyed by id, in a stable order.
pub type SubscriberMap = BTreeMap<SubscriberId, Subscriber>;

/// Which on-disk shape a subscriber file had.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistedFormat {
    Versioned(u32),
    FlatMap,
    LegacyIdList,
    Unrecognized,
}

impl PersistedFormat {
    /// Whether the file should be rewritten in the current format.
    pub fn needs_upgrade(self) -> bool {
        !matches!(self, PersistedFormat::Versioned(SCHEMA_VERSION))
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriberFile<'a> {
    pub version: u32,
    pub subscribers: BTreeMap<String, &'a Subscriber>,
}

impl<'a> SubscriberFile<'a> {
    pub fn encode(subscribers: &'a SubscriberMap) -> Self {
        Self {
            version: SCHEMA_VERSION,
            subscribers: subscribers
                .iter()
                .map(|(id, subscriber)| (id.to_string(), subscriber))
                .collect(),
        }
    }
}

/// Decode any accepted subscriber file shape.
pub fn decode_subscribers(value: Value) -> (SubscriberMap, PersistedFormat) {
    match value {
        Value::Array(ids) => (decode_id_list(&ids), PersistedFormat::LegacyIdList),
        Value::Object(object) => match object.get("version").map(version_of) {
            Some(Some(version)) => {
                let subscribers = object
                    .get("subscribers")
                    .and_then(Value::as_object)
                    .map(decode_keyed)
                    .unwrap_or_default();
                (subscribers, PersistedFormat::Versioned(version))
            }
            Some(None) => {
                warn!("unsupported subscriber file version {}", object["version"]);
                (SubscriberMap::new(), PersistedFormat::Unrecognized)
            }
            None => (decode_keyed(&object), PersistedFormat::FlatMap),
        },
        _ => (SubscriberMap::new(), PersistedFormat::Unrecognized),
    }
}

fn version_of(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|version| u32::try_from(version).ok())
}

fn decode_id_list(ids: &[Value]) -> SubscriberMap {
    ids.iter()
        .filter_map(parse_id)
        .map(|id| (id, Subscriber::default()))
        .collect()
}

fn decode_keyed(records: &Map<String, Value>) -> SubscriberMap {
    let mut subscribers = SubscriberMap::new();
    for (key, record) in records {
        let Ok(id) = key.trim().parse::<SubscriberId>() else {
            trace!("skipping subscriber entry with unparseable id {key:?}");
            continue;
        };
        subscribers.insert(id, decode_record(record));
    }
    subscribers
}

fn decode_record(record: &Value) -> Subscriber {
    let Value::Object(fields) = record else {
        return Subscriber::default();
    };

    Subscriber {
        upper: fields.get("upper").and_then(lenient_f64),
        lower: fields.get("lower").and_then(lenient_f64),
        last_zone: fields
            .get("last_zone")
            .and_then(Value::as_str)
            .and_then(Zone::parse),
        last_value: fields.get("last_value").and_then(lenient_f64),
    }
}

/// Decode the global state file; anything unusable becomes absent.
pub fn decode_global_state(value: Value) -> GlobalState {
    let Value::Object(fields) = value else {
        return GlobalState::default();
    };

    GlobalState {
        last_zone: fields
            .get("last_zone")
            .and_then(Value::as_str)
            .and_then(Zone::parse),
        last_value: fields.get("last_value").and_then(lenient_f64),
        updated_at: fields
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|timestamp| timestamp.with_timezone(&Utc)),
    }
}

fn parse_id(value: &Value) -> Option<SubscriberId> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers, or strings holding a finite number.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
