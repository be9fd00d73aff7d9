pub mod actors;
pub mod alerts;
pub mod commands;
pub mod config;
pub mod logging;
pub mod monitors;
pub mod registry;
pub mod source;
pub mod storage;
pub mod telegram;
pub mod transport;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use monitors::zone::{Crossing, Zone};

/// Recipient id assigned by the messaging transport (a Telegram chat id).
pub type SubscriberId = i64;

/// An upper/lower percentage band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub upper: f64,
    pub lower: f64,
}

impl Thresholds {
    pub fn new(upper: f64, lower: f64) -> Self {
        Self { upper, lower }
    }

    /// A band is usable only when `lower < upper`.
    pub fn is_valid(&self) -> bool {
        self.lower < self.upper
    }

    pub fn zone_of(&self, value: f64) -> Zone {
        Zone::determine(value, self.lower, self.upper)
    }
}

/// Per-subscriber record.
///
/// `None` overrides fall back to the global defaults; `Some(0.0)` is a real
/// override like any other value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    pub last_zone: Option<Zone>,
    pub last_value: Option<f64>,
}

impl Subscriber {
    pub fn effective(&self, defaults: Thresholds) -> Thresholds {
        Thresholds {
            upper: self.upper.unwrap_or(defaults.upper),
            lower: self.lower.unwrap_or(defaults.lower),
        }
    }

    pub fn has_overrides(&self) -> bool {
        self.upper.is_some() || self.lower.is_some()
    }
}

/// Process-wide last observed metric value, kept for warm restarts.
///
/// `last_zone` is carried for file compatibility only and is always written
/// as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub last_zone: Option<Zone>,
    pub last_value: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl GlobalState {
    pub fn observed(value: f64) -> Self {
        Self {
            last_zone: None,
            last_value: Some(value),
            updated_at: Some(Utc::now()),
        }
    }
}
