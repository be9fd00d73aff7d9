//! Zone classification and crossing detection
//!
//! ## Zone State Machine
//!
//! Every subscriber remembers the last zone it was evaluated in. A new metric
//! value is classified against the subscriber's effective band:
//!
//! ```text
//! value >= upper  → Zone::Above
//! value <= lower  → Zone::Below
//! otherwise       → Zone::Neutral
//! ```
//!
//! and compared with the previous zone (a missing zone counts as `Neutral`):
//!
//! ```text
//! previous == current                  → Crossing::Stay          (no message)
//! current is Above/Below               → Crossing::EntersAlert   (alert for the new zone)
//! previous is Above/Below, now Neutral → Crossing::BackToNeutral (recovery message)
//! ```
//!
//! A direct `Above → Below` jump is a single `EntersAlert(Below)`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Above,
    Below,
    Neutral,
}

impl Zone {
    /// Classify `value` against the band. Both bounds are inclusive.
    pub fn determine(value: f64, lower: f64, upper: f64) -> Zone {
        if value >= upper {
            return Zone::Above;
        }
        if value <= lower {
            return Zone::Below;
        }
        Zone::Neutral
    }

    pub fn is_alert(self) -> bool {
        matches!(self, Zone::Above | Zone::Below)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Above => "above",
            Zone::Below => "below",
            Zone::Neutral => "neutral",
        }
    }

    /// Lenient parse used when reading persisted files.
    pub fn parse(raw: &str) -> Option<Zone> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "above" => Some(Zone::Above),
            "below" => Some(Zone::Below),
            "neutral" => Some(Zone::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a freshly classified zone with the recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Zone did not change.
    Stay,
    /// Moved into `Above` or `Below` from anywhere else.
    EntersAlert(Zone),
    /// Left `Above`/`Below` for the safe band.
    BackToNeutral,
}

impl Crossing {
    pub fn evaluate(previous: Option<Zone>, current: Zone) -> Crossing {
        let previous = previous.unwrap_or(Zone::Neutral);

        if previous == current {
            return Crossing::Stay;
        }

        if current.is_alert() {
            return Crossing::EntersAlert(current);
        }

        // current is Neutral and previous must have been an alert zone
        Crossing::BackToNeutral
    }

    pub fn should_notify(self) -> bool {
        !matches!(self, Crossing::Stay)
    }
}
