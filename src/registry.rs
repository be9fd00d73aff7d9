//! Subscriber registry
//!
//! Owns every subscriber record and the rules for changing them:
//!
//! - overrides must lie in `[0, 100]`
//! - the effective band (override, else global default) must keep `lower < upper`
//! - a rejected update changes nothing, in memory or on disk
//! - an accepted update is durably written before the call returns
//!
//! Mutations are staged on a copy of the map and committed only after the
//! store accepted the write.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::storage::{StateStore, StorageError, SubscriberMap};
use crate::{Crossing, Subscriber, SubscriberId, Thresholds, Zone};

const MIN_PERCENT: f64 = 0.0;
const MAX_PERCENT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Upper,
    Lower,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Upper => f.write_str("Upper"),
            Bound::Lower => f.write_str("Lower"),
        }
    }
}

/// Why a threshold update was refused. The message is shown to the subscriber.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdError {
    #[error("Usage: {usage}")]
    MissingArgument { usage: &'static str },

    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("{0} must be between 0 and 100")]
    OutOfRange(Bound),

    #[error("Values must be between 0 and 100")]
    BothOutOfRange,

    #[error("Lower must be less than upper")]
    InvertedBand { lower: f64, upper: f64 },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ThresholdError),

    #[error("failed to persist subscribers: {0}")]
    Storage(#[from] StorageError),
}

/// A parsed threshold-setting request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdUpdate {
    Upper(f64),
    Lower(f64),
    Both { upper: f64, lower: f64 },
}

impl ThresholdUpdate {
    pub fn upper(args: &[String]) -> Result<Self, ThresholdError> {
        let raw = args.first().ok_or(ThresholdError::MissingArgument {
            usage: "/upper <value>",
        })?;
        Ok(ThresholdUpdate::Upper(parse_percent(raw)?))
    }

    pub fn lower(args: &[String]) -> Result<Self, ThresholdError> {
        let raw = args.first().ok_or(ThresholdError::MissingArgument {
            usage: "/lower <value>",
        })?;
        Ok(ThresholdUpdate::Lower(parse_percent(raw)?))
    }

    pub fn both(args: &[String]) -> Result<Self, ThresholdError> {
        let [upper, lower, ..] = args else {
            return Err(ThresholdError::MissingArgument {
                usage: "/thresholds <upper> <lower>",
            });
        };
        Ok(ThresholdUpdate::Both {
            upper: parse_percent(upper)?,
            lower: parse_percent(lower)?,
        })
    }
}

/// Accepts `55`, `55.5` and `55%`.
fn parse_percent(raw: &str) -> Result<f64, ThresholdError> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed);
    number
        .parse::<f64>()
        .map_err(|_| ThresholdError::NotANumber(raw.to_string()))
}

fn in_range(value: f64) -> bool {
    (MIN_PERCENT..=MAX_PERCENT).contains(&value)
}

/// A crossing that should be announced to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Notification {
    pub recipient: SubscriberId,
    pub zone: Zone,
    pub value: f64,
    pub thresholds: Thresholds,
}

pub struct SubscriberRegistry {
    subscribers: SubscriberMap,
    defaults: Thresholds,
    store: Arc<dyn StateStore>,
}

impl SubscriberRegistry {
    /// Load the registry from `store`; never fails (see [`StateStore`]).
    pub fn load(store: Arc<dyn StateStore>, defaults: Thresholds) -> Self {
        let subscribers = store.load_subscribers();
        debug!("loaded {} subscribers from {}", subscribers.len(), store.describe());
        Self {
            subscribers,
            defaults,
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn get(&self, id: SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    pub fn subscribers(&self) -> &SubscriberMap {
        &self.subscribers
    }

    /// Override if present, else global default. Unknown ids get the defaults.
    pub fn effective_thresholds(&self, id: SubscriberId) -> Thresholds {
        self.subscribers
            .get(&id)
            .map(|subscriber| subscriber.effective(self.defaults))
            .unwrap_or(self.defaults)
    }

    /// Create an empty record for `id`. Returns whether a record was created.
    pub fn upsert_on_start(&mut self, id: SubscriberId) -> Result<bool, RegistryError> {
        if self.contains(id) {
            return Ok(false);
        }
        self.write_through(|subscribers| {
            subscribers.insert(id, Subscriber::default());
        })?;
        Ok(true)
    }

    /// Delete the record for `id`. Returns whether one existed.
    pub fn remove_on_stop(&mut self, id: SubscriberId) -> Result<bool, RegistryError> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.write_through(|subscribers| {
            subscribers.remove(&id);
        })?;
        Ok(true)
    }

    pub fn set_upper(&mut self, id: SubscriberId, upper: f64) -> Result<Thresholds, RegistryError> {
        if !in_range(upper) {
            return Err(ThresholdError::OutOfRange(Bound::Upper).into());
        }
        let current = self.current(id);
        self.commit_overrides(id, Some(upper), current.lower)
    }

    pub fn set_lower(&mut self, id: SubscriberId, lower: f64) -> Result<Thresholds, RegistryError> {
        if !in_range(lower) {
            return Err(ThresholdError::OutOfRange(Bound::Lower).into());
        }
        let current = self.current(id);
        self.commit_overrides(id, current.upper, Some(lower))
    }

    pub fn set_both(
        &mut self,
        id: SubscriberId,
        upper: f64,
        lower: f64,
    ) -> Result<Thresholds, RegistryError> {
        if !in_range(upper) || !in_range(lower) {
            return Err(ThresholdError::BothOutOfRange.into());
        }
        self.commit_overrides(id, Some(upper), Some(lower))
    }

    pub fn apply(
        &mut self,
        id: SubscriberId,
        update: ThresholdUpdate,
    ) -> Result<Thresholds, RegistryError> {
        match update {
            ThresholdUpdate::Upper(upper) => self.set_upper(id, upper),
            ThresholdUpdate::Lower(lower) => self.set_lower(id, lower),
            ThresholdUpdate::Both { upper, lower } => self.set_both(id, upper, lower),
        }
    }

    /// Clear both overrides. Returns whether a record existed.
    pub fn reset(&mut self, id: SubscriberId) -> Result<bool, RegistryError> {
        let Some(subscriber) = self.subscribers.get(&id) else {
            return Ok(false);
        };
        if !subscriber.has_overrides() {
            return Ok(true);
        }
        self.write_through(|subscribers| {
            if let Some(subscriber) = subscribers.get_mut(&id) {
                subscriber.upper = None;
                subscriber.lower = None;
            }
        })?;
        Ok(true)
    }

    /// Evaluate every subscriber against `value`.
    ///
    /// Updates `last_zone`/`last_value` in memory for every evaluated
    /// subscriber and returns the crossings to announce. Subscribers whose
    /// effective band is inverted are skipped untouched. Call
    /// [`persist`](Self::persist) afterwards.
    pub fn observe(&mut self, value: f64) -> Vec<Notification> {
        let mut notifications = Vec::new();

        for (&id, subscriber) in self.subscribers.iter_mut() {
            let thresholds = subscriber.effective(self.defaults);
            if !thresholds.is_valid() {
                trace!(
                    "skipping {id}: invalid band lower={} upper={}",
                    thresholds.lower, thresholds.upper
                );
                continue;
            }

            let zone = thresholds.zone_of(value);
            let crossing = Crossing::evaluate(subscriber.last_zone, zone);

            trace!(
                "{id}: {value:.2} vs [{}, {}] {:?} → {zone} ({crossing:?})",
                thresholds.lower, thresholds.upper, subscriber.last_zone
            );

            if crossing.should_notify() {
                notifications.push(Notification {
                    recipient: id,
                    zone,
                    value,
                    thresholds,
                });
            }

            subscriber.last_zone = Some(zone);
            subscriber.last_value = Some(value);
        }

        notifications
    }

    /// Write the current in-memory registry.
    pub fn persist(&self) -> Result<(), StorageError> {
        self.store.save_subscribers(&self.subscribers)
    }

    fn current(&self, id: SubscriberId) -> Subscriber {
        self.subscribers.get(&id).cloned().unwrap_or_default()
    }

    fn commit_overrides(
        &mut self,
        id: SubscriberId,
        upper: Option<f64>,
        lower: Option<f64>,
    ) -> Result<Thresholds, RegistryError> {
        let effective = Thresholds {
            upper: upper.unwrap_or(self.defaults.upper),
            lower: lower.unwrap_or(self.defaults.lower),
        };
        if !effective.is_valid() {
            return Err(ThresholdError::InvertedBand {
                lower: effective.lower,
                upper: effective.upper,
            }
            .into());
        }

        self.write_through(|subscribers| {
            let subscriber = subscribers.entry(id).or_default();
            subscriber.upper = upper;
            subscriber.lower = lower;
        })?;
        Ok(effective)
    }

    fn write_through(&mut self, change: impl FnOnce(&mut SubscriberMap)) -> Result<(), StorageError> {
        let mut staged = self.subscribers.clone();
        change(&mut staged);
        self.store.save_subscribers(&staged)?;
        self.subscribers = staged;
        Ok(())
    }
}
