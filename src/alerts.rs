//! User-facing message texts
//!
//! Every text the bot sends is produced here, so the wording stays
//! deterministic for a given `(value, zone, thresholds)`.

use crate::registry::{Notification, ThresholdError};
use crate::{Thresholds, Zone};

#[derive(Debug, Clone)]
pub struct AlertFormatter {
    metric_name: String,
}

impl AlertFormatter {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
        }
    }

    /// Crossing alert for one of the three zones.
    pub fn crossing(&self, value: f64, zone: Zone, thresholds: Thresholds) -> String {
        let metric = &self.metric_name;
        let Thresholds { upper, lower } = thresholds;
        match zone {
            Zone::Above => {
                format!("⚠️ {metric} crossed ABOVE {upper:.2}%\nCurrent: {value:.2}%")
            }
            Zone::Below => {
                format!("⚠️ {metric} crossed BELOW {lower:.2}%\nCurrent: {value:.2}%")
            }
            Zone::Neutral => format!(
                "ℹ️ {metric} back between thresholds ({lower:.2}% - {upper:.2}%)\nCurrent: {value:.2}%"
            ),
        }
    }

    pub fn notification(&self, notification: &Notification) -> String {
        self.crossing(notification.value, notification.zone, notification.thresholds)
    }

    /// Reply to `/value`. `None` means no value could be obtained.
    pub fn value_report(&self, value: Option<f64>, thresholds: Thresholds) -> String {
        let metric = &self.metric_name;
        let Some(value) = value else {
            return format!("{metric} value not available. Try again shortly.");
        };
        let zone = thresholds.zone_of(value);
        format!(
            "{metric} is {value:.2}% (zone: {zone})\n{}",
            format_band("Your thresholds:", thresholds)
        )
    }

    pub fn settings(&self, thresholds: Thresholds, custom: bool) -> String {
        let source = if custom { "custom" } else { "global defaults" };
        format!(
            "{}\nUsing {source}.",
            format_band("Your thresholds:", thresholds)
        )
    }

    pub fn saved(&self, thresholds: Thresholds) -> String {
        format_band("Saved thresholds.", thresholds)
    }

    pub fn threshold_error(&self, error: &ThresholdError) -> String {
        format!("Threshold error: {error}")
    }

    /// Reply when a valid change could not be written.
    pub fn save_failed(&self) -> String {
        "Could not save your settings right now. Please try again later.".to_string()
    }

    pub fn reset(&self) -> String {
        "Your thresholds have been reset to global defaults.".to_string()
    }

    pub fn subscribed(&self) -> String {
        format!(
            "Subscribed to {} alerts. Send /help to see all commands.",
            self.metric_name
        )
    }

    pub fn unsubscribed(&self) -> String {
        format!(
            "Unsubscribed. You will no longer receive {} alerts.",
            self.metric_name
        )
    }

    pub fn help(&self) -> String {
        format!(
            "Commands:\n\
             /start - subscribe\n\
             /stop - unsubscribe\n\
             /value - current {}\n\
             /settings - show your thresholds\n\
             /upper <value> - set your upper (0-100)\n\
             /lower <value> - set your lower (0-100)\n\
             /thresholds <upper> <lower> - set both\n\
             /reset - use global defaults\n\
             /help - this help",
            self.metric_name
        )
    }
}

fn format_band(prefix: &str, thresholds: Thresholds) -> String {
    format!(
        "{prefix} upper={:.2}%, lower={:.2}%",
        thresholds.upper, thresholds.lower
    )
}
