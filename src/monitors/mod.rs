//! Metric evaluation against subscriber threshold bands.

pub mod zone;
