//! Duration units.

use serde::Deserialize;

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Unit in which span durations are reported.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum Unit {
    /// Milliseconds.
    #[default]
    #[serde(rename = "ms")]
    Milliseconds,

    /// Seconds.
    #[serde(rename = "s")]
    Seconds,
}

impl Unit {
    /// Returns the unit symbol attached to emitted histograms.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
        }
    }

    /// Converts a duration in nanoseconds to this unit.
    pub fn from_nanos(&self, nanos: i64) -> f64 {
        match self {
            Self::Milliseconds => nanos as f64 / NANOS_PER_MILLI,
            Self::Seconds => nanos as f64 / NANOS_PER_SEC,
        }
    }
}
