//! Duration histograms.

use snafu::Snafu;

use crate::config::HistogramStrategy;

mod explicit;
pub use self::explicit::ExplicitHistogram;

mod exponential;
pub use self::exponential::{ExponentialHistogram, MAX_SCALE, MIN_SCALE};

/// A histogram error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum HistogramError {
    /// Explicit histograms with different bucket bounds cannot be merged.
    #[snafu(display("Cannot merge explicit histograms with different bucket bounds."))]
    BoundsMismatch,

    /// An explicit histogram cannot be merged with an exponential one.
    #[snafu(display("Cannot merge histograms of different kinds."))]
    KindMismatch,
}

/// A latency histogram.
#[derive(Clone, Debug, PartialEq)]
pub enum Histogram {
    /// Fixed, explicit bucket bounds.
    Explicit(ExplicitHistogram),

    /// Base-2 exponential buckets.
    Exponential(ExponentialHistogram),
}

impl Histogram {
    /// Creates an empty histogram for the given strategy.
    ///
    /// Returns `None` if histograms are disabled.
    pub fn from_strategy(strategy: &HistogramStrategy) -> Option<Self> {
        match strategy {
            HistogramStrategy::Disabled => None,
            HistogramStrategy::Explicit { bounds } => Some(Self::Explicit(ExplicitHistogram::new(bounds.clone()))),
            HistogramStrategy::Exponential { max_size } => {
                Some(Self::Exponential(ExponentialHistogram::new(*max_size)))
            }
        }
    }

    /// Records a value.
    pub fn record(&mut self, value: f64) {
        match self {
            Self::Explicit(h) => h.record(value),
            Self::Exponential(h) => h.record(value),
        }
    }

    /// Merges another histogram of the same kind into this one.
    ///
    /// # Errors
    ///
    /// If the histograms are of different kinds, or are explicit histograms with different bucket bounds, an error is
    /// returned and this histogram is unchanged.
    pub fn merge(&mut self, other: &Histogram) -> Result<(), HistogramError> {
        match (self, other) {
            (Self::Explicit(a), Self::Explicit(b)) => a.merge(b),
            (Self::Exponential(a), Self::Exponential(b)) => {
                a.merge(b);
                Ok(())
            }
            _ => KindMismatch.fail(),
        }
    }

    /// Clears all recorded values.
    pub fn reset(&mut self) {
        match self {
            Self::Explicit(h) => h.reset(),
            Self::Exponential(h) => h.reset(),
        }
    }

    /// Returns the number of recorded values.
    pub fn count(&self) -> u64 {
        match self {
            Self::Explicit(h) => h.count(),
            Self::Exponential(h) => h.count(),
        }
    }

    /// Returns the sum of recorded values.
    pub fn sum(&self) -> f64 {
        match self {
            Self::Explicit(h) => h.sum(),
            Self::Exponential(h) => h.sum(),
        }
    }
}
