use snafu::ensure;

use super::{BoundsMismatch, HistogramError};

/// A histogram with fixed, explicit bucket boundaries.
///
/// A value lands in the first bucket whose upper bound is greater than or equal to it. Values above the highest bound
/// land in a final overflow bucket, so there is always one more bucket than there are bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct ExplicitHistogram {
    bounds: Vec<f64>,
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl ExplicitHistogram {
    /// Creates an empty `ExplicitHistogram` with the given bucket bounds.
    ///
    /// The bounds are expected to be strictly increasing.
    pub fn new(bounds: Vec<f64>) -> Self {
        let bucket_counts = vec![0; bounds.len() + 1];
        Self {
            bounds,
            bucket_counts,
            count: 0,
            sum: 0.0,
        }
    }

    /// Records a value.
    pub fn record(&mut self, value: f64) {
        // Bounds are sorted, so the first bound not less than the value is the upper bound of the value's bucket.
        let index = self.bounds.partition_point(|bound| *bound < value);
        self.bucket_counts[index] += 1;
        self.count += 1;
        self.sum += value;
    }

    /// Merges another histogram into this one.
    ///
    /// # Errors
    ///
    /// If the histograms do not share the same bucket bounds, an error is returned and this histogram is unchanged.
    pub fn merge(&mut self, other: &ExplicitHistogram) -> Result<(), HistogramError> {
        ensure!(self.bounds == other.bounds, BoundsMismatch);

        for (count, other_count) in self.bucket_counts.iter_mut().zip(&other.bucket_counts) {
            *count += other_count;
        }
        self.count += other.count;
        self.sum += other.sum;
        Ok(())
    }

    /// Clears all recorded values, keeping the bucket bounds.
    pub fn reset(&mut self) {
        self.bucket_counts.iter_mut().for_each(|count| *count = 0);
        self.count = 0;
        self.sum = 0.0;
    }

    /// Returns the bucket bounds.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Returns the count per bucket.
    pub fn bucket_counts(&self) -> &[u64] {
        &self.bucket_counts
    }

    /// Returns the number of recorded values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the sum of recorded values.
    pub fn sum(&self) -> f64 {
        self.sum
    }
}
