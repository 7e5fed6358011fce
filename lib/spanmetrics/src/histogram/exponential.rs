use crate::data_model::metric::ExponentialBuckets;

/// Highest, and initial, scale of an exponential histogram.
pub const MAX_SCALE: i32 = 20;

/// Lowest scale an exponential histogram will downscale to.
///
/// At this scale, each bucket spans a factor of `2^1024`, so every finite `f64` fits within two buckets.
pub const MIN_SCALE: i32 = -10;

const SIGNIFICAND_WIDTH: u32 = 52;
const SIGNIFICAND_MASK: u64 = (1 << SIGNIFICAND_WIDTH) - 1;
const EXPONENT_MASK: u64 = 0x7ff;
const EXPONENT_BIAS: i32 = 1023;

/// Splits a positive, finite value into its base-2 exponent, and whether the value is an exact power of two.
fn decompose(value: f64) -> (i32, bool) {
    let bits = value.to_bits();
    let raw_exponent = ((bits >> SIGNIFICAND_WIDTH) & EXPONENT_MASK) as i32;
    let significand = bits & SIGNIFICAND_MASK;

    if raw_exponent == 0 {
        // Subnormal: the value is `significand * 2^-1074`.
        let highest_bit = 63 - significand.leading_zeros() as i32;
        let exponent = highest_bit - 1074;
        let exact = significand == 1 << highest_bit;
        (exponent, exact)
    } else {
        (raw_exponent - EXPONENT_BIAS, significand == 0)
    }
}

/// Maps a positive, finite value to its bucket index at the given scale.
///
/// Buckets are upper-inclusive: bucket `i` holds values in `(base^i, base^(i+1)]`, where `base = 2^(2^-scale)`.
pub fn map_to_index(value: f64, scale: i32) -> i32 {
    let (exponent, exact_power_of_two) = decompose(value);

    if scale <= 0 {
        let exponent = if exact_power_of_two { exponent - 1 } else { exponent };
        return exponent >> -scale;
    }

    if exact_power_of_two {
        return (exponent << scale) - 1;
    }

    let scale_factor = f64::from(scale).exp2() * std::f64::consts::LOG2_E;
    (value.ln() * scale_factor).floor() as i32
}

/// Returns how many times the range `[low, high]` must be halved to span at most `max_size` buckets.
fn change_to_fit(low: i32, high: i32, max_size: usize) -> u32 {
    let mut change = 0;
    while i64::from(high >> change) - i64::from(low >> change) + 1 > max_size as i64 {
        change += 1;
    }
    change
}

/// A dense, contiguous run of bucket counts.
#[derive(Clone, Debug, Default, PartialEq)]
struct Buckets {
    offset: i32,
    counts: Vec<u64>,
}

impl Buckets {
    fn index_range(&self) -> Option<(i32, i32)> {
        if self.counts.is_empty() {
            None
        } else {
            Some((self.offset, self.offset + self.counts.len() as i32 - 1))
        }
    }

    fn increment(&mut self, index: i32, count: u64) {
        match self.index_range() {
            None => {
                self.offset = index;
                self.counts.push(count);
                return;
            }
            Some((low, _)) if index < low => {
                let prepend = (low - index) as usize;
                let mut counts = vec![0; prepend + self.counts.len()];
                counts[prepend..].copy_from_slice(&self.counts);
                self.counts = counts;
                self.offset = index;
            }
            Some((_, high)) if index > high => {
                self.counts.resize((index - self.offset + 1) as usize, 0);
            }
            Some(_) => {}
        }

        let position = (index - self.offset) as usize;
        self.counts[position] += count;
    }

    /// Merges neighboring buckets such that index `i` becomes index `i >> change`.
    fn downscale(&mut self, change: u32) {
        let Some((low, high)) = self.index_range() else {
            return;
        };
        if change == 0 {
            return;
        }

        let new_offset = low >> change;
        let mut counts = vec![0; ((high >> change) - new_offset + 1) as usize];
        for (i, count) in self.counts.iter().enumerate() {
            let index = (self.offset + i as i32) >> change;
            counts[(index - new_offset) as usize] += count;
        }

        self.offset = new_offset;
        self.counts = counts;
    }

    fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(move |(i, count)| (self.offset + i as i32, *count))
    }

    fn to_data(&self) -> ExponentialBuckets {
        ExponentialBuckets {
            offset: self.offset,
            bucket_counts: self.counts.clone(),
        }
    }
}

/// A base-2 exponential histogram.
///
/// The histogram starts at the highest resolution ([`MAX_SCALE`]) and lowers its resolution whenever recording a value
/// would require more than `max_size` buckets for either sign. Lowering the resolution merges neighboring buckets, so
/// the total count is always preserved.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialHistogram {
    max_size: usize,
    scale: i32,
    positive: Buckets,
    negative: Buckets,
    zero_count: u64,
    count: u64,
    sum: f64,
}

impl ExponentialHistogram {
    /// Creates an empty `ExponentialHistogram` that keeps at most `max_size` buckets per sign.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(2),
            scale: MAX_SCALE,
            positive: Buckets::default(),
            negative: Buckets::default(),
            zero_count: 0,
            count: 0,
            sum: 0.0,
        }
    }

    fn downscale(&mut self, change: u32) {
        if change == 0 {
            return;
        }
        self.positive.downscale(change);
        self.negative.downscale(change);
        self.scale -= change as i32;
    }

    /// Returns how much the scale must drop for `buckets` to also hold `index`.
    fn change_for(&self, buckets: &Buckets, index: i32) -> u32 {
        let Some((low, high)) = buckets.index_range() else {
            return 0;
        };
        let change = change_to_fit(low.min(index), high.max(index), self.max_size);
        change.min((self.scale - MIN_SCALE) as u32)
    }

    /// Records a value.
    ///
    /// Non-finite values are ignored.
    pub fn record(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.count += 1;
        self.sum += value;

        if value == 0.0 {
            self.zero_count += 1;
            return;
        }

        let index = map_to_index(value.abs(), self.scale);
        let buckets = if value > 0.0 { &self.positive } else { &self.negative };
        let change = self.change_for(buckets, index);
        self.downscale(change);

        let index = index >> change;
        if value > 0.0 {
            self.positive.increment(index, 1);
        } else {
            self.negative.increment(index, 1);
        }
    }

    /// Merges another histogram into this one.
    ///
    /// The result uses the lower of the two scales, lowered further if needed to stay within this histogram's maximum
    /// size.
    pub fn merge(&mut self, other: &ExponentialHistogram) {
        let mut target = self.scale.min(other.scale);

        for (ours, theirs) in [(&self.positive, &other.positive), (&self.negative, &other.negative)] {
            let ranges = [
                ours.index_range().map(|(l, h)| (l >> (self.scale - target), h >> (self.scale - target))),
                theirs
                    .index_range()
                    .map(|(l, h)| (l >> (other.scale - target), h >> (other.scale - target))),
            ];
            let combined = ranges
                .into_iter()
                .flatten()
                .reduce(|(l1, h1), (l2, h2)| (l1.min(l2), h1.max(h2)));
            if let Some((low, high)) = combined {
                let change = change_to_fit(low, high, self.max_size).min((target - MIN_SCALE) as u32);
                target -= change as i32;
            }
        }

        self.downscale((self.scale - target) as u32);

        let shift = other.scale - target;
        for (index, count) in other.positive.iter() {
            self.positive.increment(index >> shift, count);
        }
        for (index, count) in other.negative.iter() {
            self.negative.increment(index >> shift, count);
        }

        self.zero_count += other.zero_count;
        self.count += other.count;
        self.sum += other.sum;
    }

    /// Clears all recorded values and restores the initial scale.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_size);
    }

    /// Returns the current scale.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Returns the number of recorded values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the sum of recorded values.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Returns the number of recorded values that were exactly zero.
    pub fn zero_count(&self) -> u64 {
        self.zero_count
    }

    /// Returns the buckets for positive values.
    pub fn positive(&self) -> ExponentialBuckets {
        self.positive.to_data()
    }

    /// Returns the buckets for negative values.
    pub fn negative(&self) -> ExponentialBuckets {
        self.negative.to_data()
    }
}
