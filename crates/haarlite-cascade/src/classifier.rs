//! Weak (stump) and stage classifiers.
//!
//! All arithmetic is 32-bit and wraps on overflow, so results match the
//! integer cascades the description files were converted for bit for
//! bit.

use crate::feature::{FeatureOffsets, HaarFeature};
use crate::types::Dimensions;

/// A one-level decision on a single Haar feature.
///
/// The stored threshold is normalized per window: it is multiplied by
/// the window's standard deviation and the training window area before
/// being compared with the feature value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stump {
    feature: HaarFeature,
    threshold: i32,
    below: i32,
    above: i32,
    window: Dimensions,
}

impl Stump {
    /// Create a stump.
    ///
    /// `below` is returned when the scaled feature value is strictly
    /// less than the modulated threshold, `above` otherwise. `window`
    /// is the training window size.
    #[must_use]
    pub const fn new(
        feature: HaarFeature,
        threshold: i32,
        below: i32,
        above: i32,
        window: Dimensions,
    ) -> Self {
        Self {
            feature,
            threshold,
            below,
            above,
            window,
        }
    }

    /// The feature this stump tests.
    #[must_use]
    pub const fn feature(&self) -> &HaarFeature {
        &self.feature
    }

    /// Unmodulated threshold as stored in the description.
    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Output when the feature value is below the threshold.
    #[must_use]
    pub const fn below(&self) -> i32 {
        self.below
    }

    /// Output when the feature value is at or above the threshold.
    #[must_use]
    pub const fn above(&self) -> i32 {
        self.above
    }

    /// Training window size.
    #[must_use]
    pub const fn window(&self) -> Dimensions {
        self.window
    }

    /// Threshold normalized for a window with standard deviation
    /// `std_dev` (scaled by 256).
    ///
    /// Computed as `(((threshold * std_dev) >> 6) * width * height) >> 6`.
    /// The two shifts must stay where they are: stage thresholds were
    /// tuned against exactly this rounding.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn modulated_threshold(&self, std_dev: i32) -> i32 {
        let scaled = self.threshold.wrapping_mul(std_dev) >> 6;
        scaled
            .wrapping_mul(self.window.width as i32)
            .wrapping_mul(self.window.height as i32)
            >> 6
    }

    /// Choose an output for a raw feature value against an already
    /// modulated threshold. The comparison is strict: a value equal to
    /// the threshold yields [`above`](Self::above).
    #[must_use]
    pub const fn decide(&self, feature_value: i32, modulated_threshold: i32) -> i32 {
        if (feature_value << 12) < modulated_threshold {
            self.below
        } else {
            self.above
        }
    }

    /// Evaluate against an integral image using offsets indexed from
    /// this stump's feature.
    #[must_use]
    pub fn eval(&self, offsets: &FeatureOffsets, integral: &[i32], std_dev: i32) -> i32 {
        self.decide(offsets.eval(integral), self.modulated_threshold(std_dev))
    }
}

/// A boosted sum of stumps with an acceptance threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageClassifier {
    stumps: Vec<Stump>,
    threshold: i32,
}

impl StageClassifier {
    /// Create a stage.
    #[must_use]
    pub const fn new(stumps: Vec<Stump>, threshold: i32) -> Self {
        Self { stumps, threshold }
    }

    /// The stage's stumps, in evaluation order.
    #[must_use]
    pub const fn stumps(&self) -> &[Stump] {
        self.stumps.as_slice()
    }

    /// Minimum stump output sum for the stage to pass.
    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Index every stump's feature for `stride`.
    #[must_use]
    pub fn reindex(&self, stride: u32) -> Vec<FeatureOffsets> {
        self.stumps.iter().map(|s| s.feature().reindex(stride)).collect()
    }

    /// Sum of stump outputs. `offsets` must come from
    /// [`reindex`](Self::reindex) on this stage.
    #[must_use]
    pub fn sum(&self, offsets: &[FeatureOffsets], integral: &[i32], std_dev: i32) -> i32 {
        debug_assert_eq!(offsets.len(), self.stumps.len());
        self.stumps
            .iter()
            .zip(offsets)
            .fold(0i32, |acc, (stump, offsets)| {
                acc.wrapping_add(stump.eval(offsets, integral, std_dev))
            })
    }

    /// Returns `true` if `sum` meets the stage threshold.
    #[must_use]
    pub const fn passes(&self, sum: i32) -> bool {
        sum >= self.threshold
    }
}
