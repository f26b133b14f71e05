//! Fixed-point pixel statistics.
//!
//! The cascade normalizes every weak-classifier threshold by the
//! standard deviation of the window being classified. All quantities
//! here are integers scaled by powers of two:
//!
//! - mean: gray level x 256
//! - variance: gray level² x 65536
//! - standard deviation: gray level x 256
//!
//! Variance is computed as `E[X²] - E[X]²` from a single pass of running
//! sums. Each expectation is rounded down independently before the
//! subtraction, matching the trained threshold scaling rather than the
//! exact variance.

use serde::{Deserialize, Serialize};

use crate::types::{CascadeError, Gray8Image, to_unsigned};

/// Mean, variance and standard deviation of an image's gray levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelStats {
    /// Mean gray level, scaled by 256.
    pub mean: i64,
    /// Variance, scaled by 65536.
    pub variance: i64,
    /// Standard deviation, scaled by 256.
    pub std_dev: i32,
}

/// Compute fixed-point statistics over every pixel of `image`.
///
/// # Errors
///
/// Returns [`CascadeError::InvalidState`] if the image is empty or the
/// computed variance is negative. A negative variance means the
/// fixed-point arithmetic lost precision; it is never a property of
/// real image data.
pub fn pixel_stats(image: &Gray8Image) -> Result<PixelStats, CascadeError> {
    let count = i64::try_from(image.dimensions().pixel_count())
        .map_err(|_| CascadeError::InvalidState("image too large for statistics".to_string()))?;
    if count == 0 {
        return Err(CascadeError::InvalidState(
            "standard deviation of an empty image".to_string(),
        ));
    }

    let (sum, sum_sq) = image
        .data()
        .iter()
        .fold((0i64, 0i64), |(sum, sum_sq), &sample| {
            let level = i64::from(to_unsigned(sample));
            (sum + level, sum_sq + level * level)
        });

    let mean = (sum << 8) / count;
    let mean_sq = (sum_sq << 16) / count;
    let variance = mean_sq - mean * mean;
    if variance < 0 {
        return Err(CascadeError::InvalidState(format!(
            "negative variance {variance} (sum={sum}, sum_sq={sum_sq}, n={count})",
        )));
    }

    let std_dev = i32::try_from(isqrt(variance)).map_err(|_| {
        CascadeError::InvalidState(format!("standard deviation of variance {variance} overflows"))
    })?;

    Ok(PixelStats {
        mean,
        variance,
        std_dev,
    })
}

/// Standard deviation of `image`'s gray levels, scaled by 256.
///
/// # Errors
///
/// See [`pixel_stats`].
pub fn std_dev(image: &Gray8Image) -> Result<i32, CascadeError> {
    pixel_stats(image).map(|stats| stats.std_dev)
}

/// Integer square root by Newton's iteration: the largest `r` with
/// `r * r <= n`. Non-positive inputs return 0.
#[must_use]
pub const fn isqrt(n: i64) -> i64 {
    if n < 2 {
        return if n < 0 { 0 } else { n };
    }
    let mut x = n;
    let mut y = x / 2 + x % 2;
    while y < x {
        x = y;
        y = i64::midpoint(x, n / x);
    }
    x
}
