//! Scan diagnostics: timing, window counts and stage rejection
//! statistics for each pyramid level.
//!
//! These are collected by
//! [`detect_with_diagnostics`](crate::scan::detect_with_diagnostics) and
//! are intended for cascade tuning: the rejection histogram shows how
//! much work each stage saves.
//!
//! The crate performs no I/O and does not read the system clock itself.
//! Callers supply a [`Clock`]; durations are serialized as fractional
//! seconds (`f64`), since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, ScanConfig};

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A [`Clock`] that never advances. Every duration it reports is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::ZERO
    }

    fn elapsed(&self, since: &Duration) -> Duration {
        *since
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one multi-scale scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDiagnostics {
    /// Size of the scanned image.
    pub image: Dimensions,
    /// Cascade window size.
    pub window: Dimensions,
    /// Configuration the scan ran with.
    pub config: ScanConfig,
    /// One entry per pyramid level actually scanned.
    pub levels: Vec<LevelDiagnostics>,
    /// Wall-clock duration of the whole scan (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Totals across all levels.
    pub summary: ScanSummary,
}

/// Diagnostics for one pyramid level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDiagnostics {
    /// Level index; 0 is the unscaled image.
    pub level: u32,
    /// Cumulative shrink factor in 1/256 units.
    pub scale: u64,
    /// Size of the image at this level.
    pub dimensions: Dimensions,
    /// Windows classified.
    pub windows_evaluated: u64,
    /// Windows the cascade accepted.
    pub windows_accepted: u64,
    /// Stage evaluations, summed over every window.
    pub stages_evaluated: u64,
    /// `rejections_by_stage[i]` counts windows rejected at stage `i`.
    pub rejections_by_stage: Vec<u64>,
    /// Wall-clock duration of this level, including the resample
    /// (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Totals for an entire scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Windows classified across all levels.
    pub windows_evaluated: u64,
    /// Windows accepted across all levels.
    pub detections: u64,
    /// Stage evaluations across all levels.
    pub stages_evaluated: u64,
}

impl ScanSummary {
    /// Sum the per-level counters.
    #[must_use]
    pub fn from_levels(levels: &[LevelDiagnostics]) -> Self {
        levels.iter().fold(
            Self {
                windows_evaluated: 0,
                detections: 0,
                stages_evaluated: 0,
            },
            |acc, level| Self {
                windows_evaluated: acc.windows_evaluated + level.windows_evaluated,
                detections: acc.detections + level.windows_accepted,
                stages_evaluated: acc.stages_evaluated + level.stages_evaluated,
            },
        )
    }

    /// Mean number of stages run per window, or 0 when no windows ran.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_stages_per_window(&self) -> f64 {
        if self.windows_evaluated == 0 {
            0.0
        } else {
            self.stages_evaluated as f64 / self.windows_evaluated as f64
        }
    }
}

impl ScanDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Scan Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {} ({} pixels)  |  Window: {}",
            self.image,
            self.image.pixel_count(),
            self.window,
        ));
        lines.push(format!(
            "Step: {}  |  Scale step: {}/256  |  Max levels: {}",
            self.config.step, self.config.scale_step, self.config.max_levels,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<6} {:>10} {:>10} {:>10} {:>10}  {}",
            "Level", "Size", "Duration", "Windows", "Accepted", "Rejections by stage"
        ));
        lines.push("-".repeat(80));

        for level in &self.levels {
            lines.push(format!(
                "{:<6} {:>10} {:>8.3}ms {:>10} {:>10}  {}",
                level.level,
                level.dimensions.to_string(),
                duration_ms(level.duration),
                level.windows_evaluated,
                level.windows_accepted,
                format_rejections(&level.rejections_by_stage),
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "Windows: {}  |  Detections: {}  |  Mean stages/window: {:.2}",
            self.summary.windows_evaluated,
            self.summary.detections,
            self.summary.mean_stages_per_window(),
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Compact `stage:count` list, skipping stages that rejected nothing.
fn format_rejections(rejections: &[u64]) -> String {
    let parts: Vec<String> = rejections
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count > 0)
        .map(|(stage, count)| format!("{stage}:{count}"))
        .collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn level(index: u32, evaluated: u64, accepted: u64, rejections: Vec<u64>) -> LevelDiagnostics {
        LevelDiagnostics {
            level: index,
            scale: 256,
            dimensions: Dimensions::new(40, 30),
            windows_evaluated: evaluated,
            windows_accepted: accepted,
            stages_evaluated: evaluated * 2,
            rejections_by_stage: rejections,
            duration: Duration::from_millis(250),
        }
    }

    fn sample() -> ScanDiagnostics {
        let levels = vec![level(0, 100, 2, vec![90, 8]), level(1, 20, 0, vec![20, 0])];
        ScanDiagnostics {
            image: Dimensions::new(40, 30),
            window: Dimensions::new(24, 24),
            config: ScanConfig::default(),
            summary: ScanSummary::from_levels(&levels),
            levels,
            total_duration: Duration::from_millis(750),
        }
    }

    #[test]
    fn summary_sums_levels() {
        let summary = sample().summary;
        assert_eq!(summary.windows_evaluated, 120);
        assert_eq!(summary.detections, 2);
        assert_eq!(summary.stages_evaluated, 240);
        assert!((summary.mean_stages_per_window() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_summary_has_zero_mean() {
        let summary = ScanSummary::from_levels(&[]);
        assert_eq!(summary.windows_evaluated, 0);
        assert!(summary.mean_stages_per_window().abs() < f64::EPSILON);
    }

    #[test]
    fn report_produces_nonempty_string() {
        let report = sample().report();
        assert!(report.contains("Scan Diagnostics Report"));
        assert!(report.contains("Window: 24x24"));
        assert!(report.contains("0:90 1:8"));
        assert!(report.contains("Detections: 2"));
    }

    #[test]
    fn rejections_skip_zero_counts() {
        assert_eq!(format_rejections(&[0, 4, 0, 1]), "1:4 3:1");
        assert_eq!(format_rejections(&[]), "-");
    }

    #[test]
    fn no_clock_reports_zero() {
        let clock = NoClock;
        let start = clock.now();
        assert_eq!(clock.elapsed(&start), Duration::ZERO);
    }

    #[test]
    fn serde_round_trip() {
        let diagnostics = sample();
        let json = serde_json::to_string(&diagnostics).unwrap();
        let back: ScanDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostics);
    }

    #[test]
    fn duration_serializes_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        let secs = json["total_duration"].as_f64().unwrap();
        assert!((secs - 0.75).abs() < f64::EPSILON);
    }
}
