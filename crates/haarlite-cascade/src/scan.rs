//! Multi-scale sliding-window detection.
//!
//! A cascade only classifies images of exactly its window size. To find
//! objects anywhere in a larger image the scanner builds an image
//! pyramid by nearest-neighbour shrinking, slides the window across
//! every level on a fixed step grid, and maps accepted windows back to
//! source coordinates.
//!
//! Scale factors are integers in 1/256 units. Level `k` is the source
//! shrunk by `scale_k / 256`, where `scale_0 = 256` and
//! `scale_k = scale_(k-1) * scale_step / 256`. Every level is resampled
//! from the source image, not from the previous level.

use serde::{Deserialize, Serialize};

use crate::cascade::{Cascade, EvaluationContext};
use crate::diagnostics::{Clock, LevelDiagnostics, NoClock, ScanDiagnostics, ScanSummary};
use crate::types::{CascadeError, Dimensions, Gray8Image, ScanConfig};

/// One accepted window, in source image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width of the window footprint in the source image.
    pub width: u32,
    /// Height of the window footprint in the source image.
    pub height: u32,
    /// Pyramid level the window was accepted at.
    pub level: u32,
}

/// Scan `image` for windows the cascade accepts.
///
/// # Errors
///
/// Returns [`CascadeError::InvalidConfig`] if `config` fails
/// validation, and propagates evaluation errors.
pub fn detect(
    cascade: &Cascade,
    image: &Gray8Image,
    config: &ScanConfig,
) -> Result<Vec<Detection>, CascadeError> {
    detect_with_diagnostics(cascade, image, config, &NoClock).map(|(detections, _)| detections)
}

/// Scan `image` and also collect per-level diagnostics, timed with
/// `clock`.
///
/// # Errors
///
/// Same as [`detect`].
pub fn detect_with_diagnostics<C: Clock>(
    cascade: &Cascade,
    image: &Gray8Image,
    config: &ScanConfig,
    clock: &C,
) -> Result<(Vec<Detection>, ScanDiagnostics), CascadeError> {
    config.validate()?;
    let start = clock.now();
    let window = cascade.window();

    let mut detections = Vec::new();
    let mut levels = Vec::new();

    for (level, scale) in pyramid(image.dimensions(), window, config) {
        let level_start = clock.now();
        let dimensions = scaled(image.dimensions(), scale);
        let resampled;
        let source = if scale == 256 {
            image
        } else {
            resampled = image.shrink_to(dimensions.width, dimensions.height)?;
            &resampled
        };

        let mut stats = LevelDiagnostics {
            level,
            scale,
            dimensions,
            windows_evaluated: 0,
            windows_accepted: 0,
            stages_evaluated: 0,
            rejections_by_stage: vec![0; cascade.stages().len()],
            duration: std::time::Duration::ZERO,
        };

        for y in (0..=dimensions.height - window.height).step_by(config.step as usize) {
            for x in (0..=dimensions.width - window.width).step_by(config.step as usize) {
                let candidate = source.crop(x, y, window.width, window.height)?;
                let context = EvaluationContext::new(cascade, &candidate)?;

                let mut last_stage = None;
                let accepted = cascade.evaluate_with(&context, |outcome| {
                    stats.stages_evaluated += 1;
                    last_stage = Some(outcome.stage);
                });

                stats.windows_evaluated += 1;
                if accepted {
                    stats.windows_accepted += 1;
                    detections.push(Detection {
                        x: unscale(x, scale),
                        y: unscale(y, scale),
                        width: unscale(window.width, scale),
                        height: unscale(window.height, scale),
                        level,
                    });
                } else if let Some(stage) = last_stage {
                    stats.rejections_by_stage[stage] += 1;
                }
            }
        }

        stats.duration = clock.elapsed(&level_start);
        log::debug!(
            "level {level} ({dimensions}, scale {scale}/256): {} windows, {} accepted",
            stats.windows_evaluated,
            stats.windows_accepted,
        );
        levels.push(stats);
    }

    let summary = ScanSummary::from_levels(&levels);
    log::info!(
        "scanned {} for a {window} window: {} levels, {} windows, {} detections",
        image.dimensions(),
        levels.len(),
        summary.windows_evaluated,
        summary.detections,
    );

    let diagnostics = ScanDiagnostics {
        image: image.dimensions(),
        window,
        config: config.clone(),
        levels,
        total_duration: clock.elapsed(&start),
        summary,
    };
    Ok((detections, diagnostics))
}

/// `(level, scale)` for every pyramid level on which at least one window
/// fits.
fn pyramid(
    image: Dimensions,
    window: Dimensions,
    config: &ScanConfig,
) -> impl Iterator<Item = (u32, u64)> {
    let scale_step = u64::from(config.scale_step);
    std::iter::successors(Some(256u64), move |&scale| Some(scale * scale_step / 256))
        .take_while(move |&scale| scaled(image, scale).contains(window))
        .zip(0..config.max_levels)
        .map(|(scale, level)| (level, scale))
}

#[allow(clippy::cast_possible_truncation)] // never larger than the source
fn scaled(dimensions: Dimensions, scale: u64) -> Dimensions {
    Dimensions::new(
        (u64::from(dimensions.width) * 256 / scale) as u32,
        (u64::from(dimensions.height) * 256 / scale) as u32,
    )
}

fn unscale(value: u32, scale: u64) -> u32 {
    u32::try_from(u64::from(value) * scale / 256).unwrap_or(u32::MAX)
}
