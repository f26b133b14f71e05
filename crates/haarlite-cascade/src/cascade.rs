//! Cascade evaluation.
//!
//! A [`Cascade`] owns immutable classifier data: stages, stumps,
//! features and thresholds, fixed once the cascade is built. Everything
//! that depends on the image being classified (its integral image and
//! standard deviation) lives in an [`EvaluationContext`] created per
//! call, so one cascade can be shared across threads and evaluated
//! concurrently.
//!
//! # Structures
//!
//! - [`CascadeStructure::StumpBase`]: stages run in order. The first
//!   failing stage rejects; passing every stage accepts. Most windows
//!   are rejected by the first one or two cheap stages.
//! - [`CascadeStructure::TreeBase`]: stages form a tree stored as an
//!   arena. A passing stage continues with its `child` (accepting when
//!   it has none); a failing stage resumes at the nearest `next` sibling
//!   of itself or an ancestor, rejecting when none remains.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classifier::StageClassifier;
use crate::feature::FeatureOffsets;
use crate::integral::integral_image;
use crate::stats::std_dev;
use crate::types::{AnyImage, CascadeError, Dimensions, Gray8Image, Gray32Image};

/// Largest window dimension or rectangle field. The description format
/// stores every value as a signed 32-bit integer, placeholder
/// rectangles included.
const MAX_COORDINATE: u32 = i32::MAX.unsigned_abs();

/// Links of one stage in a tree-structured cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeLinks {
    /// Stage to continue with when this stage passes.
    pub child: Option<usize>,
    /// Sibling to try when this stage (or its subtree) rejects.
    pub next: Option<usize>,
    /// Stage whose child list this stage belongs to. Derived from the
    /// `child` / `next` links by [`Cascade::from_tree`].
    pub parent: Option<usize>,
}

/// How the stages of a cascade are traversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeStructure {
    /// Linear early-reject sequence.
    StumpBase,
    /// Arena-indexed stage tree rooted at stage 0. One entry per stage.
    TreeBase(Vec<TreeLinks>),
}

/// Feature offsets for every stump of a cascade at one row stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    window: Dimensions,
    stride: u32,
    stages: Vec<Vec<FeatureOffsets>>,
}

impl OffsetTable {
    /// Row stride the offsets were computed for.
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Offsets for the stumps of stage `index`.
    #[must_use]
    pub fn stage(&self, index: usize) -> &[FeatureOffsets] {
        self.stages.get(index).map_or(&[], Vec::as_slice)
    }

    /// Whether the table has one entry per stump of `cascade`.
    fn indexes(&self, cascade: &Cascade) -> bool {
        self.window == cascade.window
            && self.stages.len() == cascade.stages.len()
            && self
                .stages
                .iter()
                .zip(cascade.stages.iter())
                .all(|(offsets, stage)| offsets.len() == stage.stumps().len())
    }
}

/// Per-image state required to evaluate a cascade.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'a> {
    offsets: &'a OffsetTable,
    integral: Gray32Image,
    std_dev: i32,
}

impl<'a> EvaluationContext<'a> {
    /// Prepare `image` for evaluation by `cascade`: compute its standard
    /// deviation and integral image, and select offsets for its stride.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::SizeMismatch`] unless `image` is exactly
    /// the cascade window size, and [`CascadeError::InvalidState`] if the
    /// standard deviation cannot be computed.
    pub fn new(cascade: &'a Cascade, image: &Gray8Image) -> Result<Self, CascadeError> {
        if image.dimensions() != cascade.window {
            return Err(CascadeError::SizeMismatch {
                expected: cascade.window,
                found: image.dimensions(),
            });
        }
        Self::prepare(&cascade.offsets, cascade.window, image)
    }

    /// Prepare the top-left window of a larger `image`, looking features
    /// up through `offsets` from [`Cascade::reindex`] for the image
    /// width. The integral image covers the whole input, the standard
    /// deviation only the window, so the outcome equals evaluating the
    /// cropped window.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::SizeMismatch`] if `image` does not contain
    /// the cascade window, and [`CascadeError::InvalidState`] if
    /// `offsets` were not indexed from `cascade` at the image width or
    /// the standard deviation cannot be computed.
    pub fn with_offsets(
        cascade: &Cascade,
        offsets: &'a OffsetTable,
        image: &Gray8Image,
    ) -> Result<Self, CascadeError> {
        if !image.dimensions().contains(cascade.window) {
            return Err(CascadeError::SizeMismatch {
                expected: cascade.window,
                found: image.dimensions(),
            });
        }
        if !offsets.indexes(cascade) {
            return Err(CascadeError::InvalidState(
                "offset table was indexed from a different cascade".to_string(),
            ));
        }
        if offsets.stride != image.width() {
            return Err(CascadeError::InvalidState(format!(
                "offset table stride {} does not match image width {}",
                offsets.stride,
                image.width(),
            )));
        }
        Self::prepare(offsets, cascade.window, image)
    }

    fn prepare(
        offsets: &'a OffsetTable,
        window: Dimensions,
        image: &Gray8Image,
    ) -> Result<Self, CascadeError> {
        let cropped;
        let sample = if image.dimensions() == window {
            image
        } else {
            cropped = image.crop(0, 0, window.width, window.height)?;
            &cropped
        };

        Ok(Self {
            offsets,
            integral: integral_image(image),
            std_dev: std_dev(sample)?,
        })
    }

    /// Standard deviation of the image, scaled by 256.
    #[must_use]
    pub const fn std_dev(&self) -> i32 {
        self.std_dev
    }

    /// Integral image of the input.
    #[must_use]
    pub const fn integral(&self) -> &Gray32Image {
        &self.integral
    }

    /// Offsets in use for this image's stride.
    #[must_use]
    pub const fn offsets(&self) -> &OffsetTable {
        self.offsets
    }
}

/// Outcome of one stage during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Index of the stage in the cascade.
    pub stage: usize,
    /// Sum of the stage's stump outputs.
    pub sum: i32,
    /// Whether the sum met the stage threshold.
    pub passed: bool,
}

/// Detailed result of evaluating one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Final decision.
    pub accepted: bool,
    /// Standard deviation of the image, scaled by 256.
    pub std_dev: i32,
    /// Every stage that ran, in evaluation order.
    pub stages: Vec<StageOutcome>,
}

impl Evaluation {
    /// Number of stages that ran before the decision.
    #[must_use]
    pub const fn stages_evaluated(&self) -> usize {
        self.stages.len()
    }

    /// The stage that produced a rejection, if rejected.
    #[must_use]
    pub fn rejected_at(&self) -> Option<usize> {
        if self.accepted {
            return None;
        }
        self.stages.last().map(|outcome| outcome.stage)
    }
}

/// A Haar classifier cascade.
///
/// Cheap to clone: classifier data is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cascade {
    window: Dimensions,
    stages: Arc<[StageClassifier]>,
    structure: CascadeStructure,
    offsets: Arc<OffsetTable>,
}

impl Cascade {
    /// Build a linear (stump-base) cascade.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::InvalidState`] if the window is empty, if
    /// the window or any rectangle field exceeds `i32::MAX`, or if any
    /// stump's rectangles fall outside the window or its training window
    /// differs from `window`.
    pub fn new(window: Dimensions, stages: Vec<StageClassifier>) -> Result<Self, CascadeError> {
        Self::build(window, stages, CascadeStructure::StumpBase)
    }

    /// Build a tree-structured cascade rooted at stage 0.
    ///
    /// `links[i]` supplies the `child` and `next` links of `stages[i]`;
    /// any `parent` values given are ignored and recomputed. Links must
    /// describe a tree in first-child / next-sibling form: every link
    /// points forward (to a larger index), stage 0 has no incoming link
    /// and no `next`, and every other stage has exactly one incoming
    /// link.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::InvalidState`] if the links do not form
    /// such a tree, plus the errors of [`new`](Self::new).
    pub fn from_tree(
        window: Dimensions,
        stages: Vec<StageClassifier>,
        mut links: Vec<TreeLinks>,
    ) -> Result<Self, CascadeError> {
        if stages.is_empty() {
            return Err(CascadeError::InvalidState(
                "a tree cascade needs at least one stage".to_string(),
            ));
        }
        if links.len() != stages.len() {
            return Err(CascadeError::InvalidState(format!(
                "{} stages but {} tree links",
                stages.len(),
                links.len(),
            )));
        }
        if links[0].next.is_some() {
            return Err(CascadeError::InvalidState(
                "the root stage cannot have a sibling".to_string(),
            ));
        }

        let mut incoming = vec![0usize; links.len()];
        for (index, link) in links.iter().enumerate() {
            for target in [link.child, link.next].into_iter().flatten() {
                if target <= index || target >= links.len() {
                    return Err(CascadeError::InvalidState(format!(
                        "stage {index} links to {target}; links must point to a later stage",
                    )));
                }
                incoming[target] += 1;
            }
        }
        if let Some(orphan) = (1..links.len()).find(|&i| incoming[i] != 1) {
            return Err(CascadeError::InvalidState(format!(
                "stage {orphan} has {} incoming links, expected exactly one",
                incoming[orphan],
            )));
        }

        // Links point forward, so every parent is final before it is read.
        links[0].parent = None;
        for index in 0..links.len() {
            let TreeLinks { child, next, parent } = links[index];
            if let Some(child) = child {
                links[child].parent = Some(index);
            }
            if let Some(next) = next {
                links[next].parent = parent;
            }
        }

        Self::build(window, stages, CascadeStructure::TreeBase(links))
    }

    fn build(
        window: Dimensions,
        stages: Vec<StageClassifier>,
        structure: CascadeStructure,
    ) -> Result<Self, CascadeError> {
        if window.is_empty() {
            return Err(CascadeError::InvalidState(format!(
                "cascade window {window} is empty",
            )));
        }
        if window.width > MAX_COORDINATE || window.height > MAX_COORDINATE {
            return Err(CascadeError::InvalidState(format!(
                "cascade window {window} exceeds {MAX_COORDINATE} pixels",
            )));
        }
        for (stage_index, stage) in stages.iter().enumerate() {
            for (stump_index, stump) in stage.stumps().iter().enumerate() {
                if stump.window() != window {
                    return Err(CascadeError::InvalidState(format!(
                        "stage {stage_index} stump {stump_index} was trained for {} not {window}",
                        stump.window(),
                    )));
                }
                let oversized = stump.feature().rects().iter().any(|r| {
                    [r.x, r.y, r.width, r.height]
                        .into_iter()
                        .any(|v| v > MAX_COORDINATE)
                });
                if oversized {
                    return Err(CascadeError::InvalidState(format!(
                        "stage {stage_index} stump {stump_index} has a rectangle field \
                         above {MAX_COORDINATE}",
                    )));
                }
                if !stump.feature().fits(window) {
                    return Err(CascadeError::InvalidState(format!(
                        "stage {stage_index} stump {stump_index} has a rectangle outside {window}",
                    )));
                }
            }
        }

        let stages: Arc<[StageClassifier]> = stages.into();
        let offsets = Arc::new(index_stages(&stages, window, window.width));
        log::debug!(
            "built cascade: window {window}, {} stages, {} stumps",
            stages.len(),
            stages.iter().map(|s| s.stumps().len()).sum::<usize>(),
        );

        Ok(Self {
            window,
            stages,
            structure,
            offsets,
        })
    }

    /// Size of the window the cascade was trained on.
    #[must_use]
    pub const fn window(&self) -> Dimensions {
        self.window
    }

    /// Stage classifiers, indexed as referenced by the structure.
    #[must_use]
    pub fn stages(&self) -> &[StageClassifier] {
        &self.stages
    }

    /// Traversal structure.
    #[must_use]
    pub const fn structure(&self) -> &CascadeStructure {
        &self.structure
    }

    /// Total number of stumps across all stages.
    #[must_use]
    pub fn stump_count(&self) -> usize {
        self.stages.iter().map(|s| s.stumps().len()).sum()
    }

    /// Offsets for the cascade's own window width.
    #[must_use]
    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// Compute a fresh offset table for integral images with `stride`
    /// samples per row, for use with [`EvaluationContext::with_offsets`].
    /// The cascade itself is not modified.
    #[must_use]
    pub fn reindex(&self, stride: u32) -> OffsetTable {
        log::debug!("reindexing {} stages for stride {stride}", self.stages.len());
        index_stages(&self.stages, self.window, stride)
    }

    /// Classify `image`.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::SizeMismatch`] unless `image` matches the
    /// cascade window exactly; resizing is the caller's job. Returns
    /// [`CascadeError::InvalidState`] if the image statistics cannot be
    /// computed.
    pub fn evaluate(&self, image: &Gray8Image) -> Result<bool, CascadeError> {
        let context = EvaluationContext::new(self, image)?;
        Ok(self.evaluate_with(&context, |_| {}))
    }

    /// Classify an image of any pixel depth.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::TypeMismatch`] for images that are not
    /// 8-bit grayscale, plus the errors of [`evaluate`](Self::evaluate).
    pub fn evaluate_any(&self, image: &AnyImage) -> Result<bool, CascadeError> {
        self.evaluate(image.as_gray8()?)
    }

    /// Classify `image` and record every stage outcome.
    ///
    /// # Errors
    ///
    /// Same as [`evaluate`](Self::evaluate).
    pub fn evaluate_traced(&self, image: &Gray8Image) -> Result<Evaluation, CascadeError> {
        let context = EvaluationContext::new(self, image)?;
        let mut stages = Vec::new();
        let accepted = self.evaluate_with(&context, |outcome| stages.push(outcome));
        Ok(Evaluation {
            accepted,
            std_dev: context.std_dev(),
            stages,
        })
    }

    /// Run the cascade on a prepared context, reporting each stage
    /// outcome to `observe` as it is decided.
    pub fn evaluate_with(
        &self,
        context: &EvaluationContext<'_>,
        mut observe: impl FnMut(StageOutcome),
    ) -> bool {
        let run_stage = |index: usize| {
            let stage = &self.stages[index];
            let sum = stage.sum(
                context.offsets.stage(index),
                context.integral.data(),
                context.std_dev,
            );
            let passed = stage.passes(sum);
            observe(StageOutcome {
                stage: index,
                sum,
                passed,
            });
            passed
        };

        match &self.structure {
            CascadeStructure::StumpBase => (0..self.stages.len()).all(run_stage),
            CascadeStructure::TreeBase(links) => walk_tree(links, run_stage),
        }
    }
}

/// Traverse a first-child / next-sibling stage tree.
fn walk_tree(links: &[TreeLinks], mut run_stage: impl FnMut(usize) -> bool) -> bool {
    let mut current = 0;
    loop {
        if run_stage(current) {
            match links[current].child {
                Some(child) => current = child,
                None => return true,
            }
        } else {
            let mut node = current;
            loop {
                if let Some(next) = links[node].next {
                    current = next;
                    break;
                }
                match links[node].parent {
                    Some(parent) => node = parent,
                    None => return false,
                }
            }
        }
    }
}

fn index_stages(stages: &[StageClassifier], window: Dimensions, stride: u32) -> OffsetTable {
    OffsetTable {
        window,
        stride,
        stages: stages.iter().map(|stage| stage.reindex(stride)).collect(),
    }
}
