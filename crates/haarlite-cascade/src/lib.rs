//! haarlite-cascade: fixed-point Haar cascade object detection (sans-IO).
//!
//! Evaluates boosted Haar classifier cascades using integer arithmetic
//! only, so results are bit-for-bit reproducible on any target:
//!
//! integral image -> window statistics -> weak classifiers (stumps) ->
//! stage classifiers -> early-reject cascade.
//!
//! Cascades are loaded from a compact text description
//! ([`parse`]) and written back with [`to_text`]. A loaded [`Cascade`]
//! is immutable; all per-image state lives in an
//! [`EvaluationContext`], so one cascade can be shared across threads.
//!
//! [`Cascade::evaluate`] classifies one window-sized image. [`detect`]
//! slides the cascade over a larger image at several scales.
//!
//! This crate has **no I/O dependencies**. It reads text and bytes the
//! caller supplies and logs through the `log` facade.

pub mod cascade;
pub mod classifier;
pub mod diagnostics;
pub mod feature;
pub mod integral;
pub mod parse;
pub mod scan;
pub mod serialize;
pub mod stats;
pub mod types;

pub use cascade::{
    Cascade, CascadeStructure, EvaluationContext, Evaluation, OffsetTable, StageOutcome,
    TreeLinks,
};
pub use classifier::{StageClassifier, Stump};
pub use diagnostics::{Clock, ScanDiagnostics};
pub use feature::{HaarFeature, HaarRect};
pub use integral::integral_image;
pub use parse::parse;
pub use scan::{Detection, detect, detect_with_diagnostics};
pub use serialize::to_text;
pub use stats::{PixelStats, pixel_stats};
pub use types::{
    AnyImage, CascadeError, Dimensions, FormatError, Gray8Image, Gray32Image, ImageKind,
    ScanConfig,
};
