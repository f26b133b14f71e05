//! Haar features: weighted sums of up to three axis-aligned rectangles.
//!
//! A feature is evaluated against an integral image in constant time.
//! Before evaluation each rectangle is *indexed* for a particular row
//! stride, turning its geometry into one to four buffer offsets:
//!
//! ```text
//!   tl ─────── tr        sum = br - bl - tr + tl
//!    │  rect   │
//!   bl ─────── br        (tl, tr, bl sit one pixel above / left)
//! ```
//!
//! Rectangles touching the top row or left column of the window would
//! need lookups outside the image, so they get dedicated lookup shapes
//! that treat those cells as zero.

use crate::types::Dimensions;

/// One weighted rectangle of a Haar feature, in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaarRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Multiplier applied to the rectangle's pixel sum.
    pub weight: i32,
}

impl HaarRect {
    /// Placeholder rectangle that always contributes zero.
    pub const NONE: Self = Self::new(0, 0, 0, 0, 0);

    /// Create a rectangle.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32, weight: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            weight,
        }
    }

    /// Returns `true` if the rectangle can only ever contribute zero.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.width == 0 || self.height == 0 || self.weight == 0
    }

    /// Returns `true` if the rectangle lies entirely inside `window`.
    /// Placeholder rectangles always fit.
    #[must_use]
    pub fn fits(&self, window: Dimensions) -> bool {
        self.is_none()
            || (u64::from(self.x) + u64::from(self.width) <= u64::from(window.width)
                && u64::from(self.y) + u64::from(self.height) <= u64::from(window.height))
    }

    /// Compute the integral-image offsets for a buffer with `stride`
    /// samples per row.
    #[must_use]
    pub fn lookup(&self, stride: u32) -> RectLookup {
        if self.is_none() {
            return RectLookup::None;
        }

        let stride = stride as usize;
        let (x, y) = (self.x as usize, self.y as usize);
        let right = x + self.width as usize - 1;
        let bottom = y + self.height as usize - 1;
        let br = bottom * stride + right;

        match (x, y) {
            (0, 0) => RectLookup::Corner { br },
            (_, 0) => RectLookup::TopRow {
                bl: bottom * stride + x - 1,
                br,
            },
            (0, _) => RectLookup::LeftColumn {
                tr: (y - 1) * stride + right,
                br,
            },
            _ => RectLookup::Interior {
                tl: (y - 1) * stride + x - 1,
                tr: (y - 1) * stride + right,
                bl: bottom * stride + x - 1,
                br,
            },
        }
    }
}

/// Integral-image offsets for one rectangle at a fixed row stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectLookup {
    /// Zero-area or zero-weight rectangle.
    None,
    /// Rectangle anchored at the window's top-left pixel.
    Corner {
        /// Bottom-right cell.
        br: usize,
    },
    /// Rectangle touching the top row.
    TopRow {
        /// Cell left of the bottom-left corner.
        bl: usize,
        /// Bottom-right cell.
        br: usize,
    },
    /// Rectangle touching the left column.
    LeftColumn {
        /// Cell above the top-right corner.
        tr: usize,
        /// Bottom-right cell.
        br: usize,
    },
    /// Rectangle clear of both the top row and the left column.
    Interior {
        /// Cell diagonally above-left of the top-left corner.
        tl: usize,
        /// Cell above the top-right corner.
        tr: usize,
        /// Cell left of the bottom-left corner.
        bl: usize,
        /// Bottom-right cell.
        br: usize,
    },
}

impl RectLookup {
    /// Unweighted pixel sum over the rectangle.
    ///
    /// Offsets are trusted: they must have been computed for this
    /// buffer's stride from a rectangle that fits the buffer.
    #[must_use]
    pub const fn sum(&self, integral: &[i32]) -> i32 {
        match *self {
            Self::None => 0,
            Self::Corner { br } => integral[br],
            Self::TopRow { bl, br } => integral[br].wrapping_sub(integral[bl]),
            Self::LeftColumn { tr, br } => integral[br].wrapping_sub(integral[tr]),
            Self::Interior { tl, tr, bl, br } => integral[br]
                .wrapping_sub(integral[bl])
                .wrapping_sub(integral[tr])
                .wrapping_add(integral[tl]),
        }
    }
}

/// A rectangle's weight together with its lookup offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedRect {
    weight: i32,
    lookup: RectLookup,
}

impl IndexedRect {
    /// The lookup shape chosen for this rectangle.
    #[must_use]
    pub const fn lookup(&self) -> RectLookup {
        self.lookup
    }

    /// Weighted rectangle sum.
    #[must_use]
    pub const fn eval(&self, integral: &[i32]) -> i32 {
        self.weight.wrapping_mul(self.lookup.sum(integral))
    }
}

/// A Haar feature indexed for one row stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureOffsets {
    rects: [IndexedRect; 3],
}

impl FeatureOffsets {
    /// The indexed rectangles, in feature order.
    #[must_use]
    pub const fn rects(&self) -> &[IndexedRect; 3] {
        &self.rects
    }

    /// Feature value: the sum of the weighted rectangle sums.
    #[must_use]
    pub fn eval(&self, integral: &[i32]) -> i32 {
        self.rects
            .iter()
            .fold(0i32, |acc, rect| acc.wrapping_add(rect.eval(integral)))
    }
}

/// Three weighted rectangles; unused slots hold [`HaarRect::NONE`].
///
/// Only upright features exist. Tilted (45°) features are rejected by
/// the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaarFeature {
    rects: [HaarRect; 3],
}

impl HaarFeature {
    /// Create a feature from its three rectangles.
    #[must_use]
    pub const fn new(rects: [HaarRect; 3]) -> Self {
        Self { rects }
    }

    /// The feature's rectangles.
    #[must_use]
    pub const fn rects(&self) -> &[HaarRect; 3] {
        &self.rects
    }

    /// Returns `true` if every rectangle lies inside `window`.
    #[must_use]
    pub fn fits(&self, window: Dimensions) -> bool {
        self.rects.iter().all(|r| r.fits(window))
    }

    /// Index the feature for integral images with `stride` samples per
    /// row.
    #[must_use]
    pub fn reindex(&self, stride: u32) -> FeatureOffsets {
        FeatureOffsets {
            rects: self.rects.map(|rect| IndexedRect {
                weight: rect.weight,
                lookup: rect.lookup(stride),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::integral::{integral_image, rect_sum};
    use crate::types::{Gray8Image, to_signed};

    fn sample_image() -> Gray8Image {
        let levels: Vec<u8> = (0..35u8).map(|i| i.wrapping_mul(29).wrapping_add(3)).collect();
        Gray8Image::from_levels(7, 5, &levels).unwrap()
    }

    #[test]
    fn single_pixel_rect_times_weight() {
        let img = Gray8Image::from_levels(2, 2, &[10; 4]).unwrap();
        let integral = integral_image(&img);
        let feature = HaarFeature::new([
            HaarRect::new(0, 0, 1, 1, 3),
            HaarRect::NONE,
            HaarRect::NONE,
        ]);
        assert_eq!(feature.reindex(2).eval(integral.data()), 30);
    }

    #[test]
    fn lookup_shapes_by_position() {
        assert!(matches!(HaarRect::new(0, 0, 2, 2, 1).lookup(10), RectLookup::Corner { br: 11 }));
        assert!(matches!(
            HaarRect::new(3, 0, 2, 2, 1).lookup(10),
            RectLookup::TopRow { bl: 12, br: 14 }
        ));
        assert!(matches!(
            HaarRect::new(0, 3, 2, 2, 1).lookup(10),
            RectLookup::LeftColumn { tr: 21, br: 41 }
        ));
        assert!(matches!(
            HaarRect::new(3, 3, 2, 2, 1).lookup(10),
            RectLookup::Interior { tl: 22, tr: 24, bl: 42, br: 44 }
        ));
    }

    #[test]
    fn none_rect_contributes_zero() {
        assert_eq!(HaarRect::NONE.lookup(10), RectLookup::None);
        assert_eq!(HaarRect::new(1, 1, 2, 2, 0).lookup(10), RectLookup::None);
        assert_eq!(HaarRect::new(1, 1, 0, 2, 5).lookup(10), RectLookup::None);
        assert_eq!(RectLookup::None.sum(&[]), 0);
    }

    #[test]
    fn all_lookup_shapes_agree_with_rect_sum() {
        let img = sample_image();
        let integral = integral_image(&img);
        for rect in [
            HaarRect::new(0, 0, 3, 2, 1),
            HaarRect::new(2, 0, 3, 4, 1),
            HaarRect::new(0, 1, 7, 4, 1),
            HaarRect::new(4, 2, 3, 3, 1),
        ] {
            let expected = rect_sum(&integral, rect.x, rect.y, rect.width, rect.height).unwrap();
            assert_eq!(rect.lookup(img.width()).sum(integral.data()), expected, "{rect:?}");
        }
    }

    #[test]
    fn edge_feature_is_signed_difference() {
        // Left half dark, right half bright: a two-rectangle edge
        // feature weighting the right half +1 and the left half -1.
        let img = Gray8Image::from_fn(4, 2, |x, _| to_signed(if x < 2 { 10 } else { 50 }));
        let integral = integral_image(&img);
        let feature = HaarFeature::new([
            HaarRect::new(0, 0, 2, 2, -1),
            HaarRect::new(2, 0, 2, 2, 1),
            HaarRect::NONE,
        ]);
        assert_eq!(feature.reindex(4).eval(integral.data()), 4 * 50 - 4 * 10);
    }

    #[test]
    fn reindex_depends_on_stride() {
        let feature = HaarFeature::new([
            HaarRect::new(1, 1, 1, 1, 1),
            HaarRect::NONE,
            HaarRect::NONE,
        ]);
        assert_ne!(feature.reindex(4), feature.reindex(5));
    }

    #[test]
    fn fits_checks_window() {
        let window = Dimensions::new(4, 4);
        assert!(HaarRect::new(2, 2, 2, 2, 1).fits(window));
        assert!(!HaarRect::new(3, 2, 2, 2, 1).fits(window));
        assert!(HaarRect::new(90, 90, 0, 0, 0).fits(window));
        let feature = HaarFeature::new([
            HaarRect::new(0, 0, 4, 4, 1),
            HaarRect::new(0, 0, 4, 5, 1),
            HaarRect::NONE,
        ]);
        assert!(!feature.fits(window));
    }

    proptest! {
        #[test]
        fn lookup_matches_rect_sum(
            x in 0u32..7,
            y in 0u32..5,
            w in 1u32..8,
            h in 1u32..6,
            weight in -4i32..5,
        ) {
            let img = sample_image();
            prop_assume!(x + w <= img.width() && y + h <= img.height());
            let integral = integral_image(&img);
            let rect = HaarRect::new(x, y, w, h, weight);
            let feature = HaarFeature::new([rect, HaarRect::NONE, HaarRect::NONE]);
            let expected = weight * rect_sum(&integral, x, y, w, h).unwrap();
            prop_assert_eq!(feature.reindex(img.width()).eval(integral.data()), expected);
        }
    }
}
