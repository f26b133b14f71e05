//! Integral (summed-area) images.
//!
//! Each cell of an integral image holds the sum of every source gray
//! level at or above and at or to the left of it:
//!
//! ```text
//! integral[y][x] = sum(level(src[i][j]) for i <= y, j <= x)
//! ```
//!
//! Source samples are signed; the sum is taken over the gray level
//! they represent (`sample + 128`, see [`to_unsigned`]). Summing the raw
//! signed samples instead would silently skew every feature value and
//! threshold comparison downstream.
//!
//! Cells accumulate with wrapping 32-bit arithmetic. A rectangle sum
//! computed from four lookups is exact whenever the rectangle's own
//! total fits in an `i32`, even if the corner cells themselves wrapped.

use crate::types::{Gray8Image, Gray32Image, to_unsigned};

/// Build the integral image of an 8-bit grayscale image.
///
/// The output has the same dimensions as the input. An empty input
/// produces an empty output.
#[must_use = "returns the integral image"]
pub fn integral_image(image: &Gray8Image) -> Gray32Image {
    let width = image.width() as usize;
    let src = image.data();
    let mut out: Vec<i32> = Vec::with_capacity(src.len());

    if width > 0 {
        for (y, row) in src.chunks_exact(width).enumerate() {
            let mut row_sum = 0i32;
            for (x, &sample) in row.iter().enumerate() {
                row_sum = row_sum.wrapping_add(to_unsigned(sample));
                let above = if y > 0 { out[(y - 1) * width + x] } else { 0 };
                out.push(above.wrapping_add(row_sum));
            }
        }
    }

    Gray32Image::from_parts(image.dimensions(), out)
}

/// Sum of the source gray levels inside the `width x height` rectangle
/// whose top-left corner is `(x, y)`.
///
/// Returns `Some(0)` for an empty rectangle and `None` if the rectangle
/// extends past the integral image.
#[must_use]
pub fn rect_sum(integral: &Gray32Image, x: u32, y: u32, width: u32, height: u32) -> Option<i32> {
    if width == 0 || height == 0 {
        return Some(0);
    }
    let right = x.checked_add(width - 1)?;
    let bottom = y.checked_add(height - 1)?;

    let br = integral.get(right, bottom)?;
    let tr = if y > 0 { integral.get(right, y - 1)? } else { 0 };
    let bl = if x > 0 { integral.get(x - 1, bottom)? } else { 0 };
    let tl = if x > 0 && y > 0 {
        integral.get(x - 1, y - 1)?
    } else {
        0
    };

    Some(br.wrapping_sub(bl).wrapping_sub(tr).wrapping_add(tl))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::{Dimensions, GrayImage};

    #[test]
    fn uniform_two_by_two() {
        let img = Gray8Image::from_levels(2, 2, &[10, 10, 10, 10]).unwrap();
        let integral = integral_image(&img);
        assert_eq!(integral.data(), &[10, 20, 20, 40]);
    }

    #[test]
    fn signed_samples_are_offset_to_levels() {
        // Raw samples of -128 are gray level 0; raw 127 is level 255.
        let img = Gray8Image::from_raw(2, 1, vec![-128, 127]).unwrap();
        let integral = integral_image(&img);
        assert_eq!(integral.data(), &[0, 255]);
    }

    #[test]
    fn known_three_by_two() {
        let img = Gray8Image::from_levels(3, 2, &[1, 2, 3, 4, 5, 6]).unwrap();
        let integral = integral_image(&img);
        assert_eq!(integral.data(), &[1, 3, 6, 5, 12, 21]);
    }

    #[test]
    fn empty_image() {
        let img = Gray8Image::new(0, 5, 0);
        let integral = integral_image(&img);
        assert_eq!(integral.dimensions(), Dimensions::new(0, 5));
        assert!(integral.data().is_empty());
    }

    #[test]
    fn rect_sum_known_values() {
        let img = Gray8Image::from_levels(2, 2, &[1, 2, 3, 4]).unwrap();
        let integral = integral_image(&img);
        assert_eq!(rect_sum(&integral, 0, 0, 1, 1), Some(1));
        assert_eq!(rect_sum(&integral, 0, 0, 2, 1), Some(3));
        assert_eq!(rect_sum(&integral, 0, 0, 1, 2), Some(4));
        assert_eq!(rect_sum(&integral, 0, 0, 2, 2), Some(10));
        assert_eq!(rect_sum(&integral, 1, 0, 1, 2), Some(6));
        assert_eq!(rect_sum(&integral, 0, 1, 2, 1), Some(7));
        assert_eq!(rect_sum(&integral, 1, 1, 1, 1), Some(4));
    }

    #[test]
    fn rect_sum_out_of_bounds_and_empty() {
        let integral = integral_image(&Gray8Image::new(3, 3, 0));
        assert_eq!(rect_sum(&integral, 2, 2, 2, 1), None);
        assert_eq!(rect_sum(&integral, 0, 0, 0, 9), Some(0));
    }

    #[test]
    fn matches_imageproc_oracle() {
        let levels: Vec<u8> = (0..48u8).map(|i| i.wrapping_mul(37)).collect();
        let gray = GrayImage::from_raw(8, 6, levels).unwrap();
        let ours = integral_image(&Gray8Image::from_gray_image(&gray));

        // imageproc pads with a leading zero row and column.
        let oracle = imageproc::integral_image::integral_image::<_, u32>(&gray);
        for y in 0..6 {
            for x in 0..8 {
                let expected = i64::from(oracle.get_pixel(x + 1, y + 1).0[0]);
                assert_eq!(i64::from(ours.get(x, y).unwrap()), expected, "at ({x}, {y})");
            }
        }
    }

    fn small_image() -> impl Strategy<Value = Gray8Image> {
        (1u32..12, 1u32..12).prop_flat_map(|(w, h)| {
            proptest::collection::vec(any::<u8>(), (w * h) as usize)
                .prop_map(move |levels| Gray8Image::from_levels(w, h, &levels).unwrap())
        })
    }

    proptest! {
        #[test]
        fn cell_is_brute_force_prefix_sum(img in small_image()) {
            let integral = integral_image(&img);
            for y in 0..img.height() {
                for x in 0..img.width() {
                    let mut expected = 0;
                    for i in 0..=y {
                        for j in 0..=x {
                            expected += to_unsigned(img.get(j, i).unwrap());
                        }
                    }
                    prop_assert_eq!(integral.get(x, y), Some(expected));
                }
            }
        }

        #[test]
        fn rect_sum_matches_brute_force(
            img in small_image(),
            a in any::<u32>(),
            b in any::<u32>(),
            c in any::<u32>(),
            d in any::<u32>(),
        ) {
            let x = a % img.width();
            let y = b % img.height();
            let w = c % (img.width() - x) + 1;
            let h = d % (img.height() - y) + 1;
            let integral = integral_image(&img);

            let mut expected = 0;
            for i in y..y + h {
                for j in x..x + w {
                    expected += to_unsigned(img.get(j, i).unwrap());
                }
            }
            prop_assert_eq!(rect_sum(&integral, x, y, w, h), Some(expected));
        }

        #[test]
        fn monotone_along_rows_and_columns(img in small_image()) {
            let integral = integral_image(&img);
            for y in 0..img.height() {
                for x in 0..img.width() {
                    let v = integral.get(x, y).unwrap();
                    if x > 0 {
                        prop_assert!(integral.get(x - 1, y).unwrap() <= v);
                    }
                    if y > 0 {
                        prop_assert!(integral.get(x, y - 1).unwrap() <= v);
                    }
                }
            }
        }
    }
}
