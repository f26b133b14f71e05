//! Cascade description writer.
//!
//! Produces the same text grammar [`parse`](crate::parse::parse) reads,
//! one stump per line. Parsing the output yields a cascade equal to the
//! input.
//!
//! This is a pure function with no I/O; it returns a `String`.

use std::fmt::Write;

use crate::cascade::{Cascade, CascadeStructure};
use crate::feature::HaarRect;
use crate::types::CascadeError;

/// Serialize a stump-base cascade to its text description.
///
/// # Errors
///
/// Returns [`CascadeError::Unsupported`]
/// for tree-structured cascades, which the text grammar cannot express.
///
/// # Examples
///
/// ```
/// use haarlite_cascade::{parse, to_text};
///
/// let text = "(hcsb 2 2 1 (hcs 1 (hwcs (hf (hr 0 0 1 1 3) (hr 0 0 0 0 0) (hr 0 0 0 0 0) 0) \
///             5 -1 1) 0))";
/// let cascade = parse(text).unwrap();
/// let written = to_text(&cascade).unwrap();
/// assert_eq!(parse(&written).unwrap(), cascade);
/// ```
pub fn to_text(cascade: &Cascade) -> Result<String, CascadeError> {
    if matches!(cascade.structure(), CascadeStructure::TreeBase(_)) {
        return Err(CascadeError::Unsupported(
            "tree-structured cascades have no text form",
        ));
    }

    let window = cascade.window();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "(hcsb {} {} {}",
        window.width,
        window.height,
        cascade.stages().len(),
    );

    for stage in cascade.stages() {
        let _ = writeln!(out, "  (hcs {}", stage.stumps().len());
        for stump in stage.stumps() {
            let [r0, r1, r2] = stump.feature().rects();
            let _ = writeln!(
                out,
                "    (hwcs (hf {} {} {} 0) {} {} {})",
                rect(r0),
                rect(r1),
                rect(r2),
                stump.threshold(),
                stump.below(),
                stump.above(),
            );
        }
        let _ = writeln!(out, "    {})", stage.threshold());
    }

    let _ = writeln!(out, ")");
    Ok(out)
}

fn rect(r: &HaarRect) -> String {
    format!("(hr {} {} {} {} {})", r.x, r.y, r.width, r.height, r.weight)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::cascade::TreeLinks;
    use crate::classifier::{StageClassifier, Stump};
    use crate::feature::HaarFeature;
    use crate::parse::parse;
    use crate::types::Dimensions;

    fn sample() -> Cascade {
        let window = Dimensions::new(20, 10);
        let edge = HaarFeature::new([
            HaarRect::new(0, 0, 10, 10, -1),
            HaarRect::new(10, 0, 10, 10, 1),
            HaarRect::NONE,
        ]);
        let line = HaarFeature::new([
            HaarRect::new(2, 1, 15, 9, -1),
            HaarRect::new(7, 1, 5, 9, 3),
            HaarRect::new(19, 9, 1, 1, 7),
        ]);
        Cascade::new(window, vec![
            StageClassifier::new(vec![Stump::new(edge, -41, -12, 9, window)], -4),
            StageClassifier::new(
                vec![
                    Stump::new(line, 2_000_000, i32::MIN, i32::MAX, window),
                    Stump::new(edge, 0, 0, 0, window),
                ],
                17,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_cascade() {
        let cascade = sample();
        let text = to_text(&cascade).unwrap();
        assert_eq!(parse(&text).unwrap(), cascade);
    }

    #[test]
    fn output_layout() {
        let text = to_text(&sample()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "(hcsb 20 10 2");
        assert_eq!(lines[1], "  (hcs 1");
        assert_eq!(
            lines[2],
            "    (hwcs (hf (hr 0 0 10 10 -1) (hr 10 0 10 10 1) (hr 0 0 0 0 0) 0) -41 -12 9)",
        );
        assert_eq!(lines[3], "    -4)");
        assert_eq!(lines.last(), Some(&")"));
    }

    #[test]
    fn largest_placeholder_fields_round_trip() {
        let window = Dimensions::new(4, 4);
        let max = i32::MAX.unsigned_abs();
        let feature = HaarFeature::new([
            HaarRect::new(max, max, max, max, 0),
            HaarRect::new(max, 0, 0, max, 9),
            HaarRect::NONE,
        ]);
        let cascade = Cascade::new(window, vec![StageClassifier::new(
            vec![Stump::new(feature, 1, 2, 3, window)],
            4,
        )])
        .unwrap();
        let text = to_text(&cascade).unwrap();
        assert_eq!(parse(&text).unwrap(), cascade);
    }

    #[test]
    fn empty_cascade_round_trips() {
        let cascade = Cascade::new(Dimensions::new(24, 24), vec![]).unwrap();
        let text = to_text(&cascade).unwrap();
        assert_eq!(parse(&text).unwrap(), cascade);
    }

    #[test]
    fn tree_cascade_is_unsupported() {
        let window = Dimensions::new(4, 4);
        let stage = StageClassifier::new(vec![], 0);
        let cascade = Cascade::from_tree(window, vec![stage], vec![TreeLinks::default()]).unwrap();
        assert!(matches!(to_text(&cascade), Err(CascadeError::Unsupported(_))));
    }

    /// Rectangles that either fit `window` or are placeholders with
    /// arbitrary in-range fields.
    fn rect_in(window: Dimensions) -> impl Strategy<Value = HaarRect> {
        (any::<[u32; 4]>(), any::<i32>(), any::<bool>()).prop_map(
            move |([a, b, c, d], weight, placeholder)| {
                if placeholder {
                    HaarRect::new(a >> 1, b >> 1, c >> 1, d >> 1, 0)
                } else {
                    let x = a % window.width;
                    let y = b % window.height;
                    let width = c % (window.width - x + 1);
                    let height = d % (window.height - y + 1);
                    HaarRect::new(x, y, width, height, weight)
                }
            },
        )
    }

    fn stump_in(window: Dimensions) -> impl Strategy<Value = Stump> {
        (
            rect_in(window),
            rect_in(window),
            rect_in(window),
            any::<[i32; 3]>(),
        )
            .prop_map(move |(r0, r1, r2, [threshold, below, above])| {
                Stump::new(HaarFeature::new([r0, r1, r2]), threshold, below, above, window)
            })
    }

    fn cascade_strategy() -> impl Strategy<Value = Cascade> {
        (1..=32u32, 1..=32u32)
            .prop_flat_map(|(width, height)| {
                let window = Dimensions::new(width, height);
                let stage = (prop::collection::vec(stump_in(window), 0..4), any::<i32>())
                    .prop_map(|(stumps, threshold)| StageClassifier::new(stumps, threshold));
                (Just(window), prop::collection::vec(stage, 0..4))
            })
            .prop_map(|(window, stages)| Cascade::new(window, stages).unwrap())
    }

    proptest! {
        #[test]
        fn generated_cascades_round_trip(cascade in cascade_strategy()) {
            let text = to_text(&cascade).unwrap();
            prop_assert_eq!(parse(&text).unwrap(), cascade);
        }
    }
}
