//! Shared types for the haarlite cascade evaluator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can hand decoded rasters
/// to [`Gray8Image::from_gray_image`] without depending on `image`
/// directly.
pub use image::GrayImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimensions value.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels (`width * height`).
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns `true` if a `other`-sized window fits inside `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.width <= self.width && other.height <= self.height
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel depth of an image container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    /// Signed 8-bit grayscale samples.
    Gray8,
    /// Signed 32-bit samples (cumulative sums).
    Gray32,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gray8 => f.write_str("Gray8"),
            Self::Gray32 => f.write_str("Gray32"),
        }
    }
}

/// A dense row-major grid of integer samples.
///
/// Dimensions are fixed at construction; the sample buffer is mutable
/// and always holds exactly `width * height` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image<T> {
    dimensions: Dimensions,
    data: Vec<T>,
}

/// 8-bit grayscale image.
///
/// Samples are stored signed (`-128..=127`). The gray level a sample
/// represents is `sample + 128`; see [`to_unsigned`].
pub type Gray8Image = Image<i8>;

/// 32-bit image, used for integral (summed-area) images.
pub type Gray32Image = Image<i32>;

impl<T: Copy> Image<T> {
    /// Create an image with every sample set to `fill`.
    #[must_use]
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        let dimensions = Dimensions::new(width, height);
        Self {
            dimensions,
            data: vec![fill; sample_count(dimensions)],
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// Returns `None` if `data.len() != width * height`.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, data: Vec<T>) -> Option<Self> {
        let dimensions = Dimensions::new(width, height);
        (data.len() == sample_count(dimensions)).then_some(Self { dimensions, data })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let dimensions = Dimensions::new(width, height);
        let mut data = Vec::with_capacity(sample_count(dimensions));
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { dimensions, data }
    }

    /// Internal constructor for buffers whose length is correct by
    /// construction.
    pub(crate) fn from_parts(dimensions: Dimensions, data: Vec<T>) -> Self {
        debug_assert_eq!(data.len(), sample_count(dimensions));
        Self { dimensions, data }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Width and height.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// The row-major sample buffer.
    #[must_use]
    pub const fn data(&self) -> &[T] {
        self.data.as_slice()
    }

    /// Mutable access to the samples. The buffer length cannot change.
    #[must_use]
    pub const fn data_mut(&mut self) -> &mut [T] {
        self.data.as_mut_slice()
    }

    /// Sample at `(x, y)`, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<T> {
        if x < self.dimensions.width && y < self.dimensions.height {
            self.data.get(self.index(x, y)).copied()
        } else {
            None
        }
    }

    /// Overwrite the sample at `(x, y)`. Returns `false` when out of
    /// bounds.
    pub fn put(&mut self, x: u32, y: u32, value: T) -> bool {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return false;
        }
        let index = self.index(x, y);
        self.data[index] = value;
        true
    }

    /// One row of samples. Returns an empty slice when `y` is out of
    /// bounds.
    #[must_use]
    pub fn row(&self, y: u32) -> &[T] {
        if y >= self.dimensions.height {
            return &[];
        }
        let start = self.index(0, y);
        &self.data[start..start + self.dimensions.width as usize]
    }

    /// Copy out the `width x height` region whose top-left corner is
    /// `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::OutOfBounds`] if the region does not lie
    /// entirely inside the image.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self, CascadeError> {
        let fits_x = x.checked_add(width).is_some_and(|r| r <= self.dimensions.width);
        let fits_y = y.checked_add(height).is_some_and(|b| b <= self.dimensions.height);
        if !fits_x || !fits_y {
            return Err(CascadeError::OutOfBounds {
                x,
                y,
                region: Dimensions::new(width, height),
                image: self.dimensions,
            });
        }

        let dimensions = Dimensions::new(width, height);
        let mut data = Vec::with_capacity(sample_count(dimensions));
        for row in y..y + height {
            let start = self.index(x, row);
            data.extend_from_slice(&self.data[start..start + width as usize]);
        }
        Ok(Self::from_parts(dimensions, data))
    }

    /// Nearest-neighbour resample down to `width x height`.
    ///
    /// Source coordinates are computed with integer arithmetic only:
    /// `src_x = x * self.width / width`.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::InvalidState`] if the target is empty or
    /// larger than the source on either axis.
    pub fn shrink_to(&self, width: u32, height: u32) -> Result<Self, CascadeError> {
        let target = Dimensions::new(width, height);
        if target.is_empty() || !self.dimensions.contains(target) {
            return Err(CascadeError::InvalidState(format!(
                "cannot shrink {} image to {target}",
                self.dimensions,
            )));
        }

        let src_w = u64::from(self.dimensions.width);
        let src_h = u64::from(self.dimensions.height);
        #[allow(clippy::cast_possible_truncation)] // bounded by src_w <= u32::MAX
        let columns: Vec<usize> = (0..u64::from(width))
            .map(|x| (x * src_w / u64::from(width)) as usize)
            .collect();

        let mut data = Vec::with_capacity(sample_count(target));
        for y in 0..u64::from(height) {
            #[allow(clippy::cast_possible_truncation)] // bounded by src_h <= u32::MAX
            let src_row = self.row((y * src_h / u64::from(height)) as u32);
            data.extend(columns.iter().map(|&sx| src_row[sx]));
        }
        Ok(Self::from_parts(target, data))
    }

    const fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.dimensions.width as usize + x as usize
    }
}

/// Number of samples a buffer of the given dimensions holds.
#[allow(clippy::cast_possible_truncation)] // allocations beyond usize fail anyway
const fn sample_count(dimensions: Dimensions) -> usize {
    dimensions.width as usize * dimensions.height as usize
}

/// Gray level (`0..=255`) represented by a signed 8-bit sample.
#[must_use]
pub const fn to_unsigned(sample: i8) -> i32 {
    sample as i32 - i8::MIN as i32
}

/// Signed 8-bit sample representing the gray level `value`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn to_signed(value: u8) -> i8 {
    value.wrapping_sub(128) as i8
}

impl Gray8Image {
    /// Convert an unsigned `image::GrayImage` into the signed
    /// representation.
    #[must_use]
    pub fn from_gray_image(gray: &GrayImage) -> Self {
        let dimensions = Dimensions::new(gray.width(), gray.height());
        let data = gray.as_raw().iter().map(|&v| to_signed(v)).collect();
        Self::from_parts(dimensions, data)
    }

    /// Convert back to an unsigned `image::GrayImage`.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn to_gray_image(&self) -> GrayImage {
        let raw = self.data.iter().map(|&v| (v as u8).wrapping_add(128)).collect();
        // Buffer length matches width * height by the `Image` invariant.
        GrayImage::from_raw(self.width(), self.height(), raw)
            .unwrap_or_else(|| GrayImage::new(self.width(), self.height()))
    }

    /// Decode encoded image bytes (PNG, JPEG, BMP, WebP) and convert to
    /// grayscale with the `image` crate's luminance weights.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::EmptyInput`] if `bytes` is empty and
    /// [`CascadeError::ImageDecode`] if the format is unrecognized or the
    /// data is corrupt.
    pub fn decode(bytes: &[u8]) -> Result<Self, CascadeError> {
        if bytes.is_empty() {
            return Err(CascadeError::EmptyInput);
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| CascadeError::ImageDecode(e.to_string()))?;
        Ok(Self::from_gray_image(&decoded.to_luma8()))
    }

    /// Create an image from unsigned gray levels laid out row-major.
    ///
    /// Returns `None` if `levels.len() != width * height`.
    #[must_use]
    pub fn from_levels(width: u32, height: u32, levels: &[u8]) -> Option<Self> {
        Self::from_raw(width, height, levels.iter().map(|&v| to_signed(v)).collect())
    }
}

/// An image of any supported pixel depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyImage {
    /// 8-bit grayscale.
    Gray8(Gray8Image),
    /// 32-bit integer samples.
    Gray32(Gray32Image),
}

impl AnyImage {
    /// Pixel depth of the wrapped image.
    #[must_use]
    pub const fn kind(&self) -> ImageKind {
        match self {
            Self::Gray8(_) => ImageKind::Gray8,
            Self::Gray32(_) => ImageKind::Gray32,
        }
    }

    /// Dimensions of the wrapped image.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        match self {
            Self::Gray8(image) => image.dimensions(),
            Self::Gray32(image) => image.dimensions(),
        }
    }

    /// Borrow as an 8-bit grayscale image.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::TypeMismatch`] for any other pixel depth.
    pub const fn as_gray8(&self) -> Result<&Gray8Image, CascadeError> {
        match self {
            Self::Gray8(image) => Ok(image),
            Self::Gray32(_) => Err(CascadeError::TypeMismatch {
                expected: ImageKind::Gray8,
                found: ImageKind::Gray32,
            }),
        }
    }
}

impl From<Gray8Image> for AnyImage {
    fn from(image: Gray8Image) -> Self {
        Self::Gray8(image)
    }
}

impl From<Gray32Image> for AnyImage {
    fn from(image: Gray32Image) -> Self {
        Self::Gray32(image)
    }
}

/// Configuration for multi-scale window scanning.
///
/// All parameters are integers; scale factors are expressed in 1/256
/// units so no floating point is involved anywhere in detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Window stride in pixels, applied at every pyramid level.
    pub step: u32,

    /// Per-level shrink factor in 1/256 units. `320` shrinks each level
    /// by 1.25x. Must be greater than 256.
    pub scale_step: u32,

    /// Maximum number of pyramid levels, including the unscaled input.
    pub max_levels: u32,
}

impl ScanConfig {
    /// Default window stride.
    pub const DEFAULT_STEP: u32 = 2;
    /// Default per-level shrink factor (1.25x).
    pub const DEFAULT_SCALE_STEP: u32 = 320;
    /// Default pyramid depth.
    pub const DEFAULT_MAX_LEVELS: u32 = 8;

    /// Check field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), CascadeError> {
        if self.step == 0 {
            return Err(CascadeError::InvalidConfig("step must be at least 1".to_string()));
        }
        if self.scale_step <= 256 {
            return Err(CascadeError::InvalidConfig(format!(
                "scale_step must exceed 256 (1.0x), got {}",
                self.scale_step,
            )));
        }
        if self.max_levels == 0 {
            return Err(CascadeError::InvalidConfig(
                "max_levels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step: Self::DEFAULT_STEP,
            scale_step: Self::DEFAULT_SCALE_STEP,
            max_levels: Self::DEFAULT_MAX_LEVELS,
        }
    }
}

/// Malformed or truncated cascade description text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A token other than the one the grammar requires.
    #[error("expected `{expected}` but found `{found}` at line {line}, column {column}")]
    Unexpected {
        /// What the grammar required.
        expected: String,
        /// What the input contained.
        found: String,
        /// 1-based line of the offending token.
        line: usize,
        /// 1-based column of the offending token.
        column: usize,
    },

    /// The input ended before the grammar was satisfied.
    #[error("cascade description ended early, expected `{expected}`")]
    UnexpectedEnd {
        /// What the grammar required next.
        expected: String,
    },

    /// An integer token does not fit in 32 bits.
    #[error("integer `{token}` out of range at line {line}, column {column}")]
    IntegerOverflow {
        /// The digits as written.
        token: String,
        /// 1-based line of the token.
        line: usize,
        /// 1-based column of the token.
        column: usize,
    },

    /// Syntactically valid input with an impossible value.
    #[error("{message} at line {line}, column {column}")]
    Invalid {
        /// Description of the problem.
        message: String,
        /// 1-based line of the offending value.
        line: usize,
        /// 1-based column of the offending value.
        column: usize,
    },
}

/// Errors that can occur while loading or evaluating a cascade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CascadeError {
    /// The cascade description could not be parsed.
    #[error("invalid cascade description: {0}")]
    Format(#[from] FormatError),

    /// The input image does not match the cascade window.
    #[error("image is {found} but the cascade expects {expected}")]
    SizeMismatch {
        /// Size the cascade was trained on.
        expected: Dimensions,
        /// Size of the image supplied.
        found: Dimensions,
    },

    /// An arithmetic or structural invariant was violated.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Encoded image bytes could not be decoded.
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    /// The encoded image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The input image has the wrong pixel depth.
    #[error("expected a {expected} image, got {found}")]
    TypeMismatch {
        /// Required pixel depth.
        expected: ImageKind,
        /// Supplied pixel depth.
        found: ImageKind,
    },

    /// A requested region falls outside the image.
    #[error("region {region} at ({x}, {y}) exceeds {image} image")]
    OutOfBounds {
        /// Left edge of the region.
        x: u32,
        /// Top edge of the region.
        y: u32,
        /// Size of the region.
        region: Dimensions,
        /// Size of the image.
        image: Dimensions,
    },

    /// Scan configuration is invalid.
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),

    /// The operation is not available for this cascade.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}
