//! Joint image/mask augmentation pipelines.
//!
//! Two pipelines are built from one [`AugmentationConfig`]:
//!
//! 1. Validation: resize, center pad, normalize.
//! 2. Training: resize, center pad, horizontal flip (50%), brightness/contrast
//!    jitter (20%), rotation (always, ±25 degrees), normalize.
//!
//! Images travel through the pipeline as RGB `f32` in `[0, 1]`, masks as
//! binarized RGB `u8`. Geometric steps draw their parameters once and apply
//! them to both; photometric steps and normalization only touch the image.
//! Image and mask shapes are never compared, each one is resized to the
//! target independently.

use burn::config::Config;
use image::{
    imageops::{self, FilterType},
    ImageBuffer, Pixel, Rgb, Rgb32FImage, RgbImage,
};
use imageproc::{
    definitions::Clamp,
    geometric_transformations::{rotate_about_center, Interpolation},
};
use rand::Rng;

use crate::error::{DatasetError, DatasetResult};

/// ImageNet channel means.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Augmentation parameters shared by the training and validation pipelines.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    /// Resize target as `(width, height)`, before padding.
    pub target_size: (u32, u32),

    /// Pixels added to each dimension by center padding.
    #[config(default = 4)]
    pub pad_margin: u32,

    #[config(default = 0.5)]
    pub flip_prob: f64,

    #[config(default = 0.2)]
    pub brightness_contrast_prob: f64,

    /// Maximum additive brightness shift, as a fraction of full scale.
    #[config(default = 0.2)]
    pub brightness_limit: f32,

    /// Maximum multiplicative contrast change around 1.0.
    #[config(default = 0.2)]
    pub contrast_limit: f32,

    /// Maximum rotation angle in degrees.
    #[config(default = 25.0)]
    pub rotate_limit: f32,

    #[config(default = "IMAGENET_MEAN")]
    pub mean: [f32; 3],

    #[config(default = "IMAGENET_STD")]
    pub std: [f32; 3],
}

impl AugmentationConfig {
    /// Spatial size `(width, height)` of every pipeline output.
    pub fn output_size(&self) -> (u32, u32) {
        let (width, height) = self.target_size;
        (width + self.pad_margin, height + self.pad_margin)
    }

    /// Checks that probabilities, limits and statistics are usable.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidConfiguration`] describing the first
    /// offending field.
    pub fn validate(&self) -> DatasetResult<()> {
        let invalid = |reason: String| Err(DatasetError::InvalidConfiguration { reason });

        if self.target_size.0 == 0 || self.target_size.1 == 0 {
            return invalid(format!("target_size must be non-zero, got {:?}", self.target_size));
        }
        for (name, p) in [
            ("flip_prob", self.flip_prob),
            ("brightness_contrast_prob", self.brightness_contrast_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return invalid(format!("{name} must be within [0, 1], got {p}"));
            }
        }
        for (name, limit) in [
            ("brightness_limit", self.brightness_limit),
            ("contrast_limit", self.contrast_limit),
            ("rotate_limit", self.rotate_limit),
        ] {
            if !limit.is_finite() || limit < 0.0 {
                return invalid(format!("{name} must be finite and non-negative, got {limit}"));
            }
        }
        if self.std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return invalid(format!("std must be positive, got {:?}", self.std));
        }
        Ok(())
    }
}

/// One stage of a [`SegmentationTransform`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    /// Exact resize, bilinear for the image and nearest for the mask.
    Resize { width: u32, height: u32 },
    /// Zero padding up to a minimum size, content centered.
    PadIfNeeded { min_width: u32, min_height: u32 },
    /// Mirror along the vertical axis with probability `p`.
    HorizontalFlip { p: f64 },
    /// `x * alpha + beta` on the image with probability `p`.
    BrightnessContrast {
        p: f64,
        brightness_limit: f32,
        contrast_limit: f32,
    },
    /// Rotation about the center by an angle drawn from `[-limit, limit]`,
    /// with mirrored (reflect-101) content filling the uncovered corners.
    Rotate { limit: f32 },
    /// Per-channel `(x - mean) / std` on the image.
    Normalize { mean: [f32; 3], std: [f32; 3] },
}

impl TransformStep {
    /// Whether the step consumes randomness.
    pub fn is_random(&self) -> bool {
        matches!(
            self,
            Self::HorizontalFlip { .. } | Self::BrightnessContrast { .. } | Self::Rotate { .. }
        )
    }

    /// Applies this step to an image/mask pair.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        mut image: Rgb32FImage,
        mut mask: RgbImage,
        rng: &mut R,
    ) -> (Rgb32FImage, RgbImage) {
        match *self {
            Self::Resize { width, height } => (
                resize(image, width, height, FilterType::Triangle),
                resize(mask, width, height, FilterType::Nearest),
            ),
            Self::PadIfNeeded {
                min_width,
                min_height,
            } => (
                pad_center(image, min_width, min_height),
                pad_center(mask, min_width, min_height),
            ),
            Self::HorizontalFlip { p } => {
                if rng.random_bool(p) {
                    imageops::flip_horizontal_in_place(&mut image);
                    imageops::flip_horizontal_in_place(&mut mask);
                }
                (image, mask)
            }
            Self::BrightnessContrast {
                p,
                brightness_limit,
                contrast_limit,
            } => {
                if rng.random_bool(p) {
                    let alpha = 1.0 + rng.random_range(-contrast_limit..=contrast_limit);
                    let beta = rng.random_range(-brightness_limit..=brightness_limit);
                    adjust_brightness_contrast(&mut image, alpha, beta);
                }
                (image, mask)
            }
            Self::Rotate { limit } => {
                let angle = rng.random_range(-limit..=limit);
                if angle == 0.0 {
                    return (image, mask);
                }
                (
                    rotate_reflect_101(&image, angle, Interpolation::Bilinear, Rgb([0.0; 3])),
                    rotate_reflect_101(&mask, angle, Interpolation::Nearest, Rgb([0; 3])),
                )
            }
            Self::Normalize { mean, std } => {
                normalize(&mut image, mean, std);
                (image, mask)
            }
        }
    }
}

/// An ordered list of steps applied jointly to an image and its mask.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationTransform {
    steps: Vec<TransformStep>,
}

impl SegmentationTransform {
    /// Builds a transform from explicit steps.
    pub fn new(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }

    /// Training pipeline: resize, pad, flip, brightness/contrast, rotate, normalize.
    pub fn train(config: &AugmentationConfig) -> DatasetResult<Self> {
        config.validate()?;
        let (resize, pad) = Self::sizing_steps(config);

        Ok(Self::new(vec![
            resize,
            pad,
            TransformStep::HorizontalFlip {
                p: config.flip_prob,
            },
            TransformStep::BrightnessContrast {
                p: config.brightness_contrast_prob,
                brightness_limit: config.brightness_limit,
                contrast_limit: config.contrast_limit,
            },
            TransformStep::Rotate {
                limit: config.rotate_limit,
            },
            Self::normalize_step(config),
        ]))
    }

    /// Validation pipeline: resize, pad, normalize.
    pub fn valid(config: &AugmentationConfig) -> DatasetResult<Self> {
        config.validate()?;
        let (resize, pad) = Self::sizing_steps(config);

        Ok(Self::new(vec![resize, pad, Self::normalize_step(config)]))
    }

    fn sizing_steps(config: &AugmentationConfig) -> (TransformStep, TransformStep) {
        let (width, height) = config.target_size;
        let (min_width, min_height) = config.output_size();
        (
            TransformStep::Resize { width, height },
            TransformStep::PadIfNeeded {
                min_width,
                min_height,
            },
        )
    }

    fn normalize_step(config: &AugmentationConfig) -> TransformStep {
        TransformStep::Normalize {
            mean: config.mean,
            std: config.std,
        }
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// True when no step draws random parameters.
    pub fn is_deterministic(&self) -> bool {
        !self.steps.iter().any(TransformStep::is_random)
    }

    /// Runs every step in order on the image/mask pair.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        mut image: Rgb32FImage,
        mut mask: RgbImage,
        rng: &mut R,
    ) -> (Rgb32FImage, RgbImage) {
        for step in &self.steps {
            (image, mask) = step.apply(image, mask, rng);
        }
        (image, mask)
    }
}

fn resize<P>(
    image: ImageBuffer<P, Vec<P::Subpixel>>,
    width: u32,
    height: u32,
    filter: FilterType,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width, height, filter)
}

/// Zero-pads `image` to at least `min_width` x `min_height`.
///
/// The odd pixel of an uneven margin goes to the right/bottom.
fn pad_center<P>(
    image: ImageBuffer<P, Vec<P::Subpixel>>,
    min_width: u32,
    min_height: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let (width, height) = image.dimensions();
    if width >= min_width && height >= min_height {
        return image;
    }

    let out_width = width.max(min_width);
    let out_height = height.max(min_height);
    let left = (out_width - width) / 2;
    let top = (out_height - height) / 2;

    let mut canvas = ImageBuffer::new(out_width, out_height);
    imageops::replace(&mut canvas, &image, i64::from(left), i64::from(top));
    canvas
}

fn adjust_brightness_contrast(image: &mut Rgb32FImage, alpha: f32, beta: f32) {
    for value in image.iter_mut() {
        *value = value.mul_add(alpha, beta).clamp(0.0, 1.0);
    }
}

fn normalize(image: &mut Rgb32FImage, mean: [f32; 3], std: [f32; 3]) {
    for pixel in image.pixels_mut() {
        for ((value, m), s) in pixel.0.iter_mut().zip(mean).zip(std) {
            *value = (*value - m) / s;
        }
    }
}

/// Rotates `image` about its center with reflect-101 borders.
///
/// The image is first mirrored outwards (`dcb|abcd|cba`) by enough pixels to
/// cover every source location of the rotated frame, rotated with
/// `rotate_about_center`, then cropped back to its original size. Positive
/// angles turn the content counter-clockwise.
fn rotate_reflect_101<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    angle_degrees: f32,
    interpolation: Interpolation,
    fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + Send + Sync + 'static,
    P::Subpixel: Into<f32> + Clamp<f32> + Send + Sync + 'static,
{
    let (width, height) = image.dimensions();
    let theta = angle_degrees.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let (w, h) = (width as f32, height as f32);

    // Two extra pixels keep bilinear neighbours inside the padded frame.
    let pad_x = ((w * cos + h * sin - w) * 0.5).ceil().max(0.0) as u32 + 2;
    let pad_y = ((w * sin + h * cos - h) * 0.5).ceil().max(0.0) as u32 + 2;

    let padded = ImageBuffer::from_fn(width + 2 * pad_x, height + 2 * pad_y, |x, y| {
        let sx = reflect_101(i64::from(x) - i64::from(pad_x), width);
        let sy = reflect_101(i64::from(y) - i64::from(pad_y), height);
        *image.get_pixel(sx, sy)
    });

    // imageproc turns clockwise for positive angles.
    let rotated = rotate_about_center(&padded, -theta, interpolation, fill);
    imageops::crop_imm(&rotated, pad_x, pad_y, width, height).to_image()
}

/// Maps `index` into `0..len` by mirroring without repeating the edge.
fn reflect_101(index: i64, len: u32) -> u32 {
    let len = i64::from(len);
    if len <= 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let folded = index.rem_euclid(period);
    let mirrored = if folded < len { folded } else { period - folded };
    mirrored as u32
}
