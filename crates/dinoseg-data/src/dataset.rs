//! Segmentation dataset over positionally paired image/mask files.
//!
//! Each access decodes both files, binarizes the mask, runs the augmentation
//! pipeline on the pair, converts the mask to a label map and lays the image
//! out channel-first. Nothing is cached. Items are raw `Vec` data; tensors are
//! only created by the batcher, on the device it is given.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use image::{Rgb32FImage, RgbImage};
use rand::Rng;

use crate::{
    augmentation::{AugmentationConfig, SegmentationTransform},
    discovery::DatasetSplits,
    error::{DatasetError, DatasetResult},
    labels::ClassRegistry,
    mask::binarize_mask_in_place,
};

/// One augmented sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationItem {
    /// Normalized RGB image data laid out as `[C, H, W]`.
    pub image: Vec<f32>,
    /// Label map laid out as `[H, W]`.
    pub label: Vec<i64>,
    pub height: usize,
    pub width: usize,
}

/// Dataset of image/mask pairs sharing one transform and class registry.
#[derive(Debug, Clone)]
pub struct SegmentationDataset {
    image_paths: Vec<PathBuf>,
    mask_paths: Vec<PathBuf>,
    transform: SegmentationTransform,
    registry: ClassRegistry,
}

impl SegmentationDataset {
    /// Creates a dataset. `image_paths[i]` is paired with `mask_paths[i]`.
    pub fn new(
        image_paths: Vec<PathBuf>,
        mask_paths: Vec<PathBuf>,
        transform: SegmentationTransform,
        registry: ClassRegistry,
    ) -> Self {
        Self {
            image_paths,
            mask_paths,
            transform,
            registry,
        }
    }

    pub fn image_paths(&self) -> &[PathBuf] {
        &self.image_paths
    }

    pub fn mask_paths(&self) -> &[PathBuf] {
        &self.mask_paths
    }

    pub fn transform(&self) -> &SegmentationTransform {
        &self.transform
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Loads sample `index` using the thread-local RNG for augmentation.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or either file cannot
    /// be decoded.
    pub fn try_get(&self, index: usize) -> DatasetResult<SegmentationItem> {
        self.try_get_with_rng(index, &mut rand::rng())
    }

    /// Loads sample `index`, drawing augmentation parameters from `rng`.
    ///
    /// # Errors
    ///
    /// Same as [`SegmentationDataset::try_get`].
    pub fn try_get_with_rng<R: Rng + ?Sized>(
        &self,
        index: usize,
        rng: &mut R,
    ) -> DatasetResult<SegmentationItem> {
        let image_path = self
            .image_paths
            .get(index)
            .ok_or(DatasetError::IndexOutOfBounds {
                index,
                len: self.image_paths.len(),
            })?;
        let mask_path = self
            .mask_paths
            .get(index)
            .ok_or(DatasetError::IndexOutOfBounds {
                index,
                len: self.mask_paths.len(),
            })?;

        let image = load_image(image_path)?;
        let mut mask = load_mask(mask_path)?;
        binarize_mask_in_place(&mut mask);

        let (image, mask) = self.transform.apply(image, mask, rng);
        let label = self.registry.label_mask(&mask);
        let (width, height) = image.dimensions();

        Ok(SegmentationItem {
            image: to_channel_first(&image),
            label,
            height: height as usize,
            width: width as usize,
        })
    }
}

impl Dataset<SegmentationItem> for SegmentationDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(DatasetError::IndexOutOfBounds { .. }) => None,
            Err(e) => {
                tracing::error!(index, error = %e, "failed to load sample");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.image_paths.len()
    }
}

/// Builds the training and validation datasets from discovered splits.
///
/// The training set uses the training pipeline, the validation set the
/// deterministic validation pipeline. Both share `registry`.
///
/// # Errors
///
/// Returns an error if `augmentation` fails validation.
pub fn build_datasets(
    splits: DatasetSplits,
    registry: ClassRegistry,
    augmentation: &AugmentationConfig,
) -> DatasetResult<(SegmentationDataset, SegmentationDataset)> {
    let train = SegmentationDataset::new(
        splits.train_images,
        splits.train_masks,
        SegmentationTransform::train(augmentation)?,
        registry.clone(),
    );
    let valid = SegmentationDataset::new(
        splits.valid_images,
        splits.valid_masks,
        SegmentationTransform::valid(augmentation)?,
        registry,
    );
    Ok((train, valid))
}

/// Decodes an image as RGB `f32` in `[0, 1]`, whatever its stored format.
pub fn load_image(path: &Path) -> DatasetResult<Rgb32FImage> {
    image::open(path)
        .map(|img| img.into_rgb32f())
        .map_err(|source| DatasetError::ImageOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Decodes a mask as 8-bit RGB.
pub fn load_mask(path: &Path) -> DatasetResult<RgbImage> {
    image::open(path)
        .map(|img| img.into_rgb8())
        .map_err(|source| DatasetError::MaskOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Reorders interleaved `[H, W, C]` pixels into planar `[C, H, W]`.
pub fn to_channel_first(image: &Rgb32FImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = width as usize * height as usize;
    let mut out = vec![0.0; plane * 3];

    for (offset, pixel) in image.pixels().enumerate() {
        for (channel, value) in pixel.0.iter().enumerate() {
            out[channel * plane + offset] = *value;
        }
    }

    out
}
