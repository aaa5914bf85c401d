//! Top-level data configuration.

use std::path::PathBuf;

use burn::{config::Config, tensor::backend::Backend};

use crate::{
    augmentation::AugmentationConfig,
    dataset::{build_datasets, SegmentationDataset},
    discovery::{discover, DatasetSplits},
    error::DatasetResult,
    labels::ClassRegistry,
    loader::{LoaderConfig, SegmentationLoader},
};

/// Everything needed to go from a dataset root to a pair of loaders.
///
/// Serialized as JSON through [`Config::save`] and [`Config::load`].
#[derive(Config, Debug)]
pub struct DataConfig {
    /// Directory holding `train_images`, `train_masks`, `valid_images` and
    /// `valid_masks`.
    pub root: PathBuf,

    /// Every class name, in label order.
    pub all_classes: Vec<String>,

    /// Reference mask color of each class in `all_classes`.
    pub label_colors: Vec<[u8; 3]>,

    /// Subset of `all_classes` that receives labels.
    pub classes_to_train: Vec<String>,

    /// Resize target as `(width, height)`.
    pub img_size: (u32, u32),

    #[config(default = 4)]
    pub batch_size: usize,

    #[config(default = 8)]
    pub num_workers: usize,

    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl DataConfig {
    /// # Errors
    ///
    /// See [`ClassRegistry::new`].
    pub fn registry(&self) -> DatasetResult<ClassRegistry> {
        ClassRegistry::new(
            self.all_classes.clone(),
            self.label_colors.clone(),
            self.classes_to_train.clone(),
        )
    }

    /// Augmentation parameters for `img_size` with default strengths.
    pub fn augmentation(&self) -> AugmentationConfig {
        AugmentationConfig::new(self.img_size)
    }

    pub fn loader_config(&self, shuffle: bool) -> LoaderConfig {
        LoaderConfig::new(self.batch_size)
            .with_num_workers(self.num_workers)
            .with_shuffle(shuffle)
            .with_seed(self.seed)
    }

    pub fn splits(&self) -> DatasetSplits {
        discover(&self.root)
    }

    /// Discovers the splits and builds the training and validation datasets.
    ///
    /// # Errors
    ///
    /// Returns an error if the class registry or augmentation parameters are
    /// invalid.
    pub fn datasets(&self) -> DatasetResult<(SegmentationDataset, SegmentationDataset)> {
        build_datasets(self.splits(), self.registry()?, &self.augmentation())
    }

    /// Builds the shuffling training loader and the ordered validation loader.
    ///
    /// # Errors
    ///
    /// Same as [`DataConfig::datasets`], plus loader configuration errors.
    pub fn build_loaders<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DatasetResult<(SegmentationLoader<B>, SegmentationLoader<B>)> {
        let (train, valid) = self.datasets()?;
        let train = SegmentationLoader::new(train, self.loader_config(true), device.clone())?;
        let valid = SegmentationLoader::new(valid, self.loader_config(false), device.clone())?;
        Ok((train, valid))
    }
}
