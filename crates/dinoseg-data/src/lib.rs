//! Data pipeline for fine-tuning a vision transformer on semantic segmentation.
//!
//! Paired image/mask files are discovered under a fixed directory layout,
//! masks are binarized and mapped to class-index label maps, image and mask
//! are augmented together, and the results are collated into Burn tensors by
//! a multi-threaded loader.

pub mod augmentation;
pub mod batcher;
pub mod config;
pub mod dataset;
pub mod discovery;
pub mod error;
pub mod labels;
pub mod loader;
pub mod mask;

// Re-export commonly used types
pub use augmentation::{AugmentationConfig, SegmentationTransform, TransformStep};
pub use batcher::{SegmentationBatch, SegmentationBatcher};
pub use config::DataConfig;
pub use dataset::{build_datasets, SegmentationDataset, SegmentationItem};
pub use discovery::{discover, DatasetSplits};
pub use error::{DatasetError, DatasetResult};
pub use labels::{get_label_mask, set_class_values, ClassRegistry};
pub use loader::{build_loaders, LoaderConfig, SegmentationLoader, SegmentationLoaderIter};
pub use mask::{binarize_mask, binarize_mask_in_place};
