//! Error types for the segmentation data pipeline.
//!
//! Discovery never fails (missing directories simply yield empty lists), so
//! these variants cover decoding, class registry construction, collation and
//! the loader's worker pool.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for dataset, batching and loading operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Opening or decoding an image file failed.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// Opening or decoding a mask file failed.
    #[error("Failed to open mask: {path}")]
    MaskOpenFailed {
        /// The mask file path that failed to open.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// A sample index past the end of the dataset was requested.
    #[error("Index {index} out of bounds for dataset of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A class to train is not part of the registry.
    #[error("Unknown class: {name}")]
    UnknownClass {
        /// The class name that could not be found.
        name: String,
    },

    /// The registry has a different number of class names and colors.
    #[error("Class registry has {classes} classes but {colors} label colors")]
    ColorCountMismatch { classes: usize, colors: usize },

    /// A sample in a batch has a different shape than the first one.
    #[error("Sample {index} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Position of the offending sample inside the batch.
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Sample data does not match its declared dimensions.
    #[error("Sample {index} holds {actual} values, expected {expected}")]
    DataLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Collation was asked to stack zero samples.
    #[error("Cannot collate an empty batch")]
    EmptyBatch,

    /// Image and mask lists have different lengths.
    #[error("Found {images} images but {masks} masks")]
    PairCountMismatch { images: usize, masks: usize },

    /// Positionally paired image and mask have different file stems.
    #[error("Pair {index} does not match: image {image} vs mask {mask}")]
    PairingMismatch {
        index: usize,
        image: PathBuf,
        mask: PathBuf,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Spawning a loader worker thread failed.
    #[error("Failed to spawn loader worker {worker}")]
    WorkerSpawnFailed {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    /// A loader worker panicked while loading a batch.
    #[error("Loader worker {worker} panicked while loading batch {batch}")]
    WorkerPanicked { worker: usize, batch: usize },

    /// All loader workers exited before the epoch was complete.
    #[error("Loader workers disconnected before the epoch finished")]
    WorkerDisconnected,
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
