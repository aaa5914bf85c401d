//! Walks a dataset root through the whole pipeline for one epoch per split.

use std::{fs, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::backend::Backend;
use clap::Args;
use dinoseg_data::{
    build_datasets, DataConfig, DatasetSplits, SegmentationBatch, SegmentationLoader,
};

/// Arguments of the `inspect` subcommand.
///
/// Either `--config` or the `--root`/`--img-size`/`--classes`/`--color` group
/// must be given. Flags given next to `--config` override the file.
#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// JSON data configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Dataset root containing train_images, train_masks, valid_images and valid_masks
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Resize target as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    pub img_size: Option<(u32, u32)>,

    /// Every class name, in label order
    #[arg(long, value_delimiter = ',')]
    pub classes: Vec<String>,

    /// Mask color of each class as R,G,B (repeat once per class)
    #[arg(long = "color", value_parser = parse_color)]
    pub colors: Vec<[u8; 3]>,

    /// Classes that receive labels (defaults to every class)
    #[arg(long, value_delimiter = ',')]
    pub train: Vec<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub num_workers: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Fail if paired image and mask file stems differ
    #[arg(long)]
    pub check_pairing: bool,

    /// Write the resolved configuration to this file
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

impl InspectArgs {
    /// Builds the [`DataConfig`] from the config file and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// required values are missing without one.
    pub fn resolve(&self) -> Result<DataConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let config_str = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                serde_json::from_str::<DataConfig>(&config_str)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => {
                let Some(root) = self.root.clone() else {
                    bail!("--root is required without --config");
                };
                let Some(img_size) = self.img_size else {
                    bail!("--img-size is required without --config");
                };
                if self.classes.is_empty() {
                    bail!("--classes is required without --config");
                }
                let train = if self.train.is_empty() {
                    self.classes.clone()
                } else {
                    self.train.clone()
                };
                DataConfig::new(
                    root,
                    self.classes.clone(),
                    self.colors.clone(),
                    train,
                    img_size,
                )
            }
        };

        if self.config.is_some() {
            if let Some(root) = &self.root {
                config.root = root.clone();
            }
            if let Some(img_size) = self.img_size {
                config.img_size = img_size;
            }
            if !self.classes.is_empty() {
                config.all_classes = self.classes.clone();
            }
            if !self.colors.is_empty() {
                config.label_colors = self.colors.clone();
            }
            if !self.train.is_empty() {
                config.classes_to_train = self.train.clone();
            }
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }

        Ok(config)
    }
}

/// What one epoch over a split produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub items: usize,
    pub batches: usize,
    /// Shape of the first image batch, `[N, C, H, W]`.
    pub image_dims: Option<[usize; 4]>,
    /// Pixel count per label value, indexed by class value.
    pub label_histogram: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectReport {
    pub splits: DatasetSplits,
    pub train: SplitSummary,
    pub valid: SplitSummary,
}

/// Runs discovery, builds both loaders and drains one epoch of each.
///
/// # Errors
///
/// Returns the first pipeline error, with the split it happened in.
pub fn run_inspect<B: Backend>(
    config: &DataConfig,
    check_pairing: bool,
    device: &B::Device,
) -> Result<InspectReport> {
    let splits = config.splits();
    if check_pairing {
        splits
            .check_pairing()
            .context("image and mask files are not paired")?;
    }

    let registry = config.registry().context("invalid class configuration")?;
    let num_classes = registry.num_classes();
    let (train, valid) = build_datasets(splits.clone(), registry, &config.augmentation())
        .context("failed to build datasets")?;

    let train = SegmentationLoader::<B>::new(train, config.loader_config(true), device.clone())?;
    let valid = SegmentationLoader::<B>::new(valid, config.loader_config(false), device.clone())?;

    let train = summarize_epoch("train", &train, num_classes)?;
    let valid = summarize_epoch("valid", &valid, num_classes)?;

    Ok(InspectReport {
        splits,
        train,
        valid,
    })
}

fn summarize_epoch<B: Backend>(
    split: &str,
    loader: &SegmentationLoader<B>,
    num_classes: usize,
) -> Result<SplitSummary> {
    tracing::info!(
        split,
        items = loader.num_items(),
        batches = loader.num_batches(),
        "loading epoch"
    );

    let mut summary = SplitSummary {
        label_histogram: vec![0; num_classes],
        ..Default::default()
    };

    for (index, batch) in loader.iter().enumerate() {
        let batch = batch.with_context(|| format!("{split} batch {index} failed"))?;
        let dims = batch.images.dims();
        tracing::debug!(split, batch = index, ?dims, "batch loaded");

        summary.items += batch.len();
        summary.batches += 1;
        summary.image_dims.get_or_insert(dims);
        accumulate_labels(batch, &mut summary.label_histogram)?;
    }

    tracing::info!(
        split,
        items = summary.items,
        batches = summary.batches,
        image_dims = ?summary.image_dims,
        histogram = ?summary.label_histogram,
        "epoch summary"
    );

    Ok(summary)
}

fn accumulate_labels<B: Backend>(batch: SegmentationBatch<B>, histogram: &mut [u64]) -> Result<()> {
    let labels = batch
        .labels
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow!("failed to read labels: {e:?}"))?;

    for label in labels {
        if let Some(count) = usize::try_from(label)
            .ok()
            .and_then(|value| histogram.get_mut(value))
        {
            *count += 1;
        }
    }
    Ok(())
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("{v:?}: {e}"));
    Ok((parse(width)?, parse(height)?))
}

fn parse_color(s: &str) -> Result<[u8; 3], String> {
    let parts: Vec<&str> = s.split(',').collect();
    let [r, g, b] = parts.as_slice() else {
        return Err(format!("expected R,G,B, got {s:?}"));
    };
    let parse = |v: &str| v.trim().parse::<u8>().map_err(|e| format!("{v:?}: {e}"));
    Ok([parse(*r)?, parse(*g)?, parse(*b)?])
}
