//! Batched, optionally parallel iteration over a [`SegmentationDataset`].
//!
//! An epoch splits the (possibly shuffled) index order into batch jobs. Jobs
//! are loaded either on the calling thread or by a bounded pool of worker
//! threads; finished jobs are reordered by batch number and collated on the
//! calling thread, so batches always come out in index-order chunks.

mod pool;

use std::{
    collections::BTreeMap,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    vec,
};

use burn::{config::Config, data::dataset::Dataset, tensor::backend::Backend};
use crossbeam_channel::{Receiver, Sender};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use self::pool::WorkerPool;
use crate::{
    batcher::{SegmentationBatch, SegmentationBatcher},
    dataset::{SegmentationDataset, SegmentationItem},
    error::{DatasetError, DatasetResult},
};

/// Configuration of a [`SegmentationLoader`].
///
/// The final partial batch is always kept.
#[derive(Config, Debug)]
pub struct LoaderConfig {
    pub batch_size: usize,

    /// Worker threads; `0` loads on the calling thread.
    #[config(default = 8)]
    pub num_workers: usize,

    /// Reshuffle the sample order at the start of every epoch.
    #[config(default = false)]
    pub shuffle: bool,

    /// Batches queued ahead per worker.
    #[config(default = 2)]
    pub prefetch_batches: usize,

    /// Base seed for shuffling and augmentation. Batch `b` of an epoch always
    /// gets the same augmentation draws, whatever the worker count. `None`
    /// draws fresh entropy every epoch.
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl LoaderConfig {
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidConfiguration`] for a zero batch size,
    /// or a zero prefetch depth while workers are enabled.
    pub fn validate(&self) -> DatasetResult<()> {
        if self.batch_size == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "batch_size must be at least 1".to_string(),
            });
        }
        if self.num_workers > 0 && self.prefetch_batches == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "prefetch_batches must be at least 1 when workers are used".to_string(),
            });
        }
        Ok(())
    }
}

/// Consecutive dataset indices forming batch number `batch` of an epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BatchJob {
    batch: usize,
    indices: Vec<usize>,
}

struct BatchOutput {
    batch: usize,
    items: DatasetResult<Vec<SegmentationItem>>,
}

/// Iterates a dataset in batches of [`SegmentationBatch`] on one device.
pub struct SegmentationLoader<B: Backend> {
    dataset: Arc<SegmentationDataset>,
    batcher: SegmentationBatcher<B>,
    config: LoaderConfig,
    device: B::Device,
    epoch: AtomicU64,
}

impl<B: Backend> SegmentationLoader<B> {
    /// # Errors
    ///
    /// Returns an error if `config` fails [`LoaderConfig::validate`].
    pub fn new(
        dataset: SegmentationDataset,
        config: LoaderConfig,
        device: B::Device,
    ) -> DatasetResult<Self> {
        config.validate()?;
        Ok(Self {
            dataset: Arc::new(dataset),
            batcher: SegmentationBatcher::new(),
            config,
            device,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn dataset(&self) -> &SegmentationDataset {
        &self.dataset
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Number of samples per epoch.
    pub fn num_items(&self) -> usize {
        self.dataset.len()
    }

    /// Number of batches per epoch, counting the final partial batch.
    pub fn num_batches(&self) -> usize {
        self.num_items().div_ceil(self.config.batch_size)
    }

    /// Starts a new epoch.
    ///
    /// Each call advances the epoch counter, so a shuffling loader visits
    /// the samples in a new order every time.
    pub fn iter(&self) -> SegmentationLoaderIter<'_, B> {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        let mut rng = self.epoch_rng(epoch);
        let order = epoch_order(self.num_items(), self.config.shuffle, &mut rng);
        let jobs = plan_batches(order, self.config.batch_size);

        tracing::debug!(
            epoch,
            items = self.num_items(),
            batches = jobs.len(),
            shuffle = self.config.shuffle,
            workers = self.config.num_workers,
            "starting loader epoch"
        );

        let augment_seed: u64 = rng.random();
        let state = if jobs.is_empty() {
            EpochState::Done
        } else if self.config.num_workers == 0 {
            EpochState::Inline {
                jobs: jobs.into_iter(),
                augment_seed,
            }
        } else {
            match self.spawn_epoch(jobs, augment_seed) {
                Ok(epoch) => EpochState::Pooled(Box::new(epoch)),
                Err(e) => EpochState::Failed(e),
            }
        };

        SegmentationLoaderIter {
            loader: self,
            state,
        }
    }

    fn epoch_rng(&self, epoch: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch)),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    fn spawn_epoch(&self, jobs: Vec<BatchJob>, augment_seed: u64) -> DatasetResult<PooledEpoch> {
        let total = jobs.len();
        let num_workers = self.config.num_workers.min(total);
        let capacity = num_workers * self.config.prefetch_batches;
        let dataset = Arc::clone(&self.dataset);

        let pool = WorkerPool::new(
            num_workers,
            capacity,
            move |worker,
                  jobs: Receiver<BatchJob>,
                  outputs: Sender<BatchOutput>,
                  shutdown: &AtomicBool| {
                for job in jobs.iter() {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let batch = job.batch;
                    let items = panic::catch_unwind(AssertUnwindSafe(|| {
                        load_job(&dataset, &job, augment_seed)
                    }))
                    .unwrap_or(Err(DatasetError::WorkerPanicked { worker, batch }));

                    if let Err(e) = &items {
                        tracing::warn!(worker, batch, error = %e, "failed to load batch");
                    }
                    if outputs.send(BatchOutput { batch, items }).is_err() {
                        break;
                    }
                }
            },
        )?;

        Ok(PooledEpoch {
            pool,
            pending: jobs.into_iter(),
            ready: BTreeMap::new(),
            next_batch: 0,
            total,
            in_flight: 0,
            capacity,
        })
    }
}

impl<'a, B: Backend> IntoIterator for &'a SegmentationLoader<B> {
    type Item = DatasetResult<SegmentationBatch<B>>;
    type IntoIter = SegmentationLoaderIter<'a, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One epoch of a [`SegmentationLoader`].
///
/// The first error is yielded once and ends the epoch. Dropping the iterator
/// stops and joins its workers.
pub struct SegmentationLoaderIter<'a, B: Backend> {
    loader: &'a SegmentationLoader<B>,
    state: EpochState,
}

enum EpochState {
    Inline {
        jobs: vec::IntoIter<BatchJob>,
        augment_seed: u64,
    },
    Pooled(Box<PooledEpoch>),
    Failed(DatasetError),
    Done,
}

impl<B: Backend> Iterator for SegmentationLoaderIter<'_, B> {
    type Item = DatasetResult<SegmentationBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, EpochState::Failed(_)) {
            if let EpochState::Failed(err) = mem::replace(&mut self.state, EpochState::Done) {
                return Some(Err(err));
            }
        }

        let items = match &mut self.state {
            EpochState::Inline { jobs, augment_seed } => match jobs.next() {
                Some(job) => load_job(&self.loader.dataset, &job, *augment_seed),
                None => {
                    self.state = EpochState::Done;
                    return None;
                }
            },
            EpochState::Pooled(epoch) => match epoch.next_items() {
                Some(items) => items,
                None => {
                    self.state = EpochState::Done;
                    return None;
                }
            },
            EpochState::Failed(_) | EpochState::Done => return None,
        };

        let batch = items.and_then(|items| {
            self.loader
                .batcher
                .try_batch(items, &self.loader.device)
        });
        if batch.is_err() {
            self.state = EpochState::Done;
        }
        Some(batch)
    }
}

/// Worker-backed epoch state.
///
/// `in_flight` counts jobs submitted but not yet handed out and never
/// exceeds the channel capacity, so neither side blocks on a full channel.
struct PooledEpoch {
    pool: WorkerPool<BatchJob, BatchOutput>,
    pending: vec::IntoIter<BatchJob>,
    ready: BTreeMap<usize, DatasetResult<Vec<SegmentationItem>>>,
    next_batch: usize,
    total: usize,
    in_flight: usize,
    capacity: usize,
}

impl PooledEpoch {
    fn next_items(&mut self) -> Option<DatasetResult<Vec<SegmentationItem>>> {
        if self.next_batch >= self.total {
            return None;
        }

        loop {
            while self.in_flight < self.capacity {
                let Some(job) = self.pending.next() else {
                    break;
                };
                if let Err(e) = self.pool.submit(job) {
                    return Some(Err(e));
                }
                self.in_flight += 1;
            }

            if let Some(items) = self.ready.remove(&self.next_batch) {
                self.next_batch += 1;
                self.in_flight -= 1;
                return Some(items);
            }

            match self.pool.recv() {
                Ok(output) => {
                    self.ready.insert(output.batch, output.items);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Builds the training and validation loaders.
///
/// Both use [`LoaderConfig`] defaults for workers and prefetching; only the
/// training loader shuffles.
///
/// # Errors
///
/// Returns an error if `batch_size` is zero.
pub fn build_loaders<B: Backend>(
    train: SegmentationDataset,
    valid: SegmentationDataset,
    batch_size: usize,
    device: &B::Device,
) -> DatasetResult<(SegmentationLoader<B>, SegmentationLoader<B>)> {
    let train = SegmentationLoader::new(
        train,
        LoaderConfig::new(batch_size).with_shuffle(true),
        device.clone(),
    )?;
    let valid = SegmentationLoader::new(valid, LoaderConfig::new(batch_size), device.clone())?;
    Ok((train, valid))
}

fn epoch_order<R: Rng + ?Sized>(len: usize, shuffle: bool, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}

fn plan_batches(order: Vec<usize>, batch_size: usize) -> Vec<BatchJob> {
    order
        .chunks(batch_size)
        .enumerate()
        .map(|(batch, indices)| BatchJob {
            batch,
            indices: indices.to_vec(),
        })
        .collect()
}

/// Loads one batch with an augmentation RNG keyed on the batch number, so the
/// result does not depend on which worker picked the job up.
fn load_job(
    dataset: &SegmentationDataset,
    job: &BatchJob,
    augment_seed: u64,
) -> DatasetResult<Vec<SegmentationItem>> {
    let mut rng = StdRng::seed_from_u64(augment_seed.wrapping_add(job.batch as u64));
    job.indices
        .iter()
        .map(|&index| dataset.try_get_with_rng(index, &mut rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{
        augmentation::{AugmentationConfig, SegmentationTransform, IMAGENET_MEAN, IMAGENET_STD},
        labels::ClassRegistry,
    };

    type TestBackend = burn::backend::ndarray::NdArray<f32>;

    const PLANE: usize = 8 * 8;
    const CENTER: usize = 4 * 8 + 4;

    fn registry() -> ClassRegistry {
        ClassRegistry::new(
            vec!["bg".into(), "road".into()],
            vec![[0, 0, 0], [255, 0, 0]],
            vec!["road".into()],
        )
        .unwrap()
    }

    /// Sample `i` has red value `10 * i`; even samples are fully road.
    fn write_samples(dir: &Path, count: usize) -> (Vec<PathBuf>, Vec<PathBuf>) {
        (0..count)
            .map(|i| {
                let image_path = dir.join(format!("img_{i:02}.png"));
                let mask_path = dir.join(format!("mask_{i:02}.png"));
                RgbImage::from_pixel(4, 4, Rgb([10 * i as u8, 0, 0]))
                    .save(&image_path)
                    .unwrap();
                let mask = if i % 2 == 0 { [255, 0, 0] } else { [0, 0, 0] };
                RgbImage::from_pixel(4, 4, Rgb(mask))
                    .save(&mask_path)
                    .unwrap();
                (image_path, mask_path)
            })
            .unzip()
    }

    fn dataset(images: Vec<PathBuf>, masks: Vec<PathBuf>) -> SegmentationDataset {
        let transform = SegmentationTransform::valid(&AugmentationConfig::new((4, 4))).unwrap();
        SegmentationDataset::new(images, masks, transform, registry())
    }

    /// Recovers sample indices from the center pixel of each image.
    fn sample_ids(batch: SegmentationBatch<TestBackend>) -> Vec<usize> {
        let n = batch.len();
        let images = batch.images.into_data().to_vec::<f32>().unwrap();
        (0..n)
            .map(|k| {
                let value = images[k * 3 * PLANE + CENTER] * IMAGENET_STD[0] + IMAGENET_MEAN[0];
                (value * 255.0 / 10.0).round() as usize
            })
            .collect()
    }

    #[test]
    fn plan_keeps_partial_batch() {
        let jobs = plan_batches((0..5).collect(), 2);
        let sizes: Vec<usize> = jobs.iter().map(|job| job.indices.len()).collect();

        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(jobs[2], BatchJob { batch: 2, indices: vec![4] });
    }

    #[test]
    fn epoch_order_is_identity_without_shuffle() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(epoch_order(4, false, &mut rng), vec![0, 1, 2, 3]);
    }

    #[test]
    fn shuffled_order_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut order = epoch_order(50, true, &mut rng);
        order.sort_unstable();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn config_defaults() {
        let config = LoaderConfig::new(4);
        assert_eq!(config.num_workers, 8);
        assert!(!config.shuffle);
        assert_eq!(config.prefetch_batches, 2);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = SegmentationLoader::<TestBackend>::new(
            dataset(Vec::new(), Vec::new()),
            LoaderConfig::new(0),
            Default::default(),
        );
        assert!(matches!(
            result,
            Err(DatasetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        let loader = SegmentationLoader::<TestBackend>::new(
            dataset(Vec::new(), Vec::new()),
            LoaderConfig::new(2),
            Default::default(),
        )
        .unwrap();

        assert_eq!(loader.num_batches(), 0);
        assert!(loader.iter().next().is_none());
    }

    #[test]
    fn inline_and_pooled_loading_agree() {
        let temp = tempfile::tempdir().unwrap();
        let (images, masks) = write_samples(temp.path(), 7);

        for num_workers in [0, 1, 3] {
            let loader = SegmentationLoader::<TestBackend>::new(
                dataset(images.clone(), masks.clone()),
                LoaderConfig::new(3).with_num_workers(num_workers),
                Default::default(),
            )
            .unwrap();
            assert_eq!(loader.num_batches(), 3);

            let mut ids = Vec::new();
            let mut sizes = Vec::new();
            for batch in &loader {
                let batch = batch.unwrap();
                sizes.push(batch.len());
                assert_eq!(batch.images.dims()[1..], [3, 8, 8]);
                ids.extend(sample_ids(batch));
            }

            assert_eq!(sizes, vec![3, 3, 1], "workers = {num_workers}");
            assert_eq!(ids, (0..7).collect::<Vec<_>>(), "workers = {num_workers}");
        }
    }

    #[test]
    fn labels_follow_samples() {
        let temp = tempfile::tempdir().unwrap();
        let (images, masks) = write_samples(temp.path(), 2);
        let loader = SegmentationLoader::<TestBackend>::new(
            dataset(images, masks),
            LoaderConfig::new(2).with_num_workers(2),
            Default::default(),
        )
        .unwrap();

        let batch = loader.iter().next().unwrap().unwrap();
        let labels = batch.labels.into_data().to_vec::<i64>().unwrap();

        assert_eq!(labels[CENTER], 1);
        assert_eq!(labels[PLANE + CENTER], 0);
        assert_eq!(labels[0], 0);
    }

    #[test]
    fn seeded_shuffle_covers_every_sample_and_changes_per_epoch() {
        let temp = tempfile::tempdir().unwrap();
        let (images, masks) = write_samples(temp.path(), 12);
        let loader = SegmentationLoader::<TestBackend>::new(
            dataset(images, masks),
            LoaderConfig::new(5)
                .with_shuffle(true)
                .with_num_workers(2)
                .with_seed(Some(42)),
            Default::default(),
        )
        .unwrap();

        let epoch = |loader: &SegmentationLoader<TestBackend>| -> Vec<usize> {
            loader
                .iter()
                .flat_map(|batch| sample_ids(batch.unwrap()))
                .collect()
        };
        let first = epoch(&loader);
        let second = epoch(&loader);

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..12).collect::<Vec<_>>());
        assert_ne!(first, second);

        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(first, epoch_order(12, true, &mut rng));
    }

    #[test]
    fn seeded_augmentation_does_not_depend_on_worker_count() {
        let temp = tempfile::tempdir().unwrap();
        let (images, masks) = write_samples(temp.path(), 16);
        let transform = SegmentationTransform::train(&AugmentationConfig::new((4, 4))).unwrap();
        let epoch_images = |num_workers: usize, seed: u64| -> Vec<f32> {
            let dataset = SegmentationDataset::new(
                images.clone(),
                masks.clone(),
                transform.clone(),
                registry(),
            );
            let loader = SegmentationLoader::<TestBackend>::new(
                dataset,
                LoaderConfig::new(2)
                    .with_shuffle(true)
                    .with_num_workers(num_workers)
                    .with_seed(Some(seed)),
                Default::default(),
            )
            .unwrap();
            loader
                .iter()
                .flat_map(|batch| batch.unwrap().images.into_data().to_vec::<f32>().unwrap())
                .collect()
        };

        let pooled = epoch_images(4, 7);
        assert_eq!(pooled, epoch_images(4, 7));
        assert_eq!(pooled, epoch_images(0, 7));
        assert_ne!(pooled, epoch_images(4, 8));
    }

    #[test]
    fn error_ends_the_epoch() {
        let temp = tempfile::tempdir().unwrap();
        let (mut images, masks) = write_samples(temp.path(), 3);
        let broken = temp.path().join("broken.png");
        fs::write(&broken, b"garbage").unwrap();
        images[1] = broken;

        for num_workers in [0, 2] {
            let loader = SegmentationLoader::<TestBackend>::new(
                dataset(images.clone(), masks.clone()),
                LoaderConfig::new(1).with_num_workers(num_workers),
                Default::default(),
            )
            .unwrap();

            let mut iter = loader.iter();
            assert!(iter.next().unwrap().is_ok());
            assert!(matches!(
                iter.next(),
                Some(Err(DatasetError::ImageOpenFailed { .. }))
            ));
            assert!(iter.next().is_none());
        }
    }

    #[test]
    fn dropping_a_partial_epoch_joins_workers() {
        let temp = tempfile::tempdir().unwrap();
        let (images, masks) = write_samples(temp.path(), 10);
        let loader = SegmentationLoader::<TestBackend>::new(
            dataset(images, masks),
            LoaderConfig::new(1).with_num_workers(2).with_prefetch_batches(1),
            Default::default(),
        )
        .unwrap();

        let mut iter = loader.iter();
        assert!(iter.next().unwrap().is_ok());
        drop(iter);

        assert_eq!(loader.iter().count(), 10);
    }

    #[test]
    fn build_loaders_shuffles_train_only() {
        let (train, valid) = build_loaders::<TestBackend>(
            dataset(Vec::new(), Vec::new()),
            dataset(Vec::new(), Vec::new()),
            4,
            &Default::default(),
        )
        .unwrap();

        assert!(train.config().shuffle);
        assert!(!valid.config().shuffle);
        assert_eq!(train.config().num_workers, 8);
        assert_eq!(valid.config().batch_size, 4);
    }
}
