//! Collation of segmentation items into batched tensors.

use std::marker::PhantomData;

use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};

use crate::{
    dataset::SegmentationItem,
    error::{DatasetError, DatasetResult},
};

/// A batch of images and their label maps, in sample order.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// Images with shape `[N, 3, H, W]`.
    pub images: Tensor<B, 4>,
    /// Label maps with shape `[N, H, W]`.
    pub labels: Tensor<B, 3, Int>,
}

impl<B: Backend> SegmentationBatch<B> {
    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the batch into `(images, labels)`.
    pub fn into_pair(self) -> (Tensor<B, 4>, Tensor<B, 3, Int>) {
        (self.images, self.labels)
    }
}

/// Stacks [`SegmentationItem`]s along a new leading batch dimension.
///
/// No padding to a common size happens here; every item must already have
/// the same height and width.
#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }

    /// Stacks `items` on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::EmptyBatch`] for no items, and a shape or
    /// length error if any item disagrees with the first one.
    pub fn try_batch(
        &self,
        items: Vec<SegmentationItem>,
        device: &B::Device,
    ) -> DatasetResult<SegmentationBatch<B>> {
        let first = items.first().ok_or(DatasetError::EmptyBatch)?;
        let (height, width) = (first.height, first.width);
        let plane = height * width;

        for (index, item) in items.iter().enumerate() {
            let actual = (item.height, item.width);
            if actual != (height, width) {
                return Err(DatasetError::ShapeMismatch {
                    index,
                    expected: (height, width),
                    actual,
                });
            }
            for (expected, actual) in [(3 * plane, item.image.len()), (plane, item.label.len())] {
                if expected != actual {
                    return Err(DatasetError::DataLengthMismatch {
                        index,
                        expected,
                        actual,
                    });
                }
            }
        }

        let mut images = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(items.len());

        for item in items {
            images.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [3, height, width]).convert::<B::FloatElem>(),
                device,
            ));
            labels.push(Tensor::<B, 2, Int>::from_data(
                TensorData::new(item.label, [height, width]).convert::<B::IntElem>(),
                device,
            ));
        }

        Ok(SegmentationBatch {
            images: Tensor::stack(images, 0),
            labels: Tensor::stack(labels, 0),
        })
    }
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        self.try_batch(items, device)
            .expect("segmentation items in a batch must share one shape")
    }
}
