//! Class registry and color-mask to label-map conversion.

use image::RgbImage;

use crate::error::{DatasetError, DatasetResult};

/// Label written for pixels that match no trained class color.
pub const BACKGROUND_LABEL: i64 = 0;

/// Ordered class names, their reference colors and the supervised subset.
///
/// `class_values` is resolved once at construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRegistry {
    all_classes: Vec<String>,
    label_colors: Vec<[u8; 3]>,
    classes_to_train: Vec<String>,
    class_values: Vec<usize>,
}

impl ClassRegistry {
    /// Builds a registry, resolving `classes_to_train` against `all_classes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of colors differs from the number of
    /// classes, or if a class to train is not in `all_classes`.
    pub fn new(
        all_classes: Vec<String>,
        label_colors: Vec<[u8; 3]>,
        classes_to_train: Vec<String>,
    ) -> DatasetResult<Self> {
        if all_classes.len() != label_colors.len() {
            return Err(DatasetError::ColorCountMismatch {
                classes: all_classes.len(),
                colors: label_colors.len(),
            });
        }

        let class_values = set_class_values(&all_classes, &classes_to_train)?;

        Ok(Self {
            all_classes,
            label_colors,
            classes_to_train,
            class_values,
        })
    }

    pub fn all_classes(&self) -> &[String] {
        &self.all_classes
    }

    pub fn label_colors(&self) -> &[[u8; 3]] {
        &self.label_colors
    }

    pub fn classes_to_train(&self) -> &[String] {
        &self.classes_to_train
    }

    /// Indices into `all_classes` of the supervised classes, in training order.
    pub fn class_values(&self) -> &[usize] {
        &self.class_values
    }

    /// Number of distinct label values a label map can hold.
    pub fn num_classes(&self) -> usize {
        self.all_classes.len()
    }

    /// Converts a binarized RGB mask into a label map with this registry.
    pub fn label_mask(&self, mask: &RgbImage) -> Vec<i64> {
        get_label_mask(mask, &self.class_values, &self.label_colors)
    }
}

/// Resolves each name of `classes_to_train` to its index in `all_classes`.
///
/// Each trained name is lowercased before the lookup, so `all_classes` is
/// expected to hold lowercase names. The returned order follows
/// `classes_to_train`.
pub fn set_class_values<S: AsRef<str>>(
    all_classes: &[S],
    classes_to_train: &[S],
) -> DatasetResult<Vec<usize>> {
    classes_to_train
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let wanted = name.to_lowercase();
            all_classes
                .iter()
                .position(|class| class.as_ref() == wanted)
                .ok_or_else(|| DatasetError::UnknownClass {
                    name: name.to_owned(),
                })
        })
        .collect()
}

/// Builds a row-major label map from a binarized RGB mask.
///
/// A pixel whose color equals `label_colors[v]` for some `v` in
/// `class_values` gets label `v`; every other pixel is background. Later
/// entries of `class_values` win when two classes share a color.
pub fn get_label_mask(
    mask: &RgbImage,
    class_values: &[usize],
    label_colors: &[[u8; 3]],
) -> Vec<i64> {
    let targets: Vec<([u8; 3], i64)> = class_values
        .iter()
        .filter_map(|&value| label_colors.get(value).map(|color| (*color, value as i64)))
        .collect();

    mask.pixels()
        .map(|pixel| {
            targets
                .iter()
                .rev()
                .find(|(color, _)| *color == pixel.0)
                .map_or(BACKGROUND_LABEL, |(_, value)| *value)
        })
        .collect()
}
