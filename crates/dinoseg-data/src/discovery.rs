//! File discovery for the fixed train/valid directory layout.
//!
//! A dataset root is expected to contain four directories:
//!
//! ```text
//! root/
//! ├── train_images/
//! ├── train_masks/
//! ├── valid_images/
//! └── valid_masks/
//! ```
//!
//! Every entry of each directory is listed with a `*` glob and the lists are
//! sorted by their full path string. Images and masks are paired by position
//! only, so file names must sort into the same order on both sides.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::error::{DatasetError, DatasetResult};

pub const TRAIN_IMAGES_DIR: &str = "train_images";
pub const TRAIN_MASKS_DIR: &str = "train_masks";
pub const VALID_IMAGES_DIR: &str = "valid_images";
pub const VALID_MASKS_DIR: &str = "valid_masks";

/// Sorted file lists for the four directory roles of a dataset root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSplits {
    pub train_images: Vec<PathBuf>,
    pub train_masks: Vec<PathBuf>,
    pub valid_images: Vec<PathBuf>,
    pub valid_masks: Vec<PathBuf>,
}

impl DatasetSplits {
    /// Checks that positionally paired images and masks share a file stem.
    ///
    /// Discovery itself never performs this check; call it when a dataset is
    /// known to use matching names on both sides.
    pub fn check_pairing(&self) -> DatasetResult<()> {
        check_pairs(&self.train_images, &self.train_masks)?;
        check_pairs(&self.valid_images, &self.valid_masks)
    }
}

/// Lists and sorts the files of the four directory roles under `root`.
///
/// Missing directories produce empty lists.
pub fn discover(root: impl AsRef<Path>) -> DatasetSplits {
    let root = root.as_ref();
    let splits = DatasetSplits {
        train_images: list_sorted(root, TRAIN_IMAGES_DIR),
        train_masks: list_sorted(root, TRAIN_MASKS_DIR),
        valid_images: list_sorted(root, VALID_IMAGES_DIR),
        valid_masks: list_sorted(root, VALID_MASKS_DIR),
    };

    tracing::info!(
        root = %root.display(),
        train_images = splits.train_images.len(),
        train_masks = splits.train_masks.len(),
        valid_images = splits.valid_images.len(),
        valid_masks = splits.valid_masks.len(),
        "discovered dataset files",
    );

    splits
}

/// Globs `<root>/<subdir>/*` and sorts the matches by path string.
fn list_sorted(root: &Path, subdir: &str) -> Vec<PathBuf> {
    let base = Pattern::escape(&root.join(subdir).to_string_lossy());
    let pattern = format!("{base}/*");
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };

    let entries = match glob::glob_with(&pattern, options) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "invalid glob pattern");
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(path = %e.path().display(), error = %e, "skipping unreadable entry");
                None
            }
        })
        .collect();

    paths.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
    paths
}

fn check_pairs(images: &[PathBuf], masks: &[PathBuf]) -> DatasetResult<()> {
    if images.len() != masks.len() {
        return Err(DatasetError::PairCountMismatch {
            images: images.len(),
            masks: masks.len(),
        });
    }

    for (index, (image, mask)) in images.iter().zip(masks).enumerate() {
        if image.file_stem() != mask.file_stem() {
            return Err(DatasetError::PairingMismatch {
                index,
                image: image.clone(),
                mask: mask.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn lists_are_sorted_by_path_string() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        for name in ["b.png", "a.png", "c.jpg", "B.png"] {
            touch(&root.join(TRAIN_IMAGES_DIR), name);
        }
        touch(&root.join(VALID_MASKS_DIR), "x.txt");

        let splits = discover(root);

        let names: Vec<_> = splits
            .train_images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["B.png", "a.png", "b.png", "c.jpg"]);
        assert_eq!(splits.valid_masks.len(), 1);
        assert!(splits.train_masks.is_empty());
        assert!(splits.valid_images.is_empty());
    }

    #[test]
    fn missing_root_yields_empty_lists() {
        let temp = tempfile::tempdir().unwrap();
        let splits = discover(temp.path().join("does-not-exist"));
        assert_eq!(splits, DatasetSplits::default());
    }

    #[test]
    fn hidden_files_are_not_matched() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join(TRAIN_MASKS_DIR);
        touch(&dir, ".DS_Store");
        touch(&dir, "0001.png");

        let splits = discover(temp.path());
        assert_eq!(splits.train_masks, vec![dir.join("0001.png")]);
    }

    #[test]
    fn root_with_glob_metacharacters_is_literal() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("set[1]");
        touch(&root.join(VALID_IMAGES_DIR), "img.png");

        let splits = discover(&root);
        assert_eq!(splits.valid_images.len(), 1);
    }

    #[test]
    fn pairing_check_reports_first_mismatch() {
        let splits = DatasetSplits {
            train_images: vec!["im/a.jpg".into(), "im/b.jpg".into()],
            train_masks: vec!["gt/a.png".into(), "gt/c.png".into()],
            ..Default::default()
        };

        match splits.check_pairing() {
            Err(DatasetError::PairingMismatch { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn pairing_check_reports_count_mismatch() {
        let splits = DatasetSplits {
            valid_images: vec!["im/a.jpg".into()],
            ..Default::default()
        };

        assert!(matches!(
            splits.check_pairing(),
            Err(DatasetError::PairCountMismatch { images: 1, masks: 0 })
        ));
    }
}
