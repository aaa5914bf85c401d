//! `dinoseg`: segmentation data pipeline for fine-tuning vision transformer
//! backbones with Burn.
//!
//! Re-exports the [`dinoseg_data`] pipeline, selects a backend through cargo
//! features and provides the dataset inspection used by the `dinoseg` binary.

pub mod backend;
pub mod inspect;

#[doc(inline)]
pub use backend::burn_backend_types;
#[doc(inline)]
pub use dinoseg_data as data;
