//! Backend selection from cargo features.
//!
//! `cuda` wins over `wgpu`, which wins over the default `ndarray` CPU backend.

pub mod burn_backend_types {
    use cfg_if::cfg_if;

    cfg_if! {
        if #[cfg(feature = "cuda")] {
            use burn::backend::cuda::{Cuda, CudaDevice};

            pub type InferenceBackend = Cuda;
            pub type InferenceDevice = CudaDevice;
            /// Backend name for logging.
            pub const NAME: &str = "CUDA (NVIDIA GPU)";
        } else if #[cfg(feature = "wgpu")] {
            use burn::backend::wgpu::{Wgpu, WgpuDevice};

            pub type InferenceBackend = Wgpu;
            pub type InferenceDevice = WgpuDevice;
            /// Backend name for logging.
            pub const NAME: &str = "WGPU (GPU)";
        } else {
            use burn::backend::ndarray::{NdArray, NdArrayDevice};

            pub type InferenceBackend = NdArray;
            pub type InferenceDevice = NdArrayDevice;
            /// Backend name for logging.
            pub const NAME: &str = "NdArray (CPU)";
        }
    }
}
