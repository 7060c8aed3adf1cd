#![forbid(unsafe_code)]

//! Lowers checked and analyzed programs to host C++ plus CUDA kernels.

mod emit;
mod error;

pub use emit::{emit_program, CudaArtifacts};
pub use error::CudaBackendError;
