#![forbid(unsafe_code)]

//! Type checking, dataflow queries, and the loop parallelization analysis.

mod analyzer;
mod dataflow;
mod error;
mod sema;

pub use analyzer::{analyze_program, parallel_loop_count};
pub use dataflow::{deep_find_calls, deep_find_sets, used_not_created};
pub use error::SemaError;
pub use sema::Checker;
