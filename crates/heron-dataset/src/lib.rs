#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Local, data-parallel collections.
//!
//! A [Dataset] is an in-memory collection split into one or more partitions.
//! Element-wise operations run on the calling thread. Grouped reductions are
//! executed as independent tasks on a [WorkerPool].

mod dataset;
mod error;
mod grouped;
mod worker_pool;

pub use dataset::*;
pub use error::*;
pub use grouped::*;
pub use worker_pool::*;
