#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Checkpoint metadata: the per-operator and per-subtask records of a
//! savepoint, the handles referencing persisted state, and the storage those
//! handles point into.

mod error;
mod handle;
mod operator_checkpoint;
mod savepoint;
mod storage;

pub use error::*;
pub use handle::*;
pub use operator_checkpoint::*;
pub use savepoint::*;
pub use storage::*;
