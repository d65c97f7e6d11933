#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Operator state backend.
//!
//! Operator state is state that is not partitioned by key. Each subtask owns
//! a set of named list states and broadcast (map) states, which are restored
//! from [heron_checkpoint::OperatorStateHandle]s into memory, may be modified
//! and are then snapshotted into a new file.

mod broadcast_state;
mod error;
mod list_state;
mod operator_state_backend;
mod snapshot;

pub use broadcast_state::*;
pub use error::*;
pub use list_state::*;
pub use operator_state_backend::*;
