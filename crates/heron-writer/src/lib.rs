#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Offline rewriting of operator state in a savepoint.
//!
//! An [OperatorStateWriter] takes the checkpointed state of one operator and
//! produces a new [heron_checkpoint::OperatorCheckpoint]:
//!
//! 1. Keyed state rows are grouped by the subtask owning their key group,
//!    sorted by key group and state name and written into one key-groups
//!    blob per subtask.
//! 2. If a transform is registered, the operator state of each subtask is
//!    restored, transformed and snapshotted.
//! 3. The new handles are merged with the untouched parts of the original
//!    subtask states.
//!
//! Nothing is published until every file was written, so a failed rewrite
//! leaves the original checkpoint as the only valid one.

mod error;
mod key_groups_reader;
mod key_groups_writer;
mod merge;
mod operator_state_writer;
mod options;
mod transform;
mod value_state;

pub use error::*;
pub use key_groups_reader::*;
pub use key_groups_writer::*;
pub use merge::*;
pub use operator_state_writer::*;
pub use options::*;
pub use transform::*;
pub use value_state::*;
