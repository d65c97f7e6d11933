#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! Core types shared by the savepoint rewriter.
//!
//! Partitioned ("keyed") state is sharded into a fixed number of key groups.
//! Each subtask of an operator owns a contiguous range of key groups, which
//! allows the state to be redistributed when the parallelism changes.

pub mod codec;
mod error;
pub mod key_groups;
mod registry;
mod state_row;
pub mod wire;

pub use codec::{CodecDescriptor, DefaultCodec, TypeCodec};
pub use error::Error;
pub use key_groups::KeyGroupRange;
pub use registry::*;
pub use state_row::*;
