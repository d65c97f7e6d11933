use std::path::PathBuf;

use heron_checkpoint::DistributionMode;
use heron_core::CodecDescriptor;

#[derive(derive_more::Display, Debug)]
pub enum Error {
    #[display(fmt = "failed to restore operator state from '{}'", "_0.display()")]
    Restore(PathBuf),
    #[display(fmt = "corrupt operator state snapshot '{}'", "_0.display()")]
    CorruptSnapshot(PathBuf),
    #[display(fmt = "failed to snapshot operator state")]
    Snapshot,
    #[display(fmt = "state '{name}' is registered as {registered} but was requested as {requested}")]
    ModeMismatch {
        name: String,
        registered: DistributionMode,
        requested: DistributionMode,
    },
    #[display(
        fmt = "state '{name}' is registered with codec '{registered}' but was requested with '{requested}'"
    )]
    CodecMismatch {
        name: String,
        registered: CodecDescriptor,
        requested: CodecDescriptor,
    },
    #[display(fmt = "failed to encode or decode an entry of state '{_0}'")]
    Codec(String),
}

impl error_stack::Context for Error {}
