use std::path::PathBuf;

use heron_checkpoint::OperatorId;
use heron_core::{CodecDescriptor, KeyGroupRange};

#[derive(derive_more::Display, Debug)]
pub enum Error {
    #[display(fmt = "operator '{_0}' is not part of the savepoint")]
    UnknownOperator(OperatorId),
    #[display(fmt = "state '{_0}' is not registered")]
    UnknownState(String),
    #[display(fmt = "state '{_0}' is already registered")]
    DuplicateState(String),
    #[display(fmt = "key codec is fixed to '{registered}' and cannot change to '{requested}'")]
    KeyCodecMismatch {
        registered: CodecDescriptor,
        requested: CodecDescriptor,
    },
    #[display(
        fmt = "state '{name}' is registered with codec '{registered}' but was given '{requested}'"
    )]
    CodecMismatch {
        name: String,
        registered: CodecDescriptor,
        requested: CodecDescriptor,
    },
    #[display(fmt = "failed to register state '{_0}'")]
    RegisterState(String),
    #[display(fmt = "operator has no key codec registered")]
    MissingKeyCodec,
    #[display(fmt = "operator has keyed state but no keyed state rows were added")]
    MissingPartitionedRows,
    #[display(fmt = "parallelism {parallelism} must be between 1 and {max_parallelism}")]
    InvalidParallelism {
        parallelism: usize,
        max_parallelism: u32,
    },
    #[display(fmt = "subtask {_0} is dropped by rescaling but still has operator or raw state")]
    DroppedSubtaskState(usize),
    #[display(fmt = "key group {key_group} is outside of {range}")]
    KeyGroupOutOfRange {
        key_group: u32,
        range: KeyGroupRange,
    },
    #[display(fmt = "failed to convert entries of state '{_0}'")]
    ConvertState(String),
    #[display(fmt = "failed to encode keyed state header")]
    EncodeHeader,
    #[display(fmt = "failed to write keyed state of subtask {_0}")]
    WriteKeyedState(usize),
    #[display(fmt = "failed to read keyed state '{}'", "_0.display()")]
    ReadKeyedState(PathBuf),
    #[display(fmt = "corrupt keyed state '{}'", "_0.display()")]
    CorruptKeyedState(PathBuf),
    #[display(fmt = "failed to restore operator state of subtask {_0}")]
    RestoreOperatorState(usize),
    #[display(fmt = "failed to transform operator state of subtask {_0}")]
    TransformOperatorState(usize),
    #[display(fmt = "failed to snapshot operator state of subtask {_0}")]
    SnapshotOperatorState(usize),
    #[display(fmt = "failed to execute rewrite")]
    Execution,
    #[display(fmt = "failed to read writer options")]
    ReadOptions,
    #[display(fmt = "unsupported writer options extension '{_0}'")]
    InvalidOptionsExtension(String),
}

impl error_stack::Context for Error {}
