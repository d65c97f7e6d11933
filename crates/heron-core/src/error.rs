use crate::CodecDescriptor;

#[derive(derive_more::Display, Debug)]
pub enum Error {
    #[display(fmt = "failed to encode value with codec '{_0}'")]
    Encode(CodecDescriptor),
    #[display(fmt = "failed to decode value with codec '{_0}'")]
    Decode(CodecDescriptor),
    #[display(fmt = "state '{_0}' is already registered")]
    DuplicateState(String),
    #[display(fmt = "key codec is fixed to '{registered}' and cannot change to '{requested}'")]
    KeyCodecMismatch {
        registered: CodecDescriptor,
        requested: CodecDescriptor,
    },
    #[display(fmt = "too many states registered ({_0})")]
    TooManyStates(usize),
    #[display(fmt = "value of {_0} bytes is too large to frame")]
    TooLarge(usize),
    #[display(fmt = "unexpected end of data reading {needed} bytes at {position} of {len}")]
    Truncated {
        position: usize,
        needed: usize,
        len: usize,
    },
}

impl error_stack::Context for Error {}
