use std::path::PathBuf;

#[derive(derive_more::Display, Debug)]
pub enum Error {
    #[display(fmt = "failed to create storage runtime")]
    CreateRuntime,
    #[display(fmt = "invalid storage path '{}'", "_0.display()")]
    InvalidPath(PathBuf),
    #[display(fmt = "failed to create file '{}'", "_0.display()")]
    CreateFile(PathBuf),
    #[display(fmt = "failed to write file '{}'", "_0.display()")]
    WriteFile(PathBuf),
    #[display(fmt = "failed to read file '{}'", "_0.display()")]
    ReadFile(PathBuf),
    #[display(fmt = "failed to serialize savepoint metadata")]
    SerializeMetadata,
    #[display(fmt = "failed to deserialize savepoint metadata")]
    DeserializeMetadata,
}

impl error_stack::Context for Error {}
