use std::io::Write;
use std::path::Path;

use error_stack::{IntoReport, ResultExt};

use crate::{CheckpointStorage, Error, OperatorCheckpoint, OperatorId};

/// Name of the savepoint descriptor within a savepoint directory.
pub const METADATA_FILE_NAME: &str = "_metadata";

/// The descriptor of a savepoint: the checkpointed state of every operator.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Savepoint {
    pub checkpoint_id: u64,
    pub operators: Vec<OperatorCheckpoint>,
}

impl Savepoint {
    pub fn new(checkpoint_id: u64, operators: Vec<OperatorCheckpoint>) -> Self {
        Self {
            checkpoint_id,
            operators,
        }
    }

    pub fn operator(&self, operator_id: &OperatorId) -> Option<&OperatorCheckpoint> {
        self.operators
            .iter()
            .find(|operator| operator.operator_id() == operator_id)
    }

    /// Return a savepoint where `operator` replaces the operator with the same
    /// id, or is added if there was none.
    pub fn with_operator(&self, operator: OperatorCheckpoint) -> Self {
        let mut operators = self.operators.clone();
        match operators
            .iter_mut()
            .find(|existing| existing.operator_id() == operator.operator_id())
        {
            Some(existing) => *existing = operator,
            None => operators.push(operator),
        }
        Self {
            checkpoint_id: self.checkpoint_id,
            operators,
        }
    }

    /// Read the descriptor stored in the savepoint directory `dir`.
    pub fn load(storage: &dyn CheckpointStorage, dir: &Path) -> error_stack::Result<Self, Error> {
        let path = dir.join(METADATA_FILE_NAME);
        let bytes = storage.read(&path)?;
        let savepoint: Savepoint = serde_json::from_slice(&bytes)
            .into_report()
            .change_context(Error::DeserializeMetadata)
            .attach_printable_lazy(|| path.display().to_string())?;
        tracing::info!(
            "Loaded savepoint {} with {} operators from {}",
            savepoint.checkpoint_id,
            savepoint.operators.len(),
            dir.display()
        );
        Ok(savepoint)
    }

    /// Write the descriptor into the savepoint directory `dir`.
    ///
    /// Fails if the directory already contains a descriptor.
    pub fn store(&self, storage: &dyn CheckpointStorage, dir: &Path) -> error_stack::Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(self)
            .into_report()
            .change_context(Error::SerializeMetadata)?;

        let path = dir.join(METADATA_FILE_NAME);
        let mut output = storage.create(&path)?;
        output
            .write_all(&bytes)
            .into_report()
            .change_context_lazy(|| Error::WriteFile(path.clone()))?;
        output.finish()?;
        Ok(())
    }
}
