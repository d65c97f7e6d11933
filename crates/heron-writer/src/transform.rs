use std::collections::BTreeMap;
use std::path::Path;

use error_stack::{IntoReportCompat, ResultExt};
use heron_checkpoint::{CheckpointStorage, OperatorCheckpoint, OperatorStateHandle};
use heron_dataset::WorkerPool;
use heron_state::OperatorStateBackend;

use crate::Error;

/// A transformation of the operator state of one subtask.
///
/// Called with the subtask index and the restored state of that subtask.
pub type OperatorStateTransform =
    dyn Fn(usize, &mut OperatorStateBackend) -> anyhow::Result<()> + Send + Sync;

/// Runs an [OperatorStateTransform] over the subtasks of an operator.
pub(crate) struct OperatorStateTransformer<'a> {
    pub storage: &'a dyn CheckpointStorage,
    pub dir: &'a Path,
    pub checkpoint_id: u64,
    pub timestamp_ms: i64,
    pub transform: &'a OperatorStateTransform,
}

impl<'a> OperatorStateTransformer<'a> {
    /// Transform the operator state of every subtask in `[0, parallelism)`.
    ///
    /// Subtasks beyond the parallelism of `base` start from empty state.
    pub fn transform_all(
        &self,
        pool: &WorkerPool,
        base: &OperatorCheckpoint,
        parallelism: usize,
    ) -> error_stack::Result<BTreeMap<usize, Vec<OperatorStateHandle>>, heron_dataset::Error> {
        let tasks: Vec<(usize, &[OperatorStateHandle])> = (0..parallelism)
            .map(|subtask| {
                let handles = base
                    .subtask_state(subtask)
                    .map(|state| state.managed_operator_state.as_slice())
                    .unwrap_or_default();
                (subtask, handles)
            })
            .collect();

        let results = pool.run_tasks(tasks, |_, (subtask, handles)| {
            let handles = self.transform_subtask(subtask, handles)?;
            Ok::<_, error_stack::Report<Error>>((subtask, handles))
        })?;
        Ok(results.into_iter().collect())
    }

    /// Restore, transform and (if modified) snapshot the state of `subtask`.
    ///
    /// Returns the original handles if the transform did not modify the state.
    pub fn transform_subtask(
        &self,
        subtask: usize,
        handles: &[OperatorStateHandle],
    ) -> error_stack::Result<Vec<OperatorStateHandle>, Error> {
        let mut backend = OperatorStateBackend::restore(self.storage, handles)
            .change_context(Error::RestoreOperatorState(subtask))?;

        // On failure the backend is released when it is dropped.
        (self.transform)(subtask, &mut backend)
            .into_report()
            .change_context(Error::TransformOperatorState(subtask))?;

        if !backend.is_modified() {
            tracing::debug!("Operator state of subtask {subtask} was not modified");
            backend.close();
            return Ok(handles.to_vec());
        }

        let handle = backend
            .snapshot(self.storage, self.dir, self.checkpoint_id, self.timestamp_ms)
            .change_context(Error::SnapshotOperatorState(subtask))?;
        backend.close();

        tracing::debug!(
            "Transformed operator state of subtask {subtask}: {}",
            handle
                .as_ref()
                .map_or("no remaining states".to_owned(), |handle| handle
                    .path
                    .display()
                    .to_string())
        );
        Ok(handle.into_iter().collect())
    }
}
