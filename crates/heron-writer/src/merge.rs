use std::collections::BTreeMap;

use heron_checkpoint::{KeyGroupsStateHandle, OperatorCheckpoint, OperatorStateHandle};

use crate::Error;

/// Build the rewritten checkpoint of an operator.
///
/// Every subtask in `[0, parallelism)` gets a state: its keyed state is the
/// handle in `keyed_handles` (or none), its operator state is the handle in
/// `operator_handles` if the subtask was transformed, and everything else is
/// carried over from the subtask with the same index in `base`. Subtasks of
/// `base` beyond `parallelism` may only be dropped if they have no operator
/// or raw state.
pub fn merge_operator_state(
    base: &OperatorCheckpoint,
    parallelism: usize,
    mut keyed_handles: BTreeMap<usize, KeyGroupsStateHandle>,
    mut operator_handles: BTreeMap<usize, Vec<OperatorStateHandle>>,
) -> error_stack::Result<OperatorCheckpoint, Error> {
    check_parallelism(base, parallelism)?;
    debug_assert!(keyed_handles.keys().all(|index| *index < parallelism));

    let mut merged =
        OperatorCheckpoint::new(base.operator_id().clone(), parallelism, base.max_parallelism());
    for index in 0..parallelism {
        let mut state = base.subtask_state(index).cloned().unwrap_or_default();
        state.managed_keyed_state = keyed_handles.remove(&index);
        if let Some(handles) = operator_handles.remove(&index) {
            state.managed_operator_state = handles;
        }
        merged.put_subtask_state(index, state);
    }

    tracing::debug!(
        "Merged {} subtask states of operator {} (parallelism {} -> {parallelism})",
        merged.subtask_states().count(),
        base.operator_id(),
        base.parallelism()
    );
    Ok(merged)
}

/// Verify that `base` can be rewritten with `parallelism` subtasks.
pub fn check_parallelism(
    base: &OperatorCheckpoint,
    parallelism: usize,
) -> error_stack::Result<(), Error> {
    let max_parallelism = base.max_parallelism();
    error_stack::ensure!(
        parallelism >= 1 && parallelism <= max_parallelism as usize,
        Error::InvalidParallelism {
            parallelism,
            max_parallelism,
        }
    );

    for (index, state) in base.subtask_states() {
        if index >= parallelism && (state.has_operator_state() || state.has_raw_state()) {
            error_stack::bail!(Error::DroppedSubtaskState(index));
        }
    }
    Ok(())
}
