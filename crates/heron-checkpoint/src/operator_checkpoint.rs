use std::collections::BTreeMap;

use crate::{KeyGroupsStateHandle, OperatorStateHandle, StateHandle};

/// Identity of an operator within a job graph.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The state of one subtask of an operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubtaskState {
    /// Non-keyed state managed by the operator state backend.
    pub managed_operator_state: Vec<OperatorStateHandle>,
    /// Raw operator state, carried through untouched.
    pub raw_operator_state: Vec<StateHandle>,
    /// Keyed state for the key groups owned by this subtask.
    pub managed_keyed_state: Option<KeyGroupsStateHandle>,
    /// Raw keyed state, carried through untouched.
    pub raw_keyed_state: Vec<StateHandle>,
}

impl SubtaskState {
    pub fn has_operator_state(&self) -> bool {
        !self.managed_operator_state.is_empty()
    }

    pub fn has_raw_state(&self) -> bool {
        !self.raw_operator_state.is_empty() || !self.raw_keyed_state.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_operator_state() && !self.has_raw_state() && self.managed_keyed_state.is_none()
    }
}

/// The checkpointed state of one operator across all of its subtasks.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OperatorCheckpoint {
    operator_id: OperatorId,
    parallelism: usize,
    max_parallelism: u32,
    subtask_states: BTreeMap<usize, SubtaskState>,
}

impl OperatorCheckpoint {
    pub fn new(operator_id: OperatorId, parallelism: usize, max_parallelism: u32) -> Self {
        Self {
            operator_id,
            parallelism,
            max_parallelism,
            subtask_states: BTreeMap::new(),
        }
    }

    /// Set the state of the subtask at `index`, replacing any previous state.
    pub fn put_subtask_state(&mut self, index: usize, state: SubtaskState) {
        debug_assert!(
            index < self.parallelism,
            "subtask {index} out of range for parallelism {}",
            self.parallelism
        );
        self.subtask_states.insert(index, state);
    }

    pub fn operator_id(&self) -> &OperatorId {
        &self.operator_id
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn max_parallelism(&self) -> u32 {
        self.max_parallelism
    }

    pub fn subtask_state(&self, index: usize) -> Option<&SubtaskState> {
        self.subtask_states.get(&index)
    }

    /// Subtask states in index order.
    pub fn subtask_states(&self) -> impl Iterator<Item = (usize, &SubtaskState)> + '_ {
        self.subtask_states
            .iter()
            .map(|(index, state)| (*index, state))
    }

    /// Handles of the keyed state of all subtasks, in index order.
    pub fn keyed_state_handles(&self) -> impl Iterator<Item = &KeyGroupsStateHandle> + '_ {
        self.subtask_states
            .values()
            .filter_map(|state| state.managed_keyed_state.as_ref())
    }

    pub fn has_keyed_state(&self) -> bool {
        self.keyed_state_handles().next().is_some()
    }

    pub fn state_size(&self) -> u64 {
        self.subtask_states
            .values()
            .map(|state| {
                let keyed = state
                    .managed_keyed_state
                    .as_ref()
                    .map_or(0, |handle| handle.state_size);
                let managed: u64 = state
                    .managed_operator_state
                    .iter()
                    .map(|handle| handle.state_size)
                    .sum();
                let raw: u64 = state
                    .raw_operator_state
                    .iter()
                    .chain(state.raw_keyed_state.iter())
                    .map(StateHandle::state_size)
                    .sum();
                keyed + managed + raw
            })
            .sum()
    }
}
