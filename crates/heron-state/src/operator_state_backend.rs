use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use heron_checkpoint::DistributionMode;
use heron_core::{CodecDescriptor, TypeCodec};

use crate::{BroadcastState, Error, ListState};

/// Registration of a list state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct ListStateMeta {
    pub mode: DistributionMode,
    pub element_codec: CodecDescriptor,
}

/// Registration of a broadcast state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct BroadcastStateMeta {
    pub key_codec: CodecDescriptor,
    pub value_codec: CodecDescriptor,
}

#[derive(Debug)]
pub(crate) struct RegisteredListState {
    pub meta: ListStateMeta,
    pub elements: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub(crate) struct RegisteredBroadcastState {
    pub meta: BroadcastStateMeta,
    pub entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Mutable, in-memory view of the operator state of one subtask.
///
/// States are registered on first access with the codec used for their
/// entries. Accessing a restored state with a different codec or
/// distribution mode fails.
///
/// The backend tracks whether anything was changed since it was created or
/// restored. Its memory is released when it is closed or dropped.
#[derive(Debug, Default)]
pub struct OperatorStateBackend {
    pub(crate) list_states: BTreeMap<String, RegisteredListState>,
    pub(crate) broadcast_states: BTreeMap<String, RegisteredBroadcastState>,
    modified: bool,
    released: bool,
}

impl OperatorStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the list state `name` whose elements are split among subtasks
    /// on restore, registering it if needed.
    pub fn list_state<T, C: TypeCodec<T>>(
        &mut self,
        name: &str,
        codec: C,
    ) -> error_stack::Result<ListState<'_, T, C>, Error> {
        self.register_list(name, DistributionMode::SplitDistribute, codec)
    }

    /// Return the list state `name` whose elements are given to every subtask
    /// on restore, registering it if needed.
    pub fn union_list_state<T, C: TypeCodec<T>>(
        &mut self,
        name: &str,
        codec: C,
    ) -> error_stack::Result<ListState<'_, T, C>, Error> {
        self.register_list(name, DistributionMode::Union, codec)
    }

    fn register_list<T, C: TypeCodec<T>>(
        &mut self,
        name: &str,
        mode: DistributionMode,
        codec: C,
    ) -> error_stack::Result<ListState<'_, T, C>, Error> {
        error_stack::ensure!(
            !self.broadcast_states.contains_key(name),
            Error::ModeMismatch {
                name: name.to_owned(),
                registered: DistributionMode::Broadcast,
                requested: mode,
            }
        );

        let element_codec = codec.descriptor();
        let state = match self.list_states.entry(name.to_owned()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                error_stack::ensure!(
                    state.meta.mode == mode,
                    Error::ModeMismatch {
                        name: name.to_owned(),
                        registered: state.meta.mode,
                        requested: mode,
                    }
                );
                error_stack::ensure!(
                    state.meta.element_codec == element_codec,
                    Error::CodecMismatch {
                        name: name.to_owned(),
                        registered: state.meta.element_codec.clone(),
                        requested: element_codec,
                    }
                );
                state
            }
            Entry::Vacant(entry) => {
                tracing::debug!("Registering {mode} list state '{name}'");
                self.modified = true;
                entry.insert(RegisteredListState {
                    meta: ListStateMeta {
                        mode,
                        element_codec,
                    },
                    elements: Vec::new(),
                })
            }
        };

        Ok(ListState::new(
            name,
            &mut state.elements,
            &mut self.modified,
            codec,
        ))
    }

    /// Return the broadcast state `name`, registering it if needed.
    pub fn broadcast_state<K, V, KC, VC>(
        &mut self,
        name: &str,
        key_codec: KC,
        value_codec: VC,
    ) -> error_stack::Result<BroadcastState<'_, K, V, KC, VC>, Error>
    where
        KC: TypeCodec<K>,
        VC: TypeCodec<V>,
    {
        if let Some(state) = self.list_states.get(name) {
            error_stack::bail!(Error::ModeMismatch {
                name: name.to_owned(),
                registered: state.meta.mode,
                requested: DistributionMode::Broadcast,
            });
        }

        let meta = BroadcastStateMeta {
            key_codec: key_codec.descriptor(),
            value_codec: value_codec.descriptor(),
        };
        let state = match self.broadcast_states.entry(name.to_owned()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                if state.meta.key_codec != meta.key_codec {
                    error_stack::bail!(Error::CodecMismatch {
                        name: name.to_owned(),
                        registered: state.meta.key_codec.clone(),
                        requested: meta.key_codec,
                    });
                }
                error_stack::ensure!(
                    state.meta.value_codec == meta.value_codec,
                    Error::CodecMismatch {
                        name: name.to_owned(),
                        registered: state.meta.value_codec.clone(),
                        requested: meta.value_codec,
                    }
                );
                state
            }
            Entry::Vacant(entry) => {
                tracing::debug!("Registering broadcast state '{name}'");
                self.modified = true;
                entry.insert(RegisteredBroadcastState {
                    meta,
                    entries: BTreeMap::new(),
                })
            }
        };

        Ok(BroadcastState::new(
            name,
            &mut state.entries,
            &mut self.modified,
            key_codec,
            value_codec,
        ))
    }

    /// Remove the state `name` entirely. Returns whether it existed.
    pub fn remove_state(&mut self, name: &str) -> bool {
        let removed = self.list_states.remove(name).is_some()
            || self.broadcast_states.remove(name).is_some();
        if removed {
            tracing::debug!("Removed operator state '{name}'");
            self.modified = true;
        }
        removed
    }

    /// Names of all registered states, in name order.
    pub fn state_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self
            .list_states
            .keys()
            .chain(self.broadcast_states.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn list_state_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.list_states.keys().map(String::as_str)
    }

    pub fn broadcast_state_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.broadcast_states.keys().map(String::as_str)
    }

    /// The distribution mode of the state `name`, if it is registered.
    pub fn distribution_mode(&self, name: &str) -> Option<DistributionMode> {
        if let Some(state) = self.list_states.get(name) {
            Some(state.meta.mode)
        } else if self.broadcast_states.contains_key(name) {
            Some(DistributionMode::Broadcast)
        } else {
            None
        }
    }

    /// Serialized elements of the list state `name`.
    pub fn raw_list_elements(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.list_states
            .get(name)
            .map(|state| state.elements.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.list_states.is_empty() && self.broadcast_states.is_empty()
    }

    /// Whether any state was registered, changed or removed.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Release the backend.
    ///
    /// Dropping the backend has the same effect.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::trace!(
            "Releasing operator state backend with {} list and {} broadcast states",
            self.list_states.len(),
            self.broadcast_states.len()
        );
        self.list_states.clear();
        self.broadcast_states.clear();
    }
}

impl Drop for OperatorStateBackend {
    fn drop(&mut self) {
        self.release();
    }
}
