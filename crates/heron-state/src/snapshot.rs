//! On-disk format of operator state snapshots.
//!
//! ```text
//! snapshot  := magic "HROS" | version u16 | header_len u32 | header | list* | broadcast*
//! header    := bincode(SnapshotHeader)
//! list      := element*                   (one offset per element in the handle)
//! element   := len u32 | bytes
//! broadcast := count u32 | (key_len u32 | key | value_len u32 | value)*
//! ```

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use error_stack::{IntoReport, ResultExt};
use heron_checkpoint::{CheckpointStorage, DistributionMode, OperatorStateHandle, StateOffsets};
use heron_core::wire::{self, ByteReader};

use crate::operator_state_backend::{
    BroadcastStateMeta, ListStateMeta, RegisteredBroadcastState, RegisteredListState,
};
use crate::{Error, OperatorStateBackend};

const MAGIC: &[u8; 4] = b"HROS";
const VERSION: u16 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SnapshotHeader {
    checkpoint_id: u64,
    timestamp_ms: i64,
    list_states: BTreeMap<String, ListStateMeta>,
    broadcast_states: BTreeMap<String, BroadcastStateMeta>,
}

impl OperatorStateBackend {
    /// Restore a backend from the operator state handles of one subtask.
    ///
    /// Elements of list states present in more than one handle are
    /// concatenated in handle order. Broadcast states are identical in every
    /// handle, so the first occurrence is kept.
    pub fn restore(
        storage: &dyn CheckpointStorage,
        handles: &[OperatorStateHandle],
    ) -> error_stack::Result<Self, Error> {
        let mut backend = Self::new();
        for handle in handles {
            backend.restore_handle(storage, handle)?;
        }
        tracing::debug!(
            "Restored {} operator states from {} handles",
            backend.state_names().len(),
            handles.len()
        );
        Ok(backend)
    }

    fn restore_handle(
        &mut self,
        storage: &dyn CheckpointStorage,
        handle: &OperatorStateHandle,
    ) -> error_stack::Result<(), Error> {
        let path = &handle.path;
        let corrupt = || Error::CorruptSnapshot(path.clone());

        let bytes = storage
            .read(path)
            .change_context_lazy(|| Error::Restore(path.clone()))?;
        let mut reader = ByteReader::new(&bytes);
        let magic = reader.take(MAGIC.len()).change_context_lazy(corrupt)?;
        error_stack::ensure!(magic == MAGIC, corrupt());
        let version = reader.u16().change_context_lazy(corrupt)?;
        if version != VERSION {
            return Err(error_stack::report!(corrupt())
                .attach_printable(format!("unsupported version {version}")));
        }
        let header: SnapshotHeader = bincode::deserialize(reader.bytes().change_context_lazy(corrupt)?)
            .into_report()
            .change_context_lazy(corrupt)?;

        for (name, state_offsets) in &handle.states {
            let missing = || {
                error_stack::report!(corrupt())
                    .attach_printable(format!("missing metadata for state '{name}'"))
            };

            if state_offsets.mode == DistributionMode::Broadcast {
                let meta = header.broadcast_states.get(name).ok_or_else(missing)?;
                if let Some(existing) = self.broadcast_states.get(name) {
                    check_broadcast_meta(name, &existing.meta, meta)?;
                    continue;
                }
                let offset = *state_offsets.offsets.first().ok_or_else(missing)?;
                let entries = read_broadcast(&bytes, offset).change_context_lazy(corrupt)?;
                self.broadcast_states.insert(
                    name.clone(),
                    RegisteredBroadcastState {
                        meta: meta.clone(),
                        entries,
                    },
                );
            } else {
                let meta = header.list_states.get(name).ok_or_else(missing)?;
                error_stack::ensure!(meta.mode == state_offsets.mode, corrupt());
                let elements = state_offsets
                    .offsets
                    .iter()
                    .map(|offset| read_element(&bytes, *offset))
                    .collect::<error_stack::Result<Vec<_>, _>>()
                    .change_context_lazy(corrupt)?;

                match self.list_states.entry(name.clone()) {
                    Entry::Occupied(mut entry) => {
                        check_list_meta(name, &entry.get().meta, meta)?;
                        entry.get_mut().elements.extend(elements);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(RegisteredListState {
                            meta: meta.clone(),
                            elements,
                        });
                    }
                }
            }
        }

        tracing::trace!(
            "Restored {} states of checkpoint {} from {}",
            handle.states.len(),
            header.checkpoint_id,
            path.display()
        );
        Ok(())
    }

    /// Write all states to a new, uniquely named file in `dir`.
    ///
    /// Returns `None` if the backend has no states, since there is nothing
    /// to restore from.
    pub fn snapshot(
        &self,
        storage: &dyn CheckpointStorage,
        dir: &Path,
        checkpoint_id: u64,
        timestamp_ms: i64,
    ) -> error_stack::Result<Option<OperatorStateHandle>, Error> {
        if self.is_empty() {
            tracing::debug!("Skipping snapshot of empty operator state backend");
            return Ok(None);
        }

        let header = SnapshotHeader {
            checkpoint_id,
            timestamp_ms,
            list_states: self
                .list_states
                .iter()
                .map(|(name, state)| (name.clone(), state.meta.clone()))
                .collect(),
            broadcast_states: self
                .broadcast_states
                .iter()
                .map(|(name, state)| (name.clone(), state.meta.clone()))
                .collect(),
        };
        let header = bincode::serialize(&header)
            .into_report()
            .change_context(Error::Snapshot)?;

        let mut buffer = Vec::new();
        buffer.extend_from_slice(MAGIC);
        wire::put_u16(&mut buffer, VERSION);
        wire::put_bytes(&mut buffer, &header).change_context(Error::Snapshot)?;

        let mut states = BTreeMap::new();
        for (name, state) in &self.list_states {
            let mut offsets = Vec::with_capacity(state.elements.len());
            for element in &state.elements {
                offsets.push(buffer.len() as u64);
                wire::put_bytes(&mut buffer, element).change_context(Error::Snapshot)?;
            }
            states.insert(
                name.clone(),
                StateOffsets {
                    mode: state.meta.mode,
                    offsets,
                },
            );
        }
        for (name, state) in &self.broadcast_states {
            let offset = buffer.len() as u64;
            let count = u32::try_from(state.entries.len())
                .into_report()
                .change_context(Error::Snapshot)?;
            wire::put_u32(&mut buffer, count);
            for (key, value) in &state.entries {
                wire::put_bytes(&mut buffer, key).change_context(Error::Snapshot)?;
                wire::put_bytes(&mut buffer, value).change_context(Error::Snapshot)?;
            }
            states.insert(
                name.clone(),
                StateOffsets {
                    mode: DistributionMode::Broadcast,
                    offsets: vec![offset],
                },
            );
        }

        let path = dir.join(uuid::Uuid::new_v4().to_string());
        let mut output = storage.create(&path).change_context(Error::Snapshot)?;
        output
            .write_all(&buffer)
            .into_report()
            .change_context(Error::Snapshot)?;
        let state_size = output.finish().change_context(Error::Snapshot)?;

        tracing::info!(
            "Snapshotted {} operator states ({state_size} bytes) to {}",
            states.len(),
            path.display()
        );
        Ok(Some(OperatorStateHandle {
            path,
            state_size,
            states,
        }))
    }
}

fn read_element(bytes: &[u8], offset: u64) -> error_stack::Result<Vec<u8>, heron_core::Error> {
    let mut reader = ByteReader::at(bytes, offset as usize)?;
    Ok(reader.bytes()?.to_vec())
}

fn read_broadcast(
    bytes: &[u8],
    offset: u64,
) -> error_stack::Result<BTreeMap<Vec<u8>, Vec<u8>>, heron_core::Error> {
    let mut reader = ByteReader::at(bytes, offset as usize)?;
    let count = reader.u32()?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = reader.bytes()?.to_vec();
        let value = reader.bytes()?.to_vec();
        entries.insert(key, value);
    }
    Ok(entries)
}

fn check_list_meta(
    name: &str,
    registered: &ListStateMeta,
    restored: &ListStateMeta,
) -> error_stack::Result<(), Error> {
    error_stack::ensure!(
        registered.mode == restored.mode,
        Error::ModeMismatch {
            name: name.to_owned(),
            registered: registered.mode,
            requested: restored.mode,
        }
    );
    error_stack::ensure!(
        registered.element_codec == restored.element_codec,
        Error::CodecMismatch {
            name: name.to_owned(),
            registered: registered.element_codec.clone(),
            requested: restored.element_codec.clone(),
        }
    );
    Ok(())
}

fn check_broadcast_meta(
    name: &str,
    registered: &BroadcastStateMeta,
    restored: &BroadcastStateMeta,
) -> error_stack::Result<(), Error> {
    error_stack::ensure!(
        registered.key_codec == restored.key_codec,
        Error::CodecMismatch {
            name: name.to_owned(),
            registered: registered.key_codec.clone(),
            requested: restored.key_codec.clone(),
        }
    );
    error_stack::ensure!(
        registered.value_codec == restored.value_codec,
        Error::CodecMismatch {
            name: name.to_owned(),
            registered: registered.value_codec.clone(),
            requested: restored.value_codec.clone(),
        }
    );
    Ok(())
}
