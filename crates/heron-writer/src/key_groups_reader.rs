use std::path::Path;

use error_stack::{IntoReport, ResultExt};
use heron_checkpoint::{CheckpointStorage, KeyGroupsStateHandle, OperatorCheckpoint};
use heron_core::wire::ByteReader;
use heron_core::{KeyGroupRange, StateRegistry, StateRow};
use heron_dataset::Dataset;

use crate::key_groups_writer::{KEY_GROUPS_MAGIC, KEY_GROUPS_VERSION};
use crate::Error;

/// Reads a key-groups blob written by [crate::KeyGroupsWriter].
#[derive(Debug)]
pub struct KeyGroupsReader {
    handle: KeyGroupsStateHandle,
    bytes: Vec<u8>,
    registry: StateRegistry,
}

impl KeyGroupsReader {
    /// Read the blob referenced by `handle` and decode its header.
    pub fn open(
        storage: &dyn CheckpointStorage,
        handle: &KeyGroupsStateHandle,
    ) -> error_stack::Result<Self, Error> {
        let bytes = storage
            .read(&handle.path)
            .change_context_lazy(|| Error::ReadKeyedState(handle.path.clone()))?;
        let registry = read_header(&bytes, &handle.path)?;
        Ok(Self {
            handle: handle.clone(),
            bytes,
            registry,
        })
    }

    /// The states registered when the blob was written.
    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn key_group_range(&self) -> KeyGroupRange {
        self.handle.key_group_range
    }

    /// Read the rows of one key group, in the order they were written.
    pub fn read_key_group(&self, key_group: u32) -> error_stack::Result<Vec<StateRow>, Error> {
        let offset = self.handle.offset_for(key_group).ok_or_else(|| {
            error_stack::report!(Error::KeyGroupOutOfRange {
                key_group,
                range: self.handle.key_group_range,
            })
        })?;

        let path = &self.handle.path;
        let corrupt = || Error::CorruptKeyedState(path.clone());

        let mut reader = ByteReader::at(&self.bytes, offset as usize).change_context_lazy(corrupt)?;
        let stored_key_group = reader.u32().change_context_lazy(corrupt)?;
        if stored_key_group != key_group {
            return Err(error_stack::report!(corrupt()).attach_printable(format!(
                "expected key group {key_group} at offset {offset} but found {stored_key_group}"
            )));
        }
        let payload = reader.bytes().change_context_lazy(corrupt)?;
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let decompressed;
        let payload = if self.registry.compression() {
            decompressed = lz4::block::decompress(payload, None)
                .into_report()
                .change_context_lazy(corrupt)?;
            decompressed.as_slice()
        } else {
            payload
        };

        let mut records = ByteReader::new(payload);
        let mut rows = Vec::new();
        while !records.is_empty() {
            let state_id = records.u16().change_context_lazy(corrupt)?;
            let state_name = self.registry.state_name(state_id).ok_or_else(|| {
                error_stack::report!(corrupt())
                    .attach_printable(format!("unknown state id {state_id}"))
            })?;
            let key = records.bytes().change_context_lazy(corrupt)?;
            let namespace = records.bytes().change_context_lazy(corrupt)?;
            let value = records.bytes().change_context_lazy(corrupt)?;
            rows.push(StateRow::new(
                state_name,
                key_group,
                key.to_vec(),
                namespace.to_vec(),
                value.to_vec(),
            ));
        }
        Ok(rows)
    }

    /// Read the rows of all key groups, ordered by key group.
    pub fn rows(&self) -> error_stack::Result<Vec<StateRow>, Error> {
        let mut rows = Vec::new();
        for key_group in self.handle.key_group_range.iter() {
            rows.extend(self.read_key_group(key_group)?);
        }
        Ok(rows)
    }
}

fn read_header(bytes: &[u8], path: &Path) -> error_stack::Result<StateRegistry, Error> {
    let corrupt = || Error::CorruptKeyedState(path.to_owned());

    let mut reader = ByteReader::new(bytes);
    let magic = reader.take(KEY_GROUPS_MAGIC.len()).change_context_lazy(corrupt)?;
    error_stack::ensure!(magic == KEY_GROUPS_MAGIC, corrupt());
    let version = reader.u16().change_context_lazy(corrupt)?;
    if version != KEY_GROUPS_VERSION {
        return Err(error_stack::report!(corrupt())
            .attach_printable(format!("unsupported version {version}")));
    }
    let header = reader.bytes().change_context_lazy(corrupt)?;
    bincode::deserialize(header)
        .into_report()
        .change_context_lazy(corrupt)
}

/// The states registered for the keyed state of `operator`.
///
/// Returns an empty registry if the operator has no keyed state.
pub fn read_state_registry(
    storage: &dyn CheckpointStorage,
    operator: &OperatorCheckpoint,
) -> error_stack::Result<StateRegistry, Error> {
    match operator.keyed_state_handles().next() {
        Some(handle) => {
            let bytes = storage
                .read(&handle.path)
                .change_context_lazy(|| Error::ReadKeyedState(handle.path.clone()))?;
            read_header(&bytes, &handle.path)
        }
        None => Ok(StateRegistry::default()),
    }
}

/// Read the keyed state rows of every subtask of `operator`.
///
/// The dataset has one partition per subtask with keyed state.
pub fn read_partitioned_rows(
    storage: &dyn CheckpointStorage,
    operator: &OperatorCheckpoint,
) -> error_stack::Result<Dataset<StateRow>, Error> {
    let partitions = operator
        .keyed_state_handles()
        .map(|handle| KeyGroupsReader::open(storage, handle)?.rows())
        .collect::<error_stack::Result<Vec<_>, _>>()?;
    tracing::debug!(
        "Read keyed state of {} subtasks of operator {}",
        partitions.len(),
        operator.operator_id()
    );
    Ok(Dataset::from_partitions(partitions))
}
