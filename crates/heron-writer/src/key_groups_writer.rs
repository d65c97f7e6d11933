//! Writing keyed state into key-groups blobs.
//!
//! ```text
//! blob    := magic "HRKG" | version u16 | header_len u32 | header | section*
//! header  := bincode(StateRegistry)
//! section := key_group u32 | payload_len u32 | payload    (one per key group of the range)
//! payload := record*                                     (lz4 block compressed if enabled)
//! record  := state_id u16 | key_len u32 | key | ns_len u32 | namespace | value_len u32 | value
//! ```
//!
//! All integers are big-endian. The state id is the index of the state name
//! in the name-ordered registry. A key group without entries has an empty
//! payload.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use error_stack::{IntoReport, ResultExt};
use heron_checkpoint::{CheckpointStorage, KeyGroupsStateHandle};
use heron_core::wire;
use heron_core::{KeyGroupRange, StateRegistry, StateRow};

use crate::Error;

pub(crate) const KEY_GROUPS_MAGIC: &[u8; 4] = b"HRKG";
pub(crate) const KEY_GROUPS_VERSION: u16 = 1;

/// Writes the keyed state of subtasks into key-groups blobs.
///
/// Each call to [KeyGroupsWriter::write] creates a new, uniquely named file
/// in the output directory. Every blob starts with the same header
/// describing the registered states.
#[derive(Debug)]
pub struct KeyGroupsWriter<'a> {
    storage: &'a dyn CheckpointStorage,
    dir: PathBuf,
    registry: &'a StateRegistry,
    state_ids: BTreeMap<&'a str, u16>,
    preamble: Vec<u8>,
}

impl<'a> KeyGroupsWriter<'a> {
    pub fn try_new(
        storage: &'a dyn CheckpointStorage,
        dir: &Path,
        registry: &'a StateRegistry,
    ) -> error_stack::Result<Self, Error> {
        let header = bincode::serialize(registry)
            .into_report()
            .change_context(Error::EncodeHeader)?;

        let mut preamble = Vec::with_capacity(header.len() + 10);
        preamble.extend_from_slice(KEY_GROUPS_MAGIC);
        wire::put_u16(&mut preamble, KEY_GROUPS_VERSION);
        wire::put_bytes(&mut preamble, &header).change_context(Error::EncodeHeader)?;

        let state_ids = registry
            .names()
            .enumerate()
            .map(|(id, name)| (name, id as u16))
            .collect();

        Ok(Self {
            storage,
            dir: dir.to_owned(),
            registry,
            state_ids,
            preamble,
        })
    }

    pub fn registry(&self) -> &StateRegistry {
        self.registry
    }

    /// Write the rows of `subtask`, which owns `key_group_range`.
    ///
    /// Rows must be ordered by [heron_core::compare_for_snapshot]. The blob
    /// is persisted before the handle is returned.
    pub fn write(
        &self,
        subtask: usize,
        key_group_range: KeyGroupRange,
        rows: Vec<StateRow>,
    ) -> error_stack::Result<KeyGroupsStateHandle, Error> {
        let write_error = || Error::WriteKeyedState(subtask);
        let compression = self.registry.compression();

        let path = self.dir.join(uuid::Uuid::new_v4().to_string());
        let mut output = self.storage.create(&path).change_context_lazy(write_error)?;
        output
            .write_all(&self.preamble)
            .into_report()
            .change_context_lazy(write_error)?;

        let mut rows = rows.into_iter().peekable();
        let mut offsets = Vec::with_capacity(key_group_range.len());
        let mut num_entries = 0u64;
        let mut payload = Vec::new();
        let mut section = Vec::new();

        for key_group in key_group_range.iter() {
            payload.clear();
            let mut entries = 0u64;
            while let Some(row) = rows.next_if(|row| row.key_group == key_group) {
                self.encode_record(&row, &mut payload)
                    .change_context_lazy(write_error)?;
                entries += 1;
            }

            let payload = if compression && !payload.is_empty() {
                lz4::block::compress(&payload, None, true)
                    .into_report()
                    .change_context_lazy(write_error)?
            } else {
                std::mem::take(&mut payload)
            };

            section.clear();
            wire::put_u32(&mut section, key_group);
            wire::put_bytes(&mut section, &payload).change_context_lazy(write_error)?;

            offsets.push(output.position());
            output
                .write_all(&section)
                .into_report()
                .change_context_lazy(write_error)?;

            if entries > 0 {
                tracing::trace!("Wrote {entries} entries for key group {key_group}");
            }
            num_entries += entries;
        }

        if let Some(row) = rows.next() {
            return Err(error_stack::report!(Error::KeyGroupOutOfRange {
                key_group: row.key_group,
                range: key_group_range,
            })
            .change_context(write_error()));
        }

        let state_size = output.finish().change_context_lazy(write_error)?;
        tracing::debug!(
            "Wrote {num_entries} entries for key groups {key_group_range} of subtask {subtask} to {}",
            path.display()
        );

        Ok(KeyGroupsStateHandle {
            path,
            key_group_range,
            offsets,
            state_size,
            num_entries,
        })
    }

    fn encode_record(&self, row: &StateRow, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        let state_id = *self
            .state_ids
            .get(row.state_name.as_str())
            .ok_or_else(|| error_stack::report!(Error::UnknownState(row.state_name.clone())))?;

        let framing = || Error::ConvertState(row.state_name.clone());
        wire::put_u16(out, state_id);
        wire::put_bytes(out, &row.key).change_context_lazy(framing)?;
        wire::put_bytes(out, &row.namespace).change_context_lazy(framing)?;
        wire::put_bytes(out, &row.value).change_context_lazy(framing)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use heron_checkpoint::ObjectStoreStorage;
    use heron_core::{compare_for_snapshot, CodecDescriptor, StateMetaInfo};

    use super::*;
    use crate::KeyGroupsReader;

    fn registry(compression: bool) -> StateRegistry {
        StateRegistry::new(Some(CodecDescriptor::I32), compression)
            .with_state(StateMetaInfo::value("b", CodecDescriptor::I64))
            .unwrap()
            .with_state(StateMetaInfo::value("a", CodecDescriptor::Utf8))
            .unwrap()
    }

    fn row(name: &str, key_group: u32, key: u8, value: &[u8]) -> StateRow {
        StateRow::new(name, key_group, vec![key], vec![], value.to_vec())
    }

    #[test]
    fn test_offsets_and_empty_key_groups() {
        heron_testing::init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(false);
        let storage = ObjectStoreStorage::local().unwrap();
        let writer = KeyGroupsWriter::try_new(&storage, dir.path(), &registry).unwrap();

        let mut rows = vec![
            row("b", 5, 1, b"x"),
            row("a", 5, 2, b"yy"),
            row("a", 2, 3, b"z"),
        ];
        rows.sort_by(compare_for_snapshot);
        let handle = writer.write(0, KeyGroupRange::new(2, 6), rows).unwrap();

        assert_eq!(handle.num_entries, 3);
        assert_eq!(handle.offsets.len(), 4);
        assert!(handle.offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            handle.state_size,
            std::fs::metadata(&handle.path).unwrap().len()
        );

        // Each section starts with its key group.
        let bytes = std::fs::read(&handle.path).unwrap();
        for (index, offset) in handle.offsets.iter().enumerate() {
            let offset = *offset as usize;
            let key_group = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
            assert_eq!(key_group, 2 + index as u32);
        }

        // Key groups 3 and 4 have no entries: the section is only the framing.
        assert_eq!(handle.offsets[2] - handle.offsets[1], 8);
        assert_eq!(handle.offsets[3] - handle.offsets[2], 8);

        let reader = KeyGroupsReader::open(&storage, &handle).unwrap();
        assert!(reader.read_key_group(3).unwrap().is_empty());
        let key_group_5 = reader.read_key_group(5).unwrap();
        assert_eq!(
            key_group_5
                .iter()
                .map(|row| row.state_name.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_compressed_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(true);
        let storage = ObjectStoreStorage::local().unwrap();
        let writer = KeyGroupsWriter::try_new(&storage, dir.path(), &registry).unwrap();

        let value = vec![7u8; 1024];
        let rows: Vec<_> = (0..16).map(|key| row("b", 1, key, &value)).collect();
        let handle = writer.write(1, KeyGroupRange::new(0, 2), rows.clone()).unwrap();
        assert!(handle.state_size < 16 * 1024);

        let reader = KeyGroupsReader::open(&storage, &handle).unwrap();
        assert!(reader.registry().compression());
        assert_eq!(reader.rows().unwrap(), rows);
    }

    #[test]
    fn test_unknown_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(false);
        let storage = ObjectStoreStorage::local().unwrap();
        let writer = KeyGroupsWriter::try_new(&storage, dir.path(), &registry).unwrap();

        let err = writer
            .write(0, KeyGroupRange::new(0, 4), vec![row("c", 1, 0, b"")])
            .unwrap_err();
        assert!(matches!(err.current_context(), Error::WriteKeyedState(0)));
        assert!(err
            .frames()
            .filter_map(|frame| frame.downcast_ref::<Error>())
            .any(|error| matches!(error, Error::UnknownState(name) if name == "c")));
    }

    #[test]
    fn test_key_group_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(false);
        let storage = ObjectStoreStorage::local().unwrap();
        let writer = KeyGroupsWriter::try_new(&storage, dir.path(), &registry).unwrap();

        let err = writer
            .write(1, KeyGroupRange::new(4, 8), vec![row("a", 9, 0, b"")])
            .unwrap_err();
        assert!(err
            .frames()
            .filter_map(|frame| frame.downcast_ref::<Error>())
            .any(|error| matches!(error, Error::KeyGroupOutOfRange { key_group: 9, .. })));
    }
}
