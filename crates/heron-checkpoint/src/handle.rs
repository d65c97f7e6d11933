use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use heron_core::KeyGroupRange;

/// Reference to a persisted blob of keyed state for a range of key groups.
///
/// `offsets[i]` is the byte offset of the section for key group
/// `key_group_range.start() + i`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyGroupsStateHandle {
    pub path: PathBuf,
    pub key_group_range: KeyGroupRange,
    pub offsets: Vec<u64>,
    /// Size of the blob in bytes.
    pub state_size: u64,
    /// Number of entries written across all key groups.
    pub num_entries: u64,
}

impl KeyGroupsStateHandle {
    /// Offset of the section for `key_group`, if it is in the range.
    pub fn offset_for(&self, key_group: u32) -> Option<u64> {
        self.key_group_range
            .index_of(key_group)
            .and_then(|index| self.offsets.get(index).copied())
    }
}

/// How a list of operator state is redistributed on restore.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, derive_more::Display,
)]
pub enum DistributionMode {
    /// Elements are split among the subtasks.
    #[display(fmt = "split-distribute")]
    SplitDistribute,
    /// Every subtask receives all elements.
    #[display(fmt = "union")]
    Union,
    /// Key/value entries identical on every subtask.
    #[display(fmt = "broadcast")]
    Broadcast,
}

/// Offsets of the elements of one named operator state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StateOffsets {
    pub mode: DistributionMode,
    pub offsets: Vec<u64>,
}

/// Reference to a persisted blob of (non-keyed) operator state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OperatorStateHandle {
    pub path: PathBuf,
    pub state_size: u64,
    pub states: BTreeMap<String, StateOffsets>,
}

/// Reference to opaque state the rewriter never interprets.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawStateHandle {
    pub path: PathBuf,
    pub state_size: u64,
}

/// Any reference to persisted state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateHandle {
    KeyGroups(KeyGroupsStateHandle),
    Operator(OperatorStateHandle),
    Raw(RawStateHandle),
}

impl StateHandle {
    pub fn path(&self) -> &Path {
        match self {
            StateHandle::KeyGroups(handle) => &handle.path,
            StateHandle::Operator(handle) => &handle.path,
            StateHandle::Raw(handle) => &handle.path,
        }
    }

    pub fn state_size(&self) -> u64 {
        match self {
            StateHandle::KeyGroups(handle) => handle.state_size,
            StateHandle::Operator(handle) => handle.state_size,
            StateHandle::Raw(handle) => handle.state_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_for() {
        let handle = KeyGroupsStateHandle {
            path: PathBuf::from("/tmp/kg"),
            key_group_range: KeyGroupRange::new(4, 7),
            offsets: vec![10, 20, 30],
            state_size: 40,
            num_entries: 2,
        };
        assert_eq!(handle.offset_for(4), Some(10));
        assert_eq!(handle.offset_for(6), Some(30));
        assert_eq!(handle.offset_for(7), None);
        assert_eq!(handle.offset_for(0), None);
    }

    #[test]
    fn test_tagged_handle_json() {
        let handle = StateHandle::Raw(RawStateHandle {
            path: PathBuf::from("/tmp/raw"),
            state_size: 3,
        });
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["type"], "raw");
        assert_eq!(handle.path(), Path::new("/tmp/raw"));
        assert_eq!(handle.state_size(), 3);

        let parsed: StateHandle = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, handle);
    }
}
