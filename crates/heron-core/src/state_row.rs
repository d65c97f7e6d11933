use std::cmp::Ordering;

use crate::key_groups;

/// One entry of keyed state.
///
/// Rows are produced from typed key/value pairs or read from an existing
/// checkpoint, and are consumed exactly once when the snapshot is written.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StateRow {
    /// Name of the keyed state this entry belongs to.
    pub state_name: String,
    /// Key group of the entry, in `[0, max_parallelism)`.
    pub key_group: u32,
    pub key: Vec<u8>,
    /// Serialized namespace. Empty for states without a namespace.
    pub namespace: Vec<u8>,
    pub value: Vec<u8>,
}

impl StateRow {
    pub fn new(
        state_name: impl Into<String>,
        key_group: u32,
        key: Vec<u8>,
        namespace: Vec<u8>,
        value: Vec<u8>,
    ) -> Self {
        Self {
            state_name: state_name.into(),
            key_group,
            key,
            namespace,
            value,
        }
    }

    /// The order rows are written in: key group, then state name bytes.
    pub fn order_key(&self) -> (u32, &[u8]) {
        (self.key_group, self.state_name.as_bytes())
    }
}

/// Compare rows by [`StateRow::order_key`].
///
/// Rows with equal order keys compare equal, so their relative order is
/// whatever order the (stable) sort encountered them in.
pub fn compare_for_snapshot(a: &StateRow, b: &StateRow) -> Ordering {
    a.order_key().cmp(&b.order_key())
}

/// Groups rows by the index of the subtask owning their key group.
#[derive(Clone, Copy, Debug)]
pub struct OperatorIndexKey {
    max_parallelism: u32,
    parallelism: usize,
}

impl OperatorIndexKey {
    pub fn new(max_parallelism: u32, parallelism: usize) -> Self {
        Self {
            max_parallelism,
            parallelism,
        }
    }

    pub fn key(&self, row: &StateRow) -> usize {
        key_groups::operator_index_for_key_group(
            self.max_parallelism,
            self.parallelism,
            row.key_group,
        )
    }
}
