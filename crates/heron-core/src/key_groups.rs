//! Assignment of keys to key groups, and key groups to subtasks.
//!
//! The key group of a key depends only on its serialized bytes and the
//! operator's max parallelism, which never changes over the lifetime of the
//! operator. Subtask `i` of an operator running with parallelism `p` owns the
//! key groups `[i * size, min((i + 1) * size, max_parallelism))` where
//! `size = ceil(max_parallelism / p)`.
//!
//! These rules must match the runtime restoring the checkpoint exactly.

use std::ops::Range;

/// A half-open range `[start, end)` of key groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct KeyGroupRange {
    start: u32,
    end: u32,
}

impl KeyGroupRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "invalid key group range [{start}, {end})");
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn empty() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, key_group: u32) -> bool {
        self.start <= key_group && key_group < self.end
    }

    /// Position of the key group within this range, if it is contained.
    pub fn index_of(&self, key_group: u32) -> Option<usize> {
        if self.contains(key_group) {
            Some((key_group - self.start) as usize)
        } else {
            None
        }
    }

    pub fn iter(&self) -> Range<u32> {
        self.start..self.end
    }
}

impl std::fmt::Display for KeyGroupRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Number of key groups owned by each subtask (the last may own fewer).
pub fn range_size(max_parallelism: u32, parallelism: usize) -> u32 {
    debug_assert!(parallelism > 0, "parallelism must be positive");
    let max = max_parallelism as u64;
    let parallelism = parallelism.max(1) as u64;
    ((max + parallelism - 1) / parallelism) as u32
}

/// Index of the subtask owning `key_group`.
pub fn operator_index_for_key_group(
    max_parallelism: u32,
    parallelism: usize,
    key_group: u32,
) -> usize {
    let size = range_size(max_parallelism, parallelism).max(1);
    (key_group / size) as usize
}

/// The key groups owned by the subtask at `operator_index`.
///
/// Trailing subtasks may own an empty range when `max_parallelism` does not
/// divide evenly.
pub fn key_group_range_for_operator(
    max_parallelism: u32,
    parallelism: usize,
    operator_index: usize,
) -> KeyGroupRange {
    let size = range_size(max_parallelism, parallelism) as u64;
    let max = max_parallelism as u64;
    let start = (operator_index as u64 * size).min(max);
    let end = ((operator_index as u64 + 1) * size).min(max);
    KeyGroupRange::new(start as u32, end as u32)
}

/// Assign serialized key bytes to a key group in `[0, max_parallelism)`.
pub fn assign_to_key_group(key: &[u8], max_parallelism: u32) -> u32 {
    debug_assert!(max_parallelism > 0, "max parallelism must be positive");
    murmur_hash(key_hash(key)) % max_parallelism.max(1)
}

/// 31-multiplier polynomial hash over the (signed) key bytes.
fn key_hash(key: &[u8]) -> i32 {
    key.iter()
        .fold(1i32, |hash, byte| hash.wrapping_mul(31).wrapping_add(*byte as i8 as i32))
}

/// Murmur3 mixing of a 32 bit hash code. Always non-negative.
fn murmur_hash(code: i32) -> u32 {
    let mut code = code as u32;
    code = code.wrapping_mul(0xcc9e_2d51);
    code = code.rotate_left(15);
    code = code.wrapping_mul(0x1b87_3593);

    code = code.rotate_left(13);
    code = code.wrapping_mul(5).wrapping_add(0xe654_6b64);

    code ^= 4;
    code ^= code >> 16;
    code = code.wrapping_mul(0x85eb_ca6b);
    code ^= code >> 13;
    code = code.wrapping_mul(0xc2b2_ae35);
    code ^= code >> 16;

    let code = code as i32;
    if code >= 0 {
        code as u32
    } else if code != i32::MIN {
        code.wrapping_neg() as u32
    } else {
        0
    }
}
