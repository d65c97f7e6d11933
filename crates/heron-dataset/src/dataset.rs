use std::collections::BTreeMap;

use crate::GroupedDataset;

/// An in-memory collection of elements, split into partitions.
///
/// Partitions are kept in the order they were added, so iterating a dataset
/// is deterministic. Operations consume the dataset and produce a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset<T> {
    partitions: Vec<Vec<T>>,
}

impl<T> Default for Dataset<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Dataset<T> {
    pub fn empty() -> Self {
        Self {
            partitions: Vec::new(),
        }
    }

    /// Create a dataset with a single partition.
    pub fn from_vec(elements: Vec<T>) -> Self {
        Self {
            partitions: vec![elements],
        }
    }

    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Self {
        Self { partitions }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.partitions.iter().flatten()
    }

    /// Combine the elements of both datasets.
    ///
    /// The partitions of `other` follow the partitions of `self`.
    pub fn union(mut self, other: Dataset<T>) -> Self {
        self.partitions.extend(other.partitions);
        self
    }

    pub fn map<U>(self, f: impl Fn(T) -> U) -> Dataset<U> {
        Dataset {
            partitions: self
                .partitions
                .into_iter()
                .map(|partition| partition.into_iter().map(&f).collect())
                .collect(),
        }
    }

    /// Map each element with a fallible function, stopping at the first error.
    pub fn try_map<U, E>(
        self,
        f: impl Fn(T) -> error_stack::Result<U, E>,
    ) -> error_stack::Result<Dataset<U>, E> {
        let partitions = self
            .partitions
            .into_iter()
            .map(|partition| {
                partition
                    .into_iter()
                    .map(&f)
                    .collect::<error_stack::Result<Vec<U>, E>>()
            })
            .collect::<error_stack::Result<Vec<_>, E>>()?;
        Ok(Dataset { partitions })
    }

    pub fn filter(self, predicate: impl Fn(&T) -> bool) -> Self {
        Self {
            partitions: self
                .partitions
                .into_iter()
                .map(|partition| partition.into_iter().filter(|e| predicate(e)).collect())
                .collect(),
        }
    }

    /// Group elements by `key`.
    ///
    /// Within each group, elements keep the order they have in the dataset.
    pub fn group_by<K: Ord>(self, key: impl Fn(&T) -> K) -> GroupedDataset<K, T> {
        let mut groups: BTreeMap<K, Vec<T>> = BTreeMap::new();
        for element in self.partitions.into_iter().flatten() {
            groups.entry(key(&element)).or_default().push(element);
        }
        GroupedDataset::new(groups)
    }

    pub fn into_vec(self) -> Vec<T> {
        self.partitions.into_iter().flatten().collect()
    }
}

impl<T> FromIterator<T> for Dataset<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}
