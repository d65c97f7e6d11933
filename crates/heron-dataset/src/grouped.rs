use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::{Error, WorkerPool};

/// A dataset whose elements have been grouped by key.
///
/// Groups are ordered by key. Elements within a group keep the order they
/// were grouped in until [GroupedDataset::sort_group] is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupedDataset<K, T> {
    groups: BTreeMap<K, Vec<T>>,
}

impl<K: Ord, T> GroupedDataset<K, T> {
    pub(crate) fn new(groups: BTreeMap<K, Vec<T>>) -> Self {
        Self { groups }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.groups.keys()
    }

    pub fn group(&self, key: &K) -> Option<&[T]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Sort the elements of each group.
    ///
    /// The sort is stable: elements comparing equal keep their relative order.
    pub fn sort_group(mut self, compare: impl Fn(&T, &T) -> Ordering) -> Self {
        for elements in self.groups.values_mut() {
            elements.sort_by(&compare);
        }
        self
    }

    /// Reduce each group to a single result, running groups in parallel.
    ///
    /// Each group is reduced by exactly one invocation of `f`. Results are
    /// returned in key order.
    pub fn reduce_group<R, E, F>(
        self,
        pool: &WorkerPool,
        f: F,
    ) -> error_stack::Result<Vec<(K, R)>, Error>
    where
        K: Send + Sync,
        T: Send,
        R: Send,
        E: error_stack::Context,
        F: Fn(&K, Vec<T>) -> error_stack::Result<R, E> + Sync,
    {
        let tasks: Vec<(K, Vec<T>)> = self.groups.into_iter().collect();
        pool.run_tasks(tasks, |_, (key, elements)| {
            let result = f(&key, elements)?;
            Ok((key, result))
        })
    }

    pub fn into_groups(self) -> BTreeMap<K, Vec<T>> {
        self.groups
    }
}
