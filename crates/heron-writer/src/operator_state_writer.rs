use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use heron_checkpoint::{CheckpointStorage, OperatorCheckpoint, OperatorId, Savepoint};
use heron_core::{
    compare_for_snapshot, key_groups, DefaultCodec, KeyGroupRange, OperatorIndexKey,
    StateMetaInfo, StateRegistry, StateRow, TypeCodec,
};
use heron_dataset::{Dataset, WorkerPool};
use heron_state::OperatorStateBackend;
use itertools::Itertools;

use crate::transform::OperatorStateTransformer;
use crate::{
    merge, read_state_registry, Error, KeyGroupsWriter, OperatorStateTransform, ValueStateToRow,
    WriterOptions,
};

const WORKER_POOL_NAME: &str = "heron-rewrite";

/// Rewrites the state of one operator of a savepoint.
///
/// Keyed state is replaced as a whole: the rows added to the writer become
/// the complete keyed state of the rewritten operator. To keep some of the
/// existing state, add the rows returned by [crate::read_partitioned_rows]
/// (optionally filtered) along with the new ones.
///
/// Nothing happens until [OperatorStateWriter::rewrite] is called.
pub struct OperatorStateWriter {
    storage: Arc<dyn CheckpointStorage>,
    base: OperatorCheckpoint,
    output_base: PathBuf,
    options: WriterOptions,
    registry: StateRegistry,
    rows: Option<Dataset<StateRow>>,
    transform: Option<Box<OperatorStateTransform>>,
}

impl std::fmt::Debug for OperatorStateWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorStateWriter")
            .field("operator_id", self.base.operator_id())
            .field("output_base", &self.output_base)
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("rows", &self.rows.as_ref().map(Dataset::len))
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl OperatorStateWriter {
    /// Create a writer for the operator checkpointed in `base`.
    ///
    /// The rewritten state is written below `output_base`.
    pub fn try_new(
        storage: Arc<dyn CheckpointStorage>,
        base: OperatorCheckpoint,
        output_base: impl Into<PathBuf>,
        options: WriterOptions,
    ) -> error_stack::Result<Self, Error> {
        let mut registry = read_state_registry(storage.as_ref(), &base)?;
        if let Some(compression) = options.compression {
            registry = registry.with_compression(compression);
        }

        Ok(Self {
            storage,
            base,
            output_base: output_base.into(),
            options,
            registry,
            rows: None,
            transform: None,
        })
    }

    /// Create a writer for the operator `operator_id` of `savepoint`.
    ///
    /// Unless set in the options, the rewritten state uses the checkpoint id
    /// of the savepoint.
    pub fn for_savepoint(
        storage: Arc<dyn CheckpointStorage>,
        savepoint: &Savepoint,
        operator_id: &OperatorId,
        output_base: impl Into<PathBuf>,
        mut options: WriterOptions,
    ) -> error_stack::Result<Self, Error> {
        let base = savepoint
            .operator(operator_id)
            .cloned()
            .ok_or_else(|| error_stack::report!(Error::UnknownOperator(operator_id.clone())))?;
        options.checkpoint_id.get_or_insert(savepoint.checkpoint_id);
        Self::try_new(storage, base, output_base, options)
    }

    pub fn operator_id(&self) -> &OperatorId {
        self.base.operator_id()
    }

    /// The keyed state metadata the rewritten blobs are written with.
    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Add keyed state rows to the rewritten operator.
    pub fn add_partitioned_rows(&mut self, rows: Dataset<StateRow>) {
        self.rows = Some(match self.rows.take() {
            Some(existing) => existing.union(rows),
            None => rows,
        });
    }

    /// Add entries of the registered value state `name`.
    ///
    /// Keys and values are encoded with the default codecs of `K` and `V`,
    /// which must match the codecs the state is registered with.
    pub fn add_or_replace_value_state<K: DefaultCodec, V: DefaultCodec>(
        &mut self,
        name: &str,
        data: Dataset<(K, V)>,
    ) -> error_stack::Result<(), Error> {
        let state = self
            .registry
            .get(name)
            .ok_or_else(|| error_stack::report!(Error::UnknownState(name.to_owned())))?;

        let value_codec = V::codec();
        let requested = value_codec.descriptor();
        error_stack::ensure!(
            state.value_codec == requested,
            Error::CodecMismatch {
                name: name.to_owned(),
                registered: state.value_codec.clone(),
                requested,
            }
        );

        let key_codec = K::codec();
        let requested = key_codec.descriptor();
        match self.registry.key_codec() {
            None => error_stack::bail!(Error::MissingKeyCodec),
            Some(registered) if registered != &requested => {
                error_stack::bail!(Error::KeyCodecMismatch {
                    registered: registered.clone(),
                    requested,
                })
            }
            Some(_) => {}
        }

        let rows = ValueStateToRow::new(name, key_codec, value_codec, self.max_parallelism())
            .convert(data)?;
        tracing::debug!("Adding {} entries of value state '{name}'", rows.len());
        self.add_partitioned_rows(rows);
        Ok(())
    }

    /// Register the new value state `name` and add its entries.
    ///
    /// Fixes the key codec of the operator to the default codec of `K` if it
    /// was not fixed yet. The registry is left unchanged if this fails.
    pub fn declare_new_value_state<K, V, C>(
        &mut self,
        name: &str,
        data: Dataset<(K, V)>,
        value_codec: C,
    ) -> error_stack::Result<(), Error>
    where
        K: DefaultCodec,
        C: TypeCodec<V>,
    {
        let key_codec = K::codec();
        let registry = self
            .registry
            .with_key_codec(key_codec.descriptor())
            .and_then(|registry| {
                registry.with_state(StateMetaInfo::value(name, value_codec.descriptor()))
            })
            .map_err(|report| registry_error(report, name))?;

        let rows = ValueStateToRow::new(name, key_codec, value_codec, self.max_parallelism())
            .convert(data)?;
        tracing::debug!("Declared value state '{name}' with {} entries", rows.len());
        self.registry = registry;
        self.add_partitioned_rows(rows);
        Ok(())
    }

    /// Transform the operator state of every subtask with `transform`.
    ///
    /// Subtasks whose state the transform leaves unmodified keep their
    /// original operator state.
    pub fn set_non_partitioned_state_transform<F>(&mut self, transform: F)
    where
        F: Fn(usize, &mut OperatorStateBackend) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.transform = Some(Box::new(transform));
    }

    fn max_parallelism(&self) -> u32 {
        self.base.max_parallelism()
    }

    /// Write the new state and return the rewritten operator checkpoint.
    ///
    /// Fails if the operator had keyed state and no rows were added, since
    /// that would silently drop all of its keyed state.
    pub fn rewrite(self) -> error_stack::Result<OperatorCheckpoint, Error> {
        let max_parallelism = self.max_parallelism();
        let parallelism = self.options.parallelism.unwrap_or(self.base.parallelism());
        merge::check_parallelism(&self.base, parallelism)?;

        let rows = match self.rows {
            Some(rows) => rows,
            None if self.base.has_keyed_state() => {
                error_stack::bail!(Error::MissingPartitionedRows)
            }
            None => Dataset::empty(),
        };
        validate_rows(&self.registry, &rows, max_parallelism)?;

        let checkpoint_id = self.options.checkpoint_id.unwrap_or_default();
        let dir = output_dir(&self.output_base, checkpoint_id, self.base.operator_id());

        let pool = match self.options.worker_threads {
            Some(threads) => WorkerPool::with_threads(WORKER_POOL_NAME, threads),
            None => WorkerPool::new(WORKER_POOL_NAME),
        };

        tracing::info!(
            "Rewriting operator {} (parallelism {} -> {parallelism}, max parallelism {max_parallelism}) to {}",
            self.base.operator_id(),
            self.base.parallelism(),
            dir.display()
        );

        let keyed_handles = if rows.is_empty() {
            BTreeMap::new()
        } else {
            tracing::info!(
                "Writing {} keyed state entries of states [{}]",
                rows.len(),
                self.registry.names().join(", ")
            );
            let writer = KeyGroupsWriter::try_new(self.storage.as_ref(), &dir, &self.registry)?;
            let operator_index = OperatorIndexKey::new(max_parallelism, parallelism);
            rows.group_by(|row| operator_index.key(row))
                .sort_group(compare_for_snapshot)
                .reduce_group(&pool, |subtask, rows| {
                    let key_group_range =
                        key_groups::key_group_range_for_operator(max_parallelism, parallelism, *subtask);
                    writer.write(*subtask, key_group_range, rows)
                })
                .change_context(Error::Execution)?
                .into_iter()
                .collect()
        };

        let operator_handles = match &self.transform {
            Some(transform) => {
                let timestamp_ms = self
                    .options
                    .timestamp_ms
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                tracing::info!("Transforming operator state of {parallelism} subtasks");
                OperatorStateTransformer {
                    storage: self.storage.as_ref(),
                    dir: &dir,
                    checkpoint_id,
                    timestamp_ms,
                    transform: transform.as_ref(),
                }
                .transform_all(&pool, &self.base, parallelism)
                .change_context(Error::Execution)?
            }
            None => BTreeMap::new(),
        };

        let rewritten =
            merge::merge_operator_state(&self.base, parallelism, keyed_handles, operator_handles)?;
        tracing::info!(
            "Rewrote operator {} ({} bytes of state)",
            rewritten.operator_id(),
            rewritten.state_size()
        );
        Ok(rewritten)
    }
}

/// The directory the state of `operator_id` is written to.
pub fn output_dir(output_base: &Path, checkpoint_id: u64, operator_id: &OperatorId) -> PathBuf {
    output_base
        .join(format!("checkpoint-{checkpoint_id}"))
        .join(format!("op-{operator_id}"))
}

/// Reject rows that could not be written before any file is created.
fn validate_rows(
    registry: &StateRegistry,
    rows: &Dataset<StateRow>,
    max_parallelism: u32,
) -> error_stack::Result<(), Error> {
    for row in rows.iter() {
        error_stack::ensure!(
            registry.contains(&row.state_name),
            Error::UnknownState(row.state_name.clone())
        );
        error_stack::ensure!(
            row.key_group < max_parallelism,
            Error::KeyGroupOutOfRange {
                key_group: row.key_group,
                range: KeyGroupRange::new(0, max_parallelism),
            }
        );
    }
    Ok(())
}

fn registry_error(report: Report<heron_core::Error>, name: &str) -> Report<Error> {
    let context = match report.current_context() {
        heron_core::Error::DuplicateState(name) => Error::DuplicateState(name.clone()),
        heron_core::Error::KeyCodecMismatch {
            registered,
            requested,
        } => Error::KeyCodecMismatch {
            registered: registered.clone(),
            requested: requested.clone(),
        },
        _ => Error::RegisterState(name.to_owned()),
    };
    report.change_context(context)
}
