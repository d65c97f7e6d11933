use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use heron_checkpoint::{
    CheckpointStorage, ObjectStoreStorage, OperatorCheckpoint, OperatorId, RawStateHandle,
    Savepoint, StateHandle, SubtaskState,
};
use heron_core::codec::{I32Codec, I64Codec, StringCodec, U64Codec};
use heron_core::{key_groups, TypeCodec};
use heron_dataset::Dataset;
use heron_state::OperatorStateBackend;
use heron_writer::{
    read_partitioned_rows, Error, KeyGroupsReader, OperatorStateWriter, WriterOptions,
};

fn options(checkpoint_id: u64) -> WriterOptions {
    WriterOptions::default()
        .with_checkpoint_id(checkpoint_id)
        .with_timestamp_ms(1_000)
        .with_worker_threads(2)
}

fn storage() -> ObjectStoreStorage {
    ObjectStoreStorage::local().unwrap()
}

fn writer(base: OperatorCheckpoint, output: &Path, options: WriterOptions) -> OperatorStateWriter {
    OperatorStateWriter::try_new(Arc::new(storage()), base, output, options).unwrap()
}

/// Decode all entries of `state_name` from the keyed state of `checkpoint`.
fn decode_entries<K, V>(
    checkpoint: &OperatorCheckpoint,
    state_name: &str,
    key_codec: impl TypeCodec<K>,
    value_codec: impl TypeCodec<V>,
) -> Vec<(K, V)> {
    decode_entries_from(&storage(), checkpoint, state_name, key_codec, value_codec)
}

fn decode_entries_from<K, V>(
    storage: &dyn CheckpointStorage,
    checkpoint: &OperatorCheckpoint,
    state_name: &str,
    key_codec: impl TypeCodec<K>,
    value_codec: impl TypeCodec<V>,
) -> Vec<(K, V)> {
    let mut entries = Vec::new();
    for handle in checkpoint.keyed_state_handles() {
        let reader = KeyGroupsReader::open(storage, handle).unwrap();
        for row in reader.rows().unwrap() {
            assert!(handle.key_group_range.contains(row.key_group));
            if row.state_name == state_name {
                entries.push((
                    key_codec.decode(&row.key).unwrap(),
                    value_codec.decode(&row.value).unwrap(),
                ));
            }
        }
    }
    entries
}

/// An operator with keyed state written by a previous rewrite.
fn keyed_operator(
    output: &Path,
    parallelism: usize,
    max_parallelism: u32,
    entries: Vec<(i32, i64)>,
) -> OperatorCheckpoint {
    let base = OperatorCheckpoint::new(OperatorId::new("keyed"), parallelism, max_parallelism);
    let mut writer = writer(base, output, options(1));
    writer
        .declare_new_value_state("total", Dataset::from_vec(entries), I64Codec)
        .unwrap();
    writer.rewrite().unwrap()
}

/// An operator where each subtask has a broadcast state and a list state.
fn operator_with_operator_state(dir: &Path, parallelism: usize) -> OperatorCheckpoint {
    let storage = storage();
    let mut base = OperatorCheckpoint::new(OperatorId::new("source"), parallelism, 16);
    for subtask in 0..parallelism {
        let mut backend = OperatorStateBackend::new();
        let mut rules = backend
            .broadcast_state("rules", StringCodec, I32Codec)
            .unwrap();
        rules.put(&"drop".to_owned(), &1).unwrap();
        rules.put(&"keep".to_owned(), &2).unwrap();
        backend
            .list_state("offsets", I64Codec)
            .unwrap()
            .add(&(subtask as i64 * 100))
            .unwrap();

        let handle = backend
            .snapshot(&storage, dir, 1, 0)
            .unwrap()
            .unwrap();
        base.put_subtask_state(
            subtask,
            SubtaskState {
                managed_operator_state: vec![handle],
                ..SubtaskState::default()
            },
        );
    }
    base
}

#[test]
fn test_declare_new_counter_state() {
    heron_testing::init_test_logging();
    let output = heron_testing::temp_checkpoint_dir();
    let base = OperatorCheckpoint::new(OperatorId::new("counter-op"), 2, 4);

    let mut writer = writer(base, output.path(), options(7));
    writer
        .declare_new_value_state(
            "counter",
            Dataset::from_vec(vec![(1i32, 10i32), (3, 20)]),
            I32Codec,
        )
        .unwrap();
    let rewritten = writer.rewrite().unwrap();

    assert_eq!(rewritten.parallelism(), 2);
    assert_eq!(rewritten.max_parallelism(), 4);
    assert_eq!(rewritten.subtask_states().count(), 2);
    assert!(rewritten.keyed_state_handles().count() <= 2);

    let op_dir = output.path().join("checkpoint-7").join("op-counter-op");
    for handle in rewritten.keyed_state_handles() {
        assert!(handle.path.starts_with(&op_dir));
    }

    // Every key lands in the subtask owning its key group.
    for (index, state) in rewritten.subtask_states() {
        if let Some(handle) = &state.managed_keyed_state {
            assert_eq!(
                handle.key_group_range,
                key_groups::key_group_range_for_operator(4, 2, index)
            );
        }
    }

    let entries: BTreeSet<_> = decode_entries(&rewritten, "counter", I32Codec, I32Codec)
        .into_iter()
        .collect();
    assert_eq!(entries, BTreeSet::from([(1, 10), (3, 20)]));
}

#[test]
fn test_duplicate_keys_keep_encounter_order() {
    let output = heron_testing::temp_checkpoint_dir();
    let base = OperatorCheckpoint::new(OperatorId::new("dups"), 1, 4);

    let mut writer = writer(base, output.path(), options(1));
    writer
        .declare_new_value_state(
            "c",
            Dataset::from_partitions(vec![vec![(1i32, 10i32)], vec![(3, 30), (1, 20)]]),
            I32Codec,
        )
        .unwrap();
    let rewritten = writer.rewrite().unwrap();

    let entries = decode_entries(&rewritten, "c", I32Codec, I32Codec);
    assert_eq!(entries.len(), 3);
    let key_1: Vec<_> = entries.iter().filter(|(key, _)| *key == 1).collect();
    assert_eq!(key_1, vec![&(1, 10), &(1, 20)]);
    assert!(entries.contains(&(3, 30)));
}

#[test]
fn test_rewrite_in_memory() {
    let storage = Arc::new(ObjectStoreStorage::in_memory().unwrap());
    let savepoint_dir = Path::new("/savepoints/savepoint-4");
    let output = Path::new("/savepoints");

    let base = OperatorCheckpoint::new(OperatorId::new("op"), 2, 8);
    Savepoint::new(4, vec![base])
        .store(storage.as_ref(), savepoint_dir)
        .unwrap();
    let savepoint = Savepoint::load(storage.as_ref(), savepoint_dir).unwrap();

    let mut writer = OperatorStateWriter::for_savepoint(
        storage.clone(),
        &savepoint,
        &OperatorId::new("op"),
        output,
        WriterOptions::default().with_worker_threads(2),
    )
    .unwrap();
    let entries: Vec<(i32, i64)> = (0..20).map(|key| (key, key as i64 + 1)).collect();
    writer
        .declare_new_value_state("total", Dataset::from_vec(entries.clone()), I64Codec)
        .unwrap();
    let rewritten = writer.rewrite().unwrap();

    for handle in rewritten.keyed_state_handles() {
        assert!(handle.path.starts_with("/savepoints/checkpoint-4/op-op"));
        assert!(!handle.path.exists());
    }
    let mut decoded =
        decode_entries_from(storage.as_ref(), &rewritten, "total", I32Codec, I64Codec);
    decoded.sort();
    assert_eq!(decoded, entries);
}

#[test]
fn test_rescale_keeps_all_entries() {
    let output = heron_testing::temp_checkpoint_dir();
    let entries: Vec<(i32, i64)> = (0..200).map(|key| (key, key as i64 * 3)).collect();
    let source = keyed_operator(output.path(), 2, 8, entries.clone());
    assert_eq!(source.keyed_state_handles().count(), 2);

    let rescaled_output = heron_testing::temp_checkpoint_dir();
    let mut writer = writer(
        source.clone(),
        rescaled_output.path(),
        options(2).with_parallelism(4),
    );
    writer.add_partitioned_rows(read_partitioned_rows(&storage(), &source).unwrap());
    let rescaled = writer.rewrite().unwrap();

    assert_eq!(rescaled.parallelism(), 4);
    assert_eq!(rescaled.max_parallelism(), 8);
    assert_eq!(rescaled.keyed_state_handles().count(), 4);

    let mut decoded = decode_entries(&rescaled, "total", I32Codec, I64Codec);
    decoded.sort();
    assert_eq!(decoded, entries);
}

#[test]
fn test_scale_down_keyed_state() {
    let output = heron_testing::temp_checkpoint_dir();
    let entries: Vec<(i32, i64)> = (0..50).map(|key| (key, -(key as i64))).collect();
    let source = keyed_operator(output.path(), 4, 8, entries.clone());

    let mut writer = writer(source.clone(), output.path(), options(2).with_parallelism(1));
    writer.add_partitioned_rows(read_partitioned_rows(&storage(), &source).unwrap());
    let rescaled = writer.rewrite().unwrap();

    assert_eq!(rescaled.subtask_states().count(), 1);
    let mut decoded = decode_entries(&rescaled, "total", I32Codec, I64Codec);
    decoded.sort();
    assert_eq!(decoded, entries);
}

#[test]
fn test_replace_one_state_and_keep_another() {
    let output = heron_testing::temp_checkpoint_dir();
    let base = OperatorCheckpoint::new(OperatorId::new("keyed"), 2, 16);
    let mut writer1 = writer(base, output.path(), options(1));
    writer1
        .declare_new_value_state(
            "total",
            Dataset::from_vec(vec![(1i32, 1i64), (2, 2)]),
            I64Codec,
        )
        .unwrap();
    writer1
        .declare_new_value_state(
            "name",
            Dataset::from_vec(vec![(1i32, "one".to_owned()), (2, "two".to_owned())]),
            StringCodec,
        )
        .unwrap();
    let source = writer1.rewrite().unwrap();

    let mut writer2 = writer(source.clone(), output.path(), options(2));
    assert!(writer2.registry().contains("total"));
    assert!(writer2.registry().contains("name"));

    let kept = read_partitioned_rows(&storage(), &source)
        .unwrap()
        .filter(|row| row.state_name != "total");
    writer2.add_partitioned_rows(kept);
    writer2
        .add_or_replace_value_state("total", Dataset::from_vec(vec![(1i32, 100i64), (3, 300)]))
        .unwrap();
    let rewritten = writer2.rewrite().unwrap();

    let mut totals = decode_entries(&rewritten, "total", I32Codec, I64Codec);
    totals.sort();
    assert_eq!(totals, vec![(1, 100), (3, 300)]);

    let mut names = decode_entries(&rewritten, "name", I32Codec, StringCodec);
    names.sort();
    assert_eq!(names, vec![(1, "one".to_owned()), (2, "two".to_owned())]);
}

#[test]
fn test_transform_one_subtask() {
    heron_testing::init_test_logging();
    let source_dir = heron_testing::temp_checkpoint_dir();
    let output = heron_testing::temp_checkpoint_dir();
    let source = operator_with_operator_state(source_dir.path(), 3);

    let mut writer = writer(source.clone(), output.path(), options(5));
    writer.set_non_partitioned_state_transform(|subtask, backend| {
        if subtask == 0 {
            let mut rules = backend
                .broadcast_state("rules", StringCodec, I32Codec)
                .map_err(|report| anyhow::anyhow!("{report:?}"))?;
            rules
                .remove(&"drop".to_owned())
                .map_err(|report| anyhow::anyhow!("{report:?}"))?;
        }
        Ok(())
    });
    let rewritten = writer.rewrite().unwrap();

    let transformed = &rewritten.subtask_state(0).unwrap().managed_operator_state;
    assert_eq!(transformed.len(), 1);
    assert!(transformed[0]
        .path
        .starts_with(output.path().join("checkpoint-5").join("op-source")));

    let mut restored = OperatorStateBackend::restore(&storage(), transformed).unwrap();
    let rules = restored
        .broadcast_state("rules", StringCodec, I32Codec)
        .unwrap();
    assert_eq!(rules.entries().unwrap(), vec![("keep".to_owned(), 2)]);
    drop(rules);
    assert_eq!(
        restored
            .list_state("offsets", I64Codec)
            .unwrap()
            .get()
            .unwrap(),
        vec![0]
    );

    for subtask in 1..3 {
        let original = &source.subtask_state(subtask).unwrap().managed_operator_state;
        let kept = &rewritten.subtask_state(subtask).unwrap().managed_operator_state;
        assert_eq!(kept, original);
        assert_eq!(
            std::fs::read(&kept[0].path).unwrap(),
            std::fs::read(&original[0].path).unwrap()
        );
    }
}

#[test]
fn test_rewrite_is_deterministic() {
    let source_dir = heron_testing::temp_checkpoint_dir();
    let entries: Vec<(i32, i64)> = (0..64).map(|key| (key * 7, key as i64)).collect();
    let source = keyed_operator(source_dir.path(), 3, 32, entries);

    let rewrite = |output: &Path| {
        let mut writer = writer(source.clone(), output, options(9));
        writer.add_partitioned_rows(read_partitioned_rows(&storage(), &source).unwrap());
        writer.rewrite().unwrap()
    };
    let first_output = heron_testing::temp_checkpoint_dir();
    let second_output = heron_testing::temp_checkpoint_dir();
    let first = rewrite(first_output.path());
    let second = rewrite(second_output.path());

    let first_handles: Vec<_> = first.keyed_state_handles().collect();
    let second_handles: Vec<_> = second.keyed_state_handles().collect();
    assert_eq!(first_handles.len(), second_handles.len());
    for (a, b) in first_handles.iter().zip(&second_handles) {
        assert_ne!(a.path, b.path);
        assert_eq!(a.offsets, b.offsets);
        assert_eq!(a.num_entries, b.num_entries);
        assert_eq!(
            std::fs::read(&a.path).unwrap(),
            std::fs::read(&b.path).unwrap()
        );
    }
}

#[test]
fn test_raw_state_is_carried_over() {
    let output = heron_testing::temp_checkpoint_dir();
    let raw = StateHandle::Raw(RawStateHandle {
        path: output.path().join("raw"),
        state_size: 12,
    });
    let mut base = OperatorCheckpoint::new(OperatorId::new("raw"), 2, 4);
    base.put_subtask_state(
        1,
        SubtaskState {
            raw_keyed_state: vec![raw.clone()],
            raw_operator_state: vec![raw.clone()],
            ..SubtaskState::default()
        },
    );

    let rewritten = writer(base, output.path(), options(1)).rewrite().unwrap();
    assert!(rewritten.subtask_state(0).unwrap().is_empty());
    let carried = rewritten.subtask_state(1).unwrap();
    assert_eq!(carried.raw_keyed_state, vec![raw.clone()]);
    assert_eq!(carried.raw_operator_state, vec![raw]);
}

#[test]
fn test_rewrite_savepoint_operator() {
    let storage = Arc::new(storage());
    let savepoint_dir = heron_testing::temp_checkpoint_dir();
    let output = heron_testing::temp_checkpoint_dir();

    let other = OperatorCheckpoint::new(OperatorId::new("other"), 1, 4);
    let target = OperatorCheckpoint::new(OperatorId::new("target"), 2, 4);
    Savepoint::new(12, vec![other.clone(), target])
        .store(storage.as_ref(), savepoint_dir.path())
        .unwrap();
    let savepoint = Savepoint::load(storage.as_ref(), savepoint_dir.path()).unwrap();

    let err = OperatorStateWriter::for_savepoint(
        storage.clone(),
        &savepoint,
        &OperatorId::new("missing"),
        output.path(),
        WriterOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err.current_context(), Error::UnknownOperator(id) if id.as_str() == "missing"));

    let mut writer = OperatorStateWriter::for_savepoint(
        storage.clone(),
        &savepoint,
        &OperatorId::new("target"),
        output.path(),
        WriterOptions::default().with_worker_threads(1),
    )
    .unwrap();
    assert_eq!(writer.options().checkpoint_id, Some(12));
    writer
        .declare_new_value_state("seen", Dataset::from_vec(vec![(5i64, 1u64)]), U64Codec)
        .unwrap();
    let rewritten = writer.rewrite().unwrap();
    assert!(output.path().join("checkpoint-12").join("op-target").is_dir());

    let new_savepoint = savepoint.with_operator(rewritten.clone());
    let new_dir = output.path().join("checkpoint-12");
    new_savepoint.store(storage.as_ref(), &new_dir).unwrap();

    let loaded = Savepoint::load(storage.as_ref(), &new_dir).unwrap();
    assert_eq!(loaded.operator(&OperatorId::new("target")), Some(&rewritten));
    assert_eq!(loaded.operator(&OperatorId::new("other")), Some(&other));
}

#[test]
fn test_missing_partitioned_rows() {
    let output = heron_testing::temp_checkpoint_dir();
    let source = keyed_operator(output.path(), 2, 4, vec![(1, 1)]);

    let err = writer(source, output.path(), options(2))
        .rewrite()
        .unwrap_err();
    assert!(matches!(err.current_context(), Error::MissingPartitionedRows));
}

#[test]
fn test_invalid_parallelism() {
    let output = heron_testing::temp_checkpoint_dir();
    for parallelism in [0, 5] {
        let base = OperatorCheckpoint::new(OperatorId::new("op"), 2, 4);
        let err = writer(base, output.path(), options(1).with_parallelism(parallelism))
            .rewrite()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            Error::InvalidParallelism {
                max_parallelism: 4,
                ..
            }
        ));
    }
}

#[test]
fn test_scale_down_drops_operator_state() {
    let source_dir = heron_testing::temp_checkpoint_dir();
    let output = heron_testing::temp_checkpoint_dir();
    let source = operator_with_operator_state(source_dir.path(), 3);

    let err = writer(source, output.path(), options(1).with_parallelism(2))
        .rewrite()
        .unwrap_err();
    assert!(matches!(err.current_context(), Error::DroppedSubtaskState(2)));
}

#[test]
fn test_failing_transform_aborts_rewrite() {
    let source_dir = heron_testing::temp_checkpoint_dir();
    let output = heron_testing::temp_checkpoint_dir();
    let source = operator_with_operator_state(source_dir.path(), 2);

    let mut writer = writer(source, output.path(), options(1));
    writer.set_non_partitioned_state_transform(|subtask, backend| {
        backend.remove_state("offsets");
        anyhow::ensure!(subtask == 0, "cannot transform subtask {subtask}");
        Ok(())
    });
    let err = writer.rewrite().unwrap_err();

    assert!(matches!(err.current_context(), Error::Execution));
    assert!(err
        .frames()
        .filter_map(|frame| frame.downcast_ref::<Error>())
        .any(|error| matches!(error, Error::TransformOperatorState(1))));
}

#[test]
fn test_options_from_yaml() {
    let output = heron_testing::temp_checkpoint_dir();
    let options =
        WriterOptions::from_yaml_str("checkpoint_id: 3\nparallelism: 1\nworker_threads: 1\n")
            .unwrap();
    let base = OperatorCheckpoint::new(OperatorId::new("op"), 2, 4);
    let rewritten = writer(base, output.path(), options).rewrite().unwrap();

    assert_eq!(rewritten.parallelism(), 1);
    assert_eq!(rewritten.subtask_states().count(), 1);
    assert_eq!(rewritten.keyed_state_handles().count(), 0);
}
