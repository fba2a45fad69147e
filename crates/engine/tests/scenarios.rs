use memtx_core::config::EngineConfig;
use memtx_core::error::Error;
use memtx_core::vclock::Vclock;
use memtx_engine::{Engine, OpaqueFormat};
use memtx_snapshot::reader::SnapshotReader;
use memtx_snapshot::writer::{CheckpointEntry, SnapshotWriter};

fn make_engine(force_recovery: bool) -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::new(dir.path(), 8 * 1024 * 1024).with_force_recovery(force_recovery);
    let engine = Engine::new(cfg).unwrap();
    (dir, engine)
}

#[tokio::test]
async fn cow_basic_and_delayed_free_reclaim() {
    let (_dir, engine) = make_engine(false);
    engine.create_space(1, 0, false).unwrap();
    engine.bootstrap().unwrap();
    let fmt = OpaqueFormat::new(1);

    let _t1 = engine.insert(1, b"tuple-1", &fmt).unwrap();
    let _t2 = engine.insert(1, b"tuple-2", &fmt).unwrap();
    let _t3 = engine.insert(1, b"tuple-3", &fmt).unwrap();

    engine.begin_checkpoint().unwrap();

    // Delete tuple-2 from the live index while the checkpoint is in flight.
    engine.delete(1, b"tuple-2").unwrap();
    let used_with_delayed_tuple = engine.memory_stat().data;
    assert!(used_with_delayed_tuple > 0);

    let vclock = Vclock::new().with_component(0, 1);
    engine.wait_checkpoint(vclock).await.unwrap();
    let path = engine.commit_checkpoint().unwrap();

    // Bytes for tuple-2 are still charged until the generation advances
    // and a reclaim pass runs, even though commit has already happened.
    assert_eq!(engine.memory_stat().data, used_with_delayed_tuple);
    engine.allocator().try_reclaim();
    assert!(engine.memory_stat().data < used_with_delayed_tuple);

    // All three tuples made it into the snapshot file, including the
    // deleted one, because the iterator captured it at begin_checkpoint.
    let mut reader = SnapshotReader::open(&path).unwrap();
    let mut seen = vec![];
    while let Some(row) = reader.next_row().unwrap() {
        seen.push(row.tuple);
    }
    reader.finish().unwrap();
    seen.sort();
    assert_eq!(
        seen,
        vec![b"tuple-1".to_vec(), b"tuple-2".to_vec(), b"tuple-3".to_vec()]
    );
}

#[tokio::test]
async fn abort_checkpoint_leaves_no_inprogress_file_and_allows_retry() {
    let (dir, engine) = make_engine(false);
    engine.create_space(1, 0, false).unwrap();
    engine.bootstrap().unwrap();
    let fmt = OpaqueFormat::new(1);
    engine.insert(1, b"a", &fmt).unwrap();

    engine.begin_checkpoint().unwrap();
    engine
        .wait_checkpoint(Vclock::new().with_component(0, 1))
        .await
        .unwrap();
    engine.abort_checkpoint().unwrap();

    let leftover: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .and_then(|e| e.to_str())
                == Some("inprogress")
        })
        .collect();
    assert!(leftover.is_empty());

    // A fresh checkpoint cycle succeeds afterwards.
    engine.begin_checkpoint().unwrap();
    engine
        .wait_checkpoint(Vclock::new().with_component(0, 2))
        .await
        .unwrap();
    let path = engine.commit_checkpoint().unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn recovery_ordering_defers_secondary_build() {
    let (dir, engine) = make_engine(false);
    engine.create_space(1, 0, false).unwrap();
    engine
        .add_secondary_index(1, true, |data: &[u8]| data.to_vec())
        .unwrap();

    // Hand-build a snapshot file with 1000 distinct rows for space 1,
    // bypassing the engine (this simulates a snapshot written by a
    // prior process instance).
    let writer = SnapshotWriter::new(dir.path());
    let rows: Vec<Vec<u8>> = (0..1000u32).map(|i| i.to_be_bytes().to_vec()).collect();
    writer
        .begin(vec![CheckpointEntry {
            space_id: 1,
            group_id: 0,
            iterator: Box::new(RowIter::new(rows)),
        }])
        .unwrap();
    let vclock = Vclock::new().with_component(0, 1);
    writer.wait(vclock.clone()).await.unwrap();
    let path = writer.commit().unwrap();

    engine.begin_initial_recovery().unwrap();
    engine.recover_from_snapshot(&path).unwrap();
    assert_eq!(engine.space_size(1, 0).unwrap(), 1000);
    assert_eq!(engine.space_size(1, 1).unwrap(), 0);

    engine.begin_final_recovery().unwrap();
    assert_eq!(engine.space_size(1, 1).unwrap(), 0);

    engine.end_recovery().unwrap();
    assert_eq!(engine.space_size(1, 1).unwrap(), 1000);
}

#[tokio::test]
async fn force_recovery_duplicate_rejection_without_force() {
    let (dir, engine) = make_engine(false);
    engine.create_space(1, 0, false).unwrap();
    engine
        .add_secondary_index(1, true, |data: &[u8]| data[0..1].to_vec())
        .unwrap();

    let writer = SnapshotWriter::new(dir.path());
    writer
        .begin(vec![CheckpointEntry {
            space_id: 1,
            group_id: 0,
            iterator: Box::new(RowIter::new(vec![b"aX".to_vec(), b"aY".to_vec()])),
        }])
        .unwrap();
    writer.wait(Vclock::new().with_component(0, 1)).await.unwrap();
    let path = writer.commit().unwrap();

    engine.begin_initial_recovery().unwrap();
    engine.recover_from_snapshot(&path).unwrap();
    engine.begin_final_recovery().unwrap();

    let err = engine.end_recovery().unwrap_err();
    assert!(matches!(err, Error::Duplicate));
}

#[tokio::test]
async fn force_recovery_duplicate_rejection_with_force() {
    let (dir, engine) = make_engine(true);
    engine.create_space(1, 0, false).unwrap();
    engine
        .add_secondary_index(1, true, |data: &[u8]| data[0..1].to_vec())
        .unwrap();

    let writer = SnapshotWriter::new(dir.path());
    writer
        .begin(vec![CheckpointEntry {
            space_id: 1,
            group_id: 0,
            iterator: Box::new(RowIter::new(vec![b"aX".to_vec(), b"aY".to_vec()])),
        }])
        .unwrap();
    writer.wait(Vclock::new().with_component(0, 1)).await.unwrap();
    let path = writer.commit().unwrap();

    engine.begin_initial_recovery().unwrap();
    assert!(engine.recovery_state().is_ok());
    engine.recover_from_snapshot(&path).unwrap();

    // Exactly one of the two duplicate-keyed rows survives.
    assert_eq!(engine.space_size(1, 0).unwrap(), 1);
    assert_eq!(engine.space_size(1, 1).unwrap(), 1);
}

struct RowIter {
    rows: std::vec::IntoIter<Vec<u8>>,
}

impl RowIter {
    fn new(rows: Vec<Vec<u8>>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl memtx_core::traits::SnapshotIterator for RowIter {
    fn next(&mut self) -> memtx_core::error::Result<Option<Vec<u8>>> {
        Ok(self.rows.next())
    }
}
