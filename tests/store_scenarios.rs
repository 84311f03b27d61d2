//! End-to-end scenarios against a `tempfile`-backed `LogDataStore`, one
//! per concrete case enumerated for this store.

use logdocstore::config::{LogDataStoreConfig, RandReadKind};
use logdocstore::{IDataStore, LogDataStore};

fn doc(lid: u32) -> Vec<u8> {
    format!("doc-{lid}").into_bytes()
}

#[test]
fn simple_round_trip_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        for lid in 0..5u32 {
            store.write(lid, &doc(lid)).unwrap();
        }
        let last_serial = store.flush().unwrap();
        assert_eq!(last_serial, 4);
    }
    let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
    for lid in 0..5u32 {
        assert_eq!(store.read(lid).unwrap(), Some(doc(lid)));
    }
}

#[test]
fn small_segments_rotate_and_stay_readable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LogDataStoreConfig::default();
    config.max_file_size = 4096;
    config.file_config.max_chunk_bytes = 512;

    let store = LogDataStore::open(dir.path(), config).unwrap();
    let payload = vec![0x42u8; 100];
    for lid in 0..200u32 {
        store.write(lid, &payload).unwrap();
    }
    store.flush().unwrap();

    for lid in 0..200u32 {
        assert_eq!(store.read(lid).unwrap(), Some(payload.clone()));
    }
}

#[test]
fn a_torn_idx_tail_is_recovered_by_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LogDataStoreConfig::default();
    config.max_file_size = 4096;
    config.file_config.max_chunk_bytes = 512;

    {
        let store = LogDataStore::open(dir.path(), config).unwrap();
        let payload = vec![0x7u8; 100];
        for lid in 0..200u32 {
            store.write(lid, &payload).unwrap();
        }
        store.flush().unwrap();
    }

    // Truncate the most recently written .idx file by a few bytes to
    // simulate a crash mid-append.
    let mut idx_files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "idx"))
        .collect();
    idx_files.sort_by_key(|p| {
        p.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0)
    });
    let newest = idx_files.last().unwrap();
    let len = std::fs::metadata(newest).unwrap().len();
    let f = std::fs::OpenOptions::new().write(true).open(newest).unwrap();
    f.set_len(len.saturating_sub(3)).unwrap();
    drop(f);

    // Recovery must not error, even though the last segment's tail is torn.
    let store = LogDataStore::open(dir.path(), config).unwrap();
    assert!(store.doc_id_limit() > 0);
}

#[test]
fn bucket_compaction_orders_output_by_bucket() {
    use logdocstore::bucketizer::ModuloBucketizer;
    use logdocstore::synclog::NoopSyncProxy;
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let mut config = LogDataStoreConfig::default();
    config.max_file_size = 1_000_000;
    config.file_config.max_chunk_bytes = 256;
    config.file_config.compression = logdocstore::config::CompressionConfig::none();

    let store = LogDataStore::open_with(
        dir.path(),
        config,
        Arc::new(NoopSyncProxy),
        Arc::new(ModuloBucketizer::new(4)),
    )
    .unwrap();

    // Skew heavily toward bucket 0 and scatter the rest across 1..3 so the
    // chunks straddling i=70 mix multiple buckets.
    let mut lids = Vec::with_capacity(100);
    for i in 0..100u32 {
        let bucket = if i < 70 { 0 } else { (i - 70) % 3 + 1 };
        lids.push(4 * i + bucket);
    }
    for &lid in &lids {
        store.write(lid, b"x").unwrap();
    }
    store.flush().unwrap();

    // Force the active segment to freeze: one oversized write tips it over
    // max_file_size, then removing it excludes it from the frozen segment's
    // live set. The fresh store's first (and only) segment is file_id 0.
    store.write(999_999, &vec![0u8; 2_000_000]).unwrap();
    store.remove(999_999).unwrap();

    store.compact_segment(0, true).unwrap();

    let mut seen = Vec::new();
    store
        .visit(&mut |lid, _bytes| {
            seen.push(lid);
            Ok(())
        })
        .unwrap();

    let mut present = seen.clone();
    present.sort_unstable();
    let mut expected = lids.clone();
    expected.sort_unstable();
    assert_eq!(present, expected);

    // Every lid from an earlier bucket must precede every lid from a
    // later one in the compacted segment's visit order.
    for window in seen.windows(2) {
        let (a, b) = (window[0] % 4, window[1] % 4);
        assert!(a <= b, "bucket order violated: lid%4={a} before lid%4={b}");
    }
}

#[test]
fn remove_then_overwrite_leaves_the_final_write_visible() {
    let dir = tempfile::tempdir().unwrap();
    let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
    store.write(7, b"a").unwrap();
    store.write(7, b"bb").unwrap();
    store.remove(7).unwrap();
    store.write(7, b"ccc").unwrap();
    store.flush().unwrap();
    drop(store);

    let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
    assert_eq!(store.read(7).unwrap(), Some(b"ccc".to_vec()));
}

#[test]
fn direct_io_tune_falls_back_to_a_readable_segment() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LogDataStoreConfig::default();
    config.tune.rand_read = RandReadKind::DirectIo;
    let store = LogDataStore::open(dir.path(), config).unwrap();
    store.write(1, b"hello").unwrap();
    store.flush().unwrap();
    assert_eq!(store.read(1).unwrap(), Some(b"hello".to_vec()));
}
