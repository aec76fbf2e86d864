use magnetite::buffer::buffer_pool_manager_instance::BufferPoolManagerInstance;
use magnetite::buffer::parallel_buffer_pool_manager::ParallelBufferPoolManager;
use magnetite::common::logger::initialize_logger;
use magnetite::common::rid::RID;
use magnetite::container::extendible_hash_table::ExtendibleHashTable;
use magnetite::container::hash_function::HashFunction;
use magnetite::storage::disk::disk_manager::{DiskManager, FileDiskManager};
use magnetite::storage::index::generic_key::{GenericComparator, GenericKey};
use magnetite::storage::index::int_comparator::IntComparator;
use magnetite::storage::page::hash_table_bucket_page::HashTableBucketPage;
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, TempDir};

type IntHashTable = ExtendibleHashTable<i32, i32, IntComparator>;

fn bucket_capacity() -> usize {
    HashTableBucketPage::<i32, i32, IntComparator>::array_size()
}

fn make_table(pool_size: usize) -> (Arc<IntHashTable>, TempDir) {
    initialize_logger();
    let dir = tempdir().unwrap();
    let disk_manager: Arc<dyn DiskManager> = Arc::new(
        FileDiskManager::new(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
    );
    let bpm = Arc::new(BufferPoolManagerInstance::new(pool_size, disk_manager, None));
    let table = Arc::new(ExtendibleHashTable::new(
        bpm,
        IntComparator::new(),
        HashFunction::new(),
    ));
    (table, dir)
}

/// Mines keys whose hash lands in directory slot 0 at global depth 1, so
/// they all contend for the same initial bucket.
fn colliding_keys(count: usize) -> Vec<i32> {
    let hash_fn = HashFunction::<i32>::new();
    let mut keys = vec![];
    let mut candidate = 0;
    while keys.len() < count {
        if hash_fn.get_hash(&candidate) as u32 & 1 == 0 {
            keys.push(candidate);
        }
        candidate += 1;
    }
    keys
}

#[test]
fn insert_and_get_test() {
    let (table, _dir) = make_table(16);

    for i in 0..500 {
        assert!(table.insert(None, &i, &i));
    }
    table.verify_integrity();

    for i in 0..500 {
        let mut result = vec![];
        assert!(table.get_value(None, &i, &mut result));
        assert_eq!(result, vec![i]);
    }
}

#[test]
fn split_on_overflow_test() {
    // Scenario: insert one more key than a bucket can hold, all hashing
    // to the same initial bucket. At least one split must occur.
    let (table, _dir) = make_table(16);
    let keys = colliding_keys(bucket_capacity() + 1);

    for key in &keys {
        assert!(table.insert(None, key, key), "insert {} failed", key);
    }
    table.verify_integrity();
    assert!(table.get_global_depth() >= 2);

    for key in &keys {
        let mut result = vec![];
        assert!(table.get_value(None, key, &mut result));
        assert_eq!(result, vec![*key]);
    }
}

#[test]
fn merge_and_shrink_test() {
    // Scenario: after forcing splits, removing all but one key fires the
    // merges and lets the directory shrink again.
    let (table, _dir) = make_table(16);
    let keys = colliding_keys(bucket_capacity() + 1);

    for key in &keys {
        assert!(table.insert(None, key, key));
    }
    let grown_depth = table.get_global_depth();
    assert!(grown_depth >= 2);

    for key in &keys[1..] {
        assert!(table.remove(None, key, key), "remove {} failed", key);
    }
    table.verify_integrity();

    let final_depth = table.get_global_depth();
    assert!(final_depth >= 1);
    assert!(final_depth < grown_depth);

    let survivor = keys[0];
    let mut result = vec![];
    assert!(table.get_value(None, &survivor, &mut result));
    assert_eq!(result, vec![survivor]);
}

#[test]
fn insert_remove_round_trip_test() {
    let (table, _dir) = make_table(16);

    // Insert then remove restores the pre-insert lookup result.
    for i in 0..50 {
        assert!(table.insert(None, &i, &i));
    }
    for i in 0..50 {
        assert!(table.remove(None, &i, &i));
        let mut result = vec![];
        assert!(!table.get_value(None, &i, &mut result));
    }
    table.verify_integrity();
}

#[test]
fn runs_against_parallel_buffer_pool_test() {
    initialize_logger();
    let dir = tempdir().unwrap();
    let disk_manager: Arc<dyn DiskManager> = Arc::new(
        FileDiskManager::new(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
    );
    let bpm = Arc::new(ParallelBufferPoolManager::new(4, 8, disk_manager, None));
    let table: IntHashTable =
        ExtendibleHashTable::new(bpm, IntComparator::new(), HashFunction::new());

    for i in 0..1000 {
        assert!(table.insert(None, &i, &i));
    }
    table.verify_integrity();

    for i in 0..1000 {
        let mut result = vec![];
        assert!(table.get_value(None, &i, &mut result));
        assert_eq!(result, vec![i]);
    }
}

#[test]
fn generic_key_rid_table_test() {
    // An index-shaped instantiation: opaque fixed-width keys mapping to
    // record ids, the way a table index uses the hash table.
    initialize_logger();
    let dir = tempdir().unwrap();
    let disk_manager: Arc<dyn DiskManager> = Arc::new(
        FileDiskManager::new(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
    );
    let bpm = Arc::new(BufferPoolManagerInstance::new(16, disk_manager, None));
    let table: ExtendibleHashTable<GenericKey<8>, RID, GenericComparator<8>> =
        ExtendibleHashTable::new(bpm, GenericComparator::new(), HashFunction::new());

    for i in 0..200u64 {
        let key = GenericKey::<8>::from_u64(i);
        let rid = RID::new(i as i32, (i % 16) as u32);
        assert!(table.insert(None, &key, &rid));
    }
    table.verify_integrity();

    for i in 0..200u64 {
        let key = GenericKey::<8>::from_u64(i);
        let mut result = vec![];
        assert!(table.get_value(None, &key, &mut result));
        assert_eq!(result, vec![RID::new(i as i32, (i % 16) as u32)]);
    }

    // A non-unique index stores several rows under one key.
    let key = GenericKey::<8>::from_u64(0);
    assert!(table.insert(None, &key, &RID::new(500, 1)));
    let mut result = vec![];
    assert!(table.get_value(None, &key, &mut result));
    assert_eq!(result.len(), 2);

    assert!(table.remove(None, &key, &RID::new(500, 1)));
    result.clear();
    assert!(table.get_value(None, &key, &mut result));
    assert_eq!(result, vec![RID::new(0, 0)]);
}

#[test]
fn concurrent_insert_test() {
    let (table, _dir) = make_table(32);

    let mut handles = vec![];
    for t in 0..4 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for i in 0..250 {
                let key = t * 1000 + i;
                assert!(table.insert(None, &key, &key));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    table.verify_integrity();
    for t in 0..4 {
        for i in 0..250 {
            let key = t * 1000 + i;
            let mut result = vec![];
            assert!(table.get_value(None, &key, &mut result));
            assert_eq!(result, vec![key]);
        }
    }
}
