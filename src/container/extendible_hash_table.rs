use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{PageId, HTABLE_DIRECTORY_MAX_DEPTH};
use crate::concurrency::transaction::Transaction;
use crate::container::hash_function::HashFunction;
use crate::storage::index::generic_key::Comparator;
use crate::storage::index::key_codec::KeyValueCodec;
use crate::storage::page::hash_table_bucket_page::HashTableBucketPage;
use crate::storage::page::hash_table_directory_page::HashTableDirectoryPage;
use crate::storage::page::page::PageRef;
use log::{debug, warn};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;

/// Disk-backed extendible hash table: one directory page routing hashed
/// keys to bucket pages, all resident only while pinned in the buffer
/// pool. Buckets split (possibly doubling the directory) when an insert
/// finds them full and merge with their split image when emptied.
///
/// Every page access is a symmetric fetch/unpin pair; the directory page
/// is unpinned dirty only when a split or merge actually changed it.
pub struct ExtendibleHashTable<K, V, C> {
    buffer_pool_manager: Arc<dyn BufferPoolManager>,
    comparator: C,
    hash_fn: HashFunction<K>,
    directory_page_id: PageId,
    /// Readers share the table; structural operations serialize on it.
    table_latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> ExtendibleHashTable<K, V, C>
where
    K: KeyValueCodec,
    V: KeyValueCodec + PartialEq,
    C: Comparator<K>,
{
    /// Creates a table with a fresh directory at global depth one over
    /// two empty buckets.
    pub fn new(
        buffer_pool_manager: Arc<dyn BufferPoolManager>,
        comparator: C,
        hash_fn: HashFunction<K>,
    ) -> Self {
        let (directory_page_id, dir_handle) = buffer_pool_manager
            .new_page()
            .expect("buffer pool exhausted while creating the hash table directory");

        let mut dir = HashTableDirectoryPage::new(directory_page_id);
        dir.incr_global_depth();

        for bucket_idx in 0..2 {
            let (bucket_page_id, _bucket) = buffer_pool_manager
                .new_page()
                .expect("buffer pool exhausted while creating an initial bucket");
            dir.set_bucket_page_id(bucket_idx, bucket_page_id);
            dir.set_local_depth(bucket_idx, 1);
            // A zeroed page already is an empty bucket.
            buffer_pool_manager.unpin_page(bucket_page_id, false);
        }

        dir_handle
            .write()
            .get_data_mut()
            .copy_from_slice(&dir.serialize()[..]);
        buffer_pool_manager.unpin_page(directory_page_id, true);

        Self {
            buffer_pool_manager,
            comparator,
            hash_fn,
            directory_page_id,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        }
    }

    /// Downcasts the key's 64-bit hash for use against directory masks.
    fn hash(&self, key: &K) -> u32 {
        self.hash_fn.get_hash(key) as u32
    }

    fn key_to_directory_index(&self, key: &K, dir: &HashTableDirectoryPage) -> u32 {
        self.hash(key) & dir.get_global_depth_mask()
    }

    fn key_to_page_id(&self, key: &K, dir: &HashTableDirectoryPage) -> PageId {
        dir.get_bucket_page_id(self.key_to_directory_index(key, dir))
    }

    /// Fetches and parses the directory; the page stays pinned until the
    /// caller unpins `directory_page_id`.
    fn fetch_directory_page(&self) -> (HashTableDirectoryPage, PageRef) {
        let handle = self
            .buffer_pool_manager
            .fetch_page(self.directory_page_id)
            .expect("hash table directory page must be fetchable");
        let dir = HashTableDirectoryPage::from_data(handle.read().get_data());
        (dir, handle)
    }

    /// Fetches and parses a bucket; the page stays pinned until the
    /// caller unpins it.
    fn fetch_bucket_page(&self, bucket_page_id: PageId) -> (HashTableBucketPage<K, V, C>, PageRef) {
        let handle = self
            .buffer_pool_manager
            .fetch_page(bucket_page_id)
            .expect("hash table bucket page must be fetchable");
        let bucket = HashTableBucketPage::from_data(handle.read().get_data());
        (bucket, handle)
    }

    fn write_bucket(handle: &PageRef, bucket: &HashTableBucketPage<K, V, C>) {
        handle.write().get_data_mut().copy_from_slice(&bucket.data()[..]);
    }

    fn write_directory(&self, dir: &HashTableDirectoryPage, handle: &PageRef) {
        handle.write().get_data_mut().copy_from_slice(&dir.serialize()[..]);
    }

    /// Collects every value stored under the key.
    pub fn get_value(
        &self,
        _transaction: Option<&Transaction>,
        key: &K,
        result: &mut Vec<V>,
    ) -> bool {
        let _guard = self.table_latch.read();
        let (dir, _dir_handle) = self.fetch_directory_page();
        let bucket_page_id = self.key_to_page_id(key, &dir);
        let (bucket, _bucket_handle) = self.fetch_bucket_page(bucket_page_id);

        let found = bucket.get_value(key, &self.comparator, result);

        self.buffer_pool_manager.unpin_page(bucket_page_id, false);
        self.buffer_pool_manager
            .unpin_page(self.directory_page_id, false);
        found
    }

    /// Inserts the key/value pair, splitting the target bucket as many
    /// times as it takes to make room. Returns `false` without modifying
    /// anything when the exact pair is already present, or when the
    /// directory cannot grow any further.
    pub fn insert(&self, _transaction: Option<&Transaction>, key: &K, value: &V) -> bool {
        let _guard = self.table_latch.write();
        let (mut dir, dir_handle) = self.fetch_directory_page();
        let mut bucket_page_id = self.key_to_page_id(key, &dir);
        let (mut bucket, mut bucket_handle) = self.fetch_bucket_page(bucket_page_id);

        let mut existing = vec![];
        if bucket.get_value(key, &self.comparator, &mut existing) && existing.contains(value) {
            self.buffer_pool_manager.unpin_page(bucket_page_id, false);
            self.buffer_pool_manager
                .unpin_page(self.directory_page_id, false);
            return false;
        }

        let mut has_split = false;
        while bucket.is_full() {
            let bucket_index = self.key_to_directory_index(key, &dir);
            if dir.get_local_depth(bucket_index) == HTABLE_DIRECTORY_MAX_DEPTH {
                warn!("giving up insert: directory is at maximum depth");
                self.buffer_pool_manager.unpin_page(bucket_page_id, false);
                if has_split {
                    self.write_directory(&dir, &dir_handle);
                }
                self.buffer_pool_manager
                    .unpin_page(self.directory_page_id, has_split);
                return false;
            }
            self.split(&mut dir, bucket_index, bucket_page_id, bucket, &bucket_handle);
            has_split = true;
            bucket_page_id = self.key_to_page_id(key, &dir);
            let (refetched, handle) = self.fetch_bucket_page(bucket_page_id);
            bucket = refetched;
            bucket_handle = handle;
        }

        let inserted = bucket.insert(key, value, &self.comparator);
        Self::write_bucket(&bucket_handle, &bucket);
        self.buffer_pool_manager.unpin_page(bucket_page_id, true);

        if has_split {
            self.write_directory(&dir, &dir_handle);
        }
        self.buffer_pool_manager
            .unpin_page(self.directory_page_id, has_split);
        inserted
    }

    /// Splits the bucket at `bucket_index`, doubling the directory first
    /// when the bucket already distinguishes every directory bit. Consumes
    /// the caller's pin on the full bucket.
    fn split(
        &self,
        dir: &mut HashTableDirectoryPage,
        bucket_index: u32,
        bucket_page_id: PageId,
        mut bucket: HashTableBucketPage<K, V, C>,
        bucket_handle: &PageRef,
    ) {
        let local_depth = dir.get_local_depth(bucket_index);

        if local_depth == dir.get_global_depth() {
            let size = dir.size();
            dir.incr_global_depth();
            for i in 0..size {
                dir.set_bucket_page_id(i + size, dir.get_bucket_page_id(i));
                dir.set_local_depth(i + size, dir.get_local_depth(i) as u8);
            }
        }

        let (split_page_id, split_handle) = self
            .buffer_pool_manager
            .new_page()
            .expect("buffer pool exhausted while splitting a bucket");
        let mut split_bucket = HashTableBucketPage::<K, V, C>::new();
        debug!(
            "splitting bucket {} (page {}) into page {}",
            bucket_index, bucket_page_id, split_page_id
        );

        // Every slot routing to the split bucket deepens by one bit; the
        // half whose new bit disagrees with `bucket_index` moves to the
        // new page.
        let high_bit = (1u32 << local_depth) & bucket_index;
        for i in 0..dir.size() {
            if dir.get_bucket_page_id(i) == bucket_page_id {
                dir.incr_local_depth(i);
                if ((1u32 << local_depth) & i) != high_bit {
                    dir.set_bucket_page_id(i, split_page_id);
                }
            }
        }

        // Rehash live entries under the deepened mask.
        let mask = dir.get_local_depth_mask(bucket_index);
        let bucket_mask = bucket_index & mask;
        for i in 0..HashTableBucketPage::<K, V, C>::array_size() {
            if bucket.is_readable(i) {
                let key = bucket.key_at(i);
                if (self.hash(&key) & mask) != bucket_mask {
                    let value = bucket.value_at(i);
                    bucket.remove_at(i);
                    split_bucket.insert(&key, &value, &self.comparator);
                }
            }
        }

        Self::write_bucket(bucket_handle, &bucket);
        Self::write_bucket(&split_handle, &split_bucket);
        self.buffer_pool_manager.unpin_page(bucket_page_id, true);
        self.buffer_pool_manager.unpin_page(split_page_id, true);
    }

    /// Removes the exact key/value pair. An emptied bucket merges with
    /// its split image repeatedly while the merge preconditions hold.
    pub fn remove(&self, _transaction: Option<&Transaction>, key: &K, value: &V) -> bool {
        let _guard = self.table_latch.write();
        let (mut dir, dir_handle) = self.fetch_directory_page();
        let mut bucket_page_id = self.key_to_page_id(key, &dir);
        let (mut bucket, bucket_handle) = self.fetch_bucket_page(bucket_page_id);

        if !bucket.remove(key, value, &self.comparator) {
            self.buffer_pool_manager.unpin_page(bucket_page_id, false);
            self.buffer_pool_manager
                .unpin_page(self.directory_page_id, false);
            return false;
        }
        Self::write_bucket(&bucket_handle, &bucket);
        let mut is_empty = bucket.is_empty();
        self.buffer_pool_manager.unpin_page(bucket_page_id, true);

        let mut has_merged = false;
        let mut bucket_index = self.key_to_directory_index(key, &dir);
        while is_empty && self.merge(&mut dir, bucket_index) {
            has_merged = true;
            bucket_index = self.key_to_directory_index(key, &dir);
            bucket_page_id = self.key_to_page_id(key, &dir);
            let (survivor, _handle) = self.fetch_bucket_page(bucket_page_id);
            is_empty = survivor.is_empty();
            self.buffer_pool_manager.unpin_page(bucket_page_id, false);
        }

        if has_merged {
            self.write_directory(&dir, &dir_handle);
        }
        self.buffer_pool_manager
            .unpin_page(self.directory_page_id, has_merged);
        true
    }

    /// Folds the emptied bucket at `bucket_index` into its split image.
    ///
    /// Preconditions: local depth above one and a split image at the same
    /// local depth. The emptied bucket's page is freed; its page id is
    /// captured before any slot is redirected. Shrinks the directory
    /// afterwards if every bucket permits it.
    fn merge(&self, dir: &mut HashTableDirectoryPage, bucket_index: u32) -> bool {
        if dir.get_global_depth() == 0 {
            return false;
        }
        let local_depth = dir.get_local_depth(bucket_index);
        if local_depth <= 1 {
            return false;
        }
        let split_image_index = dir.get_split_image_index(bucket_index);
        if dir.get_local_depth(split_image_index) != local_depth {
            return false;
        }

        let freed_page_id = dir.get_bucket_page_id(bucket_index);
        let split_page_id = dir.get_bucket_page_id(split_image_index);
        debug!(
            "merging bucket {} (page {}) into its split image {} (page {})",
            bucket_index, freed_page_id, split_image_index, split_page_id
        );

        // Route everything that pointed at the emptied bucket to the
        // surviving page.
        let global_depth = dir.get_global_depth();
        let mask = dir.get_local_depth_mask(bucket_index);
        let suffix = bucket_index & mask;
        for i in 0..(1u32 << (global_depth - local_depth)) {
            let index = (i << local_depth) + suffix;
            dir.set_bucket_page_id(index, split_page_id);
        }

        // The merged bucket distinguishes one bit fewer; every slot of
        // the combined family drops to the new local depth.
        let merged_depth = local_depth - 1;
        let merged_suffix = split_image_index & (mask >> 1);
        for i in 0..(1u32 << (global_depth - merged_depth)) {
            let index = (i << merged_depth) + merged_suffix;
            dir.decr_local_depth(index);
        }

        self.buffer_pool_manager.flush_page(freed_page_id);
        self.buffer_pool_manager.delete_page(freed_page_id);

        if dir.can_shrink() {
            dir.decr_global_depth();
        }
        true
    }

    /// Reads the directory's current global depth.
    pub fn get_global_depth(&self) -> u32 {
        let _guard = self.table_latch.read();
        let (dir, _handle) = self.fetch_directory_page();
        let global_depth = dir.get_global_depth();
        self.buffer_pool_manager
            .unpin_page(self.directory_page_id, false);
        global_depth
    }

    /// Asserts the directory invariants.
    pub fn verify_integrity(&self) {
        let _guard = self.table_latch.read();
        let (dir, _handle) = self.fetch_directory_page();
        dir.verify_integrity();
        self.buffer_pool_manager
            .unpin_page(self.directory_page_id, false);
    }
}
