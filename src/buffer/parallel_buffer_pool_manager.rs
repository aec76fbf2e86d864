use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::buffer::buffer_pool_manager_instance::BufferPoolManagerInstance;
use crate::common::config::PageId;
use crate::recovery::log_manager::LogManager;
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::page::page::PageRef;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shards the page id space across a fixed array of buffer pool
/// instances. Page `p` belongs to instance `p % num_instances`, so
/// operations on distinct shards contend only on their own latches.
pub struct ParallelBufferPoolManager {
    instances: Vec<BufferPoolManagerInstance>,
    pool_size: usize,
    /// Where the next `new_page` round-robin search begins.
    start_index: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    /// Creates `num_instances` shards of `pool_size` frames each over a
    /// shared disk manager.
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        disk_manager: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let instances = (0..num_instances)
            .map(|i| {
                BufferPoolManagerInstance::with_sharding(
                    pool_size,
                    num_instances,
                    i,
                    Arc::clone(&disk_manager),
                    log_manager.clone(),
                )
            })
            .collect();

        Self {
            instances,
            pool_size,
            start_index: Mutex::new(0),
        }
    }

    /// Returns the instance responsible for the given page id.
    fn get_buffer_pool_manager(&self, page_id: PageId) -> &BufferPoolManagerInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }
}

impl BufferPoolManager for ParallelBufferPoolManager {
    /// Round-robin allocation: starting from a rotating index, try each
    /// instance once and take the first that has a frame available. The
    /// start index advances on every attempt so load spreads even when
    /// some instances are full.
    fn new_page(&self) -> Option<(PageId, PageRef)> {
        let mut start_index = self.start_index.lock();
        let mut result = None;
        let mut tried = 0;
        while result.is_none() && tried != self.instances.len() {
            result = self.instances[*start_index].new_page();
            *start_index = (*start_index + 1) % self.instances.len();
            tried += 1;
        }
        result
    }

    fn fetch_page(&self, page_id: PageId) -> Option<PageRef> {
        self.get_buffer_pool_manager(page_id).fetch_page(page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.get_buffer_pool_manager(page_id)
            .unpin_page(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> bool {
        self.get_buffer_pool_manager(page_id).flush_page(page_id)
    }

    fn delete_page(&self, page_id: PageId) -> bool {
        self.get_buffer_pool_manager(page_id).delete_page(page_id)
    }

    fn flush_all_pages(&self) {
        for instance in &self.instances {
            instance.flush_all_pages();
        }
    }

    fn get_pool_size(&self) -> usize {
        self.instances.len() * self.pool_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::disk_manager_memory::DiskManagerMemory;

    fn make_parallel(num_instances: usize, pool_size: usize) -> ParallelBufferPoolManager {
        let disk_manager = Arc::new(DiskManagerMemory::new());
        ParallelBufferPoolManager::new(num_instances, pool_size, disk_manager, None)
    }

    #[test]
    fn test_pool_size_is_aggregate() {
        let bpm = make_parallel(5, 3);
        assert_eq!(bpm.get_pool_size(), 15);
    }

    #[test]
    fn test_new_page_spreads_over_instances() {
        let bpm = make_parallel(4, 2);

        let mut residues = vec![];
        for _ in 0..4 {
            let (page_id, _) = bpm.new_page().unwrap();
            residues.push(page_id as usize % 4);
            assert!(bpm.unpin_page(page_id, false));
        }
        residues.sort_unstable();
        assert_eq!(residues, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_new_page_skips_full_instances() {
        let bpm = make_parallel(2, 1);

        // Fill both instances and keep the pages pinned.
        let (p0, _) = bpm.new_page().unwrap();
        let (p1, _) = bpm.new_page().unwrap();
        assert!(bpm.new_page().is_none());

        // Freeing one instance makes allocation succeed again, regardless
        // of where the rotating start index points.
        assert!(bpm.unpin_page(p0, false));
        assert!(bpm.new_page().is_some());
        let _ = p1;
    }

    #[test]
    fn test_operations_route_by_page_id() {
        let bpm = make_parallel(3, 2);

        let (page_id, page) = bpm.new_page().unwrap();
        page.write().get_data_mut()[0] = 9;
        assert!(bpm.unpin_page(page_id, true));
        assert!(bpm.flush_page(page_id));

        let fetched = bpm.fetch_page(page_id).unwrap();
        assert_eq!(fetched.read().get_data()[0], 9);
        assert!(bpm.unpin_page(page_id, false));
        assert!(bpm.delete_page(page_id));
    }
}
