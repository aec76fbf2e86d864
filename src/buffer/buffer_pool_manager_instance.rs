use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::buffer::lru_replacer::LruReplacer;
use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID};
use crate::recovery::log_manager::LogManager;
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::page::page::{Page, PageRef};
use log::trace;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One shard of the buffer pool: a fixed set of frames, a page table
/// mapping resident page ids to frames, a free list, and an LRU replacer
/// choosing victims among unpinned frames.
///
/// A single latch serialises all public operations, covering the page
/// table, the free list, the replacer and every frame's metadata. Disk
/// I/O happens while the latch is held; the latch only covers this shard,
/// so other shards proceed concurrently.
pub struct BufferPoolManagerInstance {
    pool_size: usize,
    /// How many instances participate in the sharded pool.
    num_instances: usize,
    /// Index of this instance within the sharded pool.
    instance_index: usize,
    /// Frames; each owns one page buffer for the pool's lifetime.
    pages: Vec<PageRef>,
    disk_manager: Arc<dyn DiskManager>,
    #[allow(dead_code)]
    log_manager: Option<Arc<LogManager>>,
    latch: Mutex<PoolState>,
}

struct PoolState {
    /// Resident pages: `page_id -> frame_id`.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page yet, served FIFO before the replacer.
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    /// Next page id this instance will hand out; advances by
    /// `num_instances` so allocations satisfy
    /// `page_id % num_instances == instance_index`.
    next_page_id: PageId,
}

impl BufferPoolManagerInstance {
    /// Creates a standalone instance owning the whole page id space.
    pub fn new(
        pool_size: usize,
        disk_manager: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self::with_sharding(pool_size, 1, 0, disk_manager, log_manager)
    }

    /// Creates an instance responsible for the page ids congruent to
    /// `instance_index` modulo `num_instances`.
    pub fn with_sharding(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let pages = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(Page::new())))
            .collect();
        let state = PoolState {
            page_table: HashMap::with_capacity(pool_size),
            free_list: (0..pool_size).collect(),
            replacer: LruReplacer::new(pool_size),
            next_page_id: instance_index as PageId,
        };

        Self {
            pool_size,
            num_instances,
            instance_index,
            pages,
            disk_manager,
            log_manager,
            latch: Mutex::new(state),
        }
    }

    pub fn get_instance_index(&self) -> usize {
        self.instance_index
    }

    /// Hands out the next page id of this shard.
    fn allocate_page(state: &mut PoolState, num_instances: usize) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += num_instances as PageId;
        page_id
    }

    /// Picks a reusable frame: the free list first, then the replacer.
    fn find_victim(state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }
        state.replacer.victim()
    }

    /// Writes the frame's current page back if dirty and unmaps it.
    /// Must run under the latch.
    fn evict_frame(&self, state: &mut PoolState, frame_id: FrameId) {
        let mut page = self.pages[frame_id].write();
        if page.is_dirty() {
            self.disk_manager
                .write_page(page.get_page_id(), page.get_data())
                .expect("disk write during eviction failed");
            page.set_dirty(false);
        }
        state.page_table.remove(&page.get_page_id());
    }
}

impl BufferPoolManager for BufferPoolManagerInstance {
    fn new_page(&self) -> Option<(PageId, PageRef)> {
        let mut state = self.latch.lock();
        let frame_id = Self::find_victim(&mut state)?;
        self.evict_frame(&mut state, frame_id);

        let page_id = Self::allocate_page(&mut state, self.num_instances);
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "allocated page id must shard back to this instance"
        );

        {
            let mut page = self.pages[frame_id].write();
            page.reset_memory();
            page.set_page_id(page_id);
            page.set_pin_count(1);
            page.set_dirty(false);
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        trace!(
            "instance {} created page {} in frame {}",
            self.instance_index,
            page_id,
            frame_id
        );

        Some((page_id, Arc::clone(&self.pages[frame_id])))
    }

    fn fetch_page(&self, page_id: PageId) -> Option<PageRef> {
        let mut state = self.latch.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.pages[frame_id].write().incr_pin_count();
            state.replacer.pin(frame_id);
            return Some(Arc::clone(&self.pages[frame_id]));
        }

        let frame_id = Self::find_victim(&mut state)?;
        self.evict_frame(&mut state, frame_id);

        {
            let mut page = self.pages[frame_id].write();
            self.disk_manager
                .read_page(page_id, page.get_data_mut())
                .expect("disk read failed");
            page.set_page_id(page_id);
            page.set_pin_count(1);
            page.set_dirty(false);
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        trace!(
            "instance {} fetched page {} into frame {}",
            self.instance_index,
            page_id,
            frame_id
        );

        Some(Arc::clone(&self.pages[frame_id]))
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.latch.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let mut page = self.pages[frame_id].write();
        if page.get_pin_count() == 0 {
            return false;
        }
        page.decr_pin_count();
        let dirty = page.is_dirty() || is_dirty;
        page.set_dirty(dirty);

        if page.get_pin_count() == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    fn flush_page(&self, page_id: PageId) -> bool {
        let state = self.latch.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let mut page = self.pages[frame_id].write();
        if page.is_dirty() {
            self.disk_manager
                .write_page(page_id, page.get_data())
                .expect("disk write during flush failed");
            page.set_dirty(false);
        }
        true
    }

    fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.latch.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            // Deleting a page that is not resident is a trivial success.
            return true;
        };

        {
            let mut page = self.pages[frame_id].write();
            if page.get_pin_count() != 0 {
                return false;
            }
            if page.is_dirty() {
                self.disk_manager
                    .write_page(page_id, page.get_data())
                    .expect("disk write during delete failed");
            }
            page.reset_memory();
            page.set_page_id(INVALID_PAGE_ID);
            page.set_pin_count(0);
            page.set_dirty(false);
        }

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        true
    }

    fn flush_all_pages(&self) {
        let state = self.latch.lock();
        for (&page_id, &frame_id) in state.page_table.iter() {
            let mut page = self.pages[frame_id].write();
            if page.is_dirty() {
                self.disk_manager
                    .write_page(page_id, page.get_data())
                    .expect("disk write during flush failed");
                page.set_dirty(false);
            }
        }
    }

    fn get_pool_size(&self) -> usize {
        self.pool_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::disk_manager_memory::DiskManagerMemory;

    fn make_bpm(pool_size: usize) -> BufferPoolManagerInstance {
        let disk_manager = Arc::new(DiskManagerMemory::new());
        BufferPoolManagerInstance::new(pool_size, disk_manager, None)
    }

    #[test]
    fn test_new_page_until_full() {
        let bpm = make_bpm(3);

        // Scenario: the buffer pool is empty. We should be able to create
        // new pages until we fill it up.
        for i in 0..3 {
            let (page_id, _page) = bpm.new_page().unwrap();
            assert_eq!(page_id, i);
        }

        // Scenario: once the buffer pool is full, we should not be able to
        // create any new pages.
        assert!(bpm.new_page().is_none());

        // Scenario: after unpinning a page we can create one more.
        assert!(bpm.unpin_page(0, false));
        let (page_id, _page) = bpm.new_page().unwrap();
        assert_eq!(page_id, 3);
    }

    #[test]
    fn test_lru_eviction_order() {
        let bpm = make_bpm(2);

        let (p0, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(p0, false));
        let (p1, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(p1, false));

        // p0 was unpinned first, so creating a third page must evict it.
        let (p2, _) = bpm.new_page().unwrap();
        assert_eq!(p2, 2);
        let fetched = bpm.fetch_page(p0);
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().read().get_page_id(), p0);
        // p1 was the only evictable frame left for the refetch of p0.
        assert!(bpm.fetch_page(p1).is_none());
    }

    #[test]
    fn test_unpin_semantics() {
        let bpm = make_bpm(1);
        let (p0, _) = bpm.new_page().unwrap();

        assert!(!bpm.unpin_page(99, false));
        assert!(bpm.unpin_page(p0, false));
        // Second unpin without a pin fails.
        assert!(!bpm.unpin_page(p0, false));
    }

    #[test]
    fn test_dirty_flag_is_sticky() {
        let bpm = make_bpm(2);
        let (p0, page) = bpm.new_page().unwrap();
        page.write().get_data_mut()[0] = 7;

        // Pin twice, unpin dirty then clean; the dirty bit must survive
        // the clean unpin.
        assert!(bpm.fetch_page(p0).is_some());
        assert!(bpm.unpin_page(p0, true));
        assert!(bpm.unpin_page(p0, false));

        // Eviction must write the page back.
        let (p1, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(p1, false));
        let (p2, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(p2, false));
        let refetched = bpm.fetch_page(p0).unwrap();
        assert_eq!(refetched.read().get_data()[0], 7);
    }

    #[test]
    fn test_delete_page() {
        let bpm = make_bpm(2);
        let (p0, _) = bpm.new_page().unwrap();

        // Pinned pages cannot be deleted.
        assert!(!bpm.delete_page(p0));
        assert!(bpm.unpin_page(p0, false));
        assert!(bpm.delete_page(p0));

        // Deleting an absent page reports success.
        assert!(bpm.delete_page(p0));

        // The freed frame is reusable.
        assert!(bpm.new_page().is_some());
        assert!(bpm.new_page().is_some());
    }

    #[test]
    fn test_allocation_respects_stride() {
        let disk_manager = Arc::new(DiskManagerMemory::new());
        let bpm =
            BufferPoolManagerInstance::with_sharding(5, 3, 1, Arc::clone(&disk_manager) as Arc<dyn DiskManager>, None);
        for _ in 0..3 {
            let (page_id, _) = bpm.new_page().unwrap();
            assert_eq!(page_id as usize % 3, 1);
            assert!(bpm.unpin_page(page_id, false));
        }
    }

    #[test]
    fn test_flush_page() {
        let disk_manager = Arc::new(DiskManagerMemory::new());
        let bpm = BufferPoolManagerInstance::new(2, Arc::clone(&disk_manager) as Arc<dyn DiskManager>, None);

        let (p0, page) = bpm.new_page().unwrap();
        page.write().get_data_mut()[0] = 42;
        assert!(bpm.unpin_page(p0, true));
        assert!(bpm.flush_page(p0));
        assert!(!bpm.flush_page(999));

        let mut buf = [0u8; crate::common::config::DB_PAGE_SIZE];
        disk_manager.read_page(p0, &mut buf).unwrap();
        assert_eq!(buf[0], 42);
    }
}
