use crate::common::config::{PageId, DB_PAGE_SIZE};
use crate::common::exception::DiskError;
use crate::storage::disk::disk_manager::DiskManager;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

/// `DiskManagerMemory` replicates the utility of the file-backed disk
/// manager in memory. It is primarily used for data structure tests where
/// persistence across processes is irrelevant.
pub struct DiskManagerMemory {
    pages: RwLock<HashMap<PageId, Box<[u8; DB_PAGE_SIZE]>>>,
    log: Mutex<Vec<u8>>,
    next_page_id: AtomicI32,
}

impl DiskManagerMemory {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            next_page_id: AtomicI32::new(0),
        }
    }

    /// Number of pages ever written.
    pub fn num_pages(&self) -> usize {
        self.pages.read().len()
    }
}

impl Default for DiskManagerMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for DiskManagerMemory {
    fn read_page(
        &self,
        page_id: PageId,
        page_data: &mut [u8; DB_PAGE_SIZE],
    ) -> Result<(), DiskError> {
        match self.pages.read().get(&page_id) {
            Some(stored) => page_data.copy_from_slice(&stored[..]),
            // Unwritten pages read back as zeroes, matching file semantics.
            None => page_data.fill(0),
        }
        Ok(())
    }

    fn write_page(
        &self,
        page_id: PageId,
        page_data: &[u8; DB_PAGE_SIZE],
    ) -> Result<(), DiskError> {
        self.pages.write().insert(page_id, Box::new(*page_data));
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    fn deallocate_page(&self, page_id: PageId) {
        self.pages.write().remove(&page_id);
    }

    fn write_log(&self, log_data: &[u8]) -> Result<(), DiskError> {
        self.log.lock().extend_from_slice(log_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dm = DiskManagerMemory::new();
        let mut data = [0u8; DB_PAGE_SIZE];
        data[0] = 42;
        dm.write_page(7, &data).unwrap();

        let mut buf = [0u8; DB_PAGE_SIZE];
        dm.read_page(7, &mut buf).unwrap();
        assert_eq!(buf[0], 42);

        // Unwritten page reads back zeroed.
        dm.read_page(8, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
