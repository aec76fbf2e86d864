use crate::common::config::{Lsn, INVALID_LSN};
use crate::common::exception::DiskError;
use crate::storage::disk::disk_manager::DiskManager;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Assigns log sequence numbers and buffers log records until they are
/// flushed through the disk manager. Callers drive every write; nothing
/// in the storage core appends records on its own initiative.
pub struct LogManager {
    disk_manager: Arc<dyn DiskManager>,
    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    log_buffer: Mutex<Vec<u8>>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<dyn DiskManager>) -> Self {
        Self {
            disk_manager,
            next_lsn: AtomicI32::new(0),
            persistent_lsn: AtomicI32::new(INVALID_LSN),
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Appends a serialized record to the log buffer and returns the LSN
    /// assigned to it.
    pub fn append_record(&self, record: &[u8]) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        self.log_buffer.lock().extend_from_slice(record);
        lsn
    }

    /// Flushes the buffered records and advances the persistent LSN to
    /// cover everything assigned so far.
    pub fn flush(&self) -> Result<(), DiskError> {
        let mut buffer = self.log_buffer.lock();
        if !buffer.is_empty() {
            self.disk_manager.write_log(&buffer)?;
            buffer.clear();
        }
        self.persistent_lsn
            .store(self.next_lsn.load(Ordering::SeqCst) - 1, Ordering::SeqCst);
        Ok(())
    }

    /// LSN of the last record known to be on disk.
    pub fn get_persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    pub fn get_next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }
}
