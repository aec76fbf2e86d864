use crate::common::config::{PageId, DB_PAGE_SIZE};
use crate::common::exception::DiskError;
use log::{trace, warn};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

/// The `DiskManager` trait defines the synchronous page I/O operations the
/// buffer pool is built on. Implementers must provide page-granular reads
/// and writes plus page id allocation bookkeeping.
pub trait DiskManager: Send + Sync {
    /// Reads the contents of the specified page into the given buffer.
    fn read_page(&self, page_id: PageId, page_data: &mut [u8; DB_PAGE_SIZE])
        -> Result<(), DiskError>;

    /// Writes the given buffer to the specified page on disk.
    fn write_page(&self, page_id: PageId, page_data: &[u8; DB_PAGE_SIZE])
        -> Result<(), DiskError>;

    /// Allocates a fresh page id from the disk manager's own counter.
    ///
    /// Buffer pool instances normally run their own strided allocator and
    /// only fall back to this for standalone page allocation.
    fn allocate_page(&self) -> PageId;

    /// Returns a page id to the disk manager. Space is not reclaimed.
    fn deallocate_page(&self, page_id: PageId);

    /// Appends raw log data to the log stream and flushes it.
    fn write_log(&self, log_data: &[u8]) -> Result<(), DiskError>;
}

/// The `FileDiskManager` performs page I/O against a database file and
/// keeps a side log file for the log manager. All operations are
/// synchronous; a short read past EOF zero-fills the remainder of the
/// buffer so freshly allocated pages read back as zeroes.
pub struct FileDiskManager {
    file_name: String,
    db_io: Mutex<File>,
    log_io: Mutex<File>,
    next_page_id: AtomicI32,
    num_flushes: AtomicI32,
    num_writes: AtomicI32,
}

impl FileDiskManager {
    /// Opens (creating if needed) the database file and its log file.
    pub fn new(db_file: impl AsRef<Path>, log_file: impl AsRef<Path>) -> Result<Self, DiskError> {
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_file.as_ref())
            .map_err(DiskError::Open)?;
        let log_io = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(log_file.as_ref())
            .map_err(DiskError::Open)?;

        Ok(Self {
            file_name: db_file.as_ref().display().to_string(),
            db_io: Mutex::new(db_io),
            log_io: Mutex::new(log_io),
            next_page_id: AtomicI32::new(0),
            num_flushes: AtomicI32::new(0),
            num_writes: AtomicI32::new(0),
        })
    }

    /// Flushes buffered data before shutdown.
    pub fn shut_down(&self) -> std::io::Result<()> {
        self.db_io.lock().sync_all()?;
        self.log_io.lock().sync_all()
    }

    /// Returns the number of log flushes performed so far.
    pub fn get_num_flushes(&self) -> i32 {
        self.num_flushes.load(Ordering::SeqCst)
    }

    /// Returns the number of page writes performed so far.
    pub fn get_num_writes(&self) -> i32 {
        self.num_writes.load(Ordering::SeqCst)
    }

    /// Returns the size of the backing database file in bytes.
    pub fn get_file_size(&self) -> std::io::Result<u64> {
        Ok(Path::new(&self.file_name).metadata()?.len())
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(
        &self,
        page_id: PageId,
        page_data: &mut [u8; DB_PAGE_SIZE],
    ) -> Result<(), DiskError> {
        let offset = page_id as u64 * DB_PAGE_SIZE as u64;
        trace!("Reading page {} at offset {}", page_id, offset);

        let wrap = |source| DiskError::PageIo { page_id, source };
        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset)).map_err(wrap)?;

        let mut read = 0;
        while read < DB_PAGE_SIZE {
            let n = db_io.read(&mut page_data[read..]).map_err(wrap)?;
            if n == 0 {
                // Reading past the end of the file returns zeroed bytes.
                page_data[read..].fill(0);
                break;
            }
            read += n;
        }
        Ok(())
    }

    fn write_page(
        &self,
        page_id: PageId,
        page_data: &[u8; DB_PAGE_SIZE],
    ) -> Result<(), DiskError> {
        let offset = page_id as u64 * DB_PAGE_SIZE as u64;
        trace!("Writing page {} at offset {}", page_id, offset);

        let wrap = |source| DiskError::PageIo { page_id, source };
        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset)).map_err(wrap)?;
        db_io.write_all(page_data).map_err(wrap)?;
        db_io.flush().map_err(wrap)?;
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    fn deallocate_page(&self, page_id: PageId) {
        trace!("Deallocating page {}", page_id);
    }

    fn write_log(&self, log_data: &[u8]) -> Result<(), DiskError> {
        let mut log_io = self.log_io.lock();
        log_io.write_all(log_data).map_err(DiskError::LogIo)?;
        log_io.sync_data().map_err(DiskError::LogIo)?;
        self.num_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FileDiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.shut_down() {
            warn!("Failed to flush {} on shutdown: {}", self.file_name, e);
        }
    }
}
