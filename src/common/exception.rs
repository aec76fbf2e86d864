use thiserror::Error;

use crate::common::config::PageId;

/// Failures raised by the disk layer. The buffer pool treats these as
/// fatal: there is no partial-flush recovery story in the storage core.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("I/O failure on page {page_id}: {source}")]
    PageIo {
        page_id: PageId,
        #[source]
        source: std::io::Error,
    },
    #[error("log stream I/O failure: {0}")]
    LogIo(#[source] std::io::Error),
    #[error("failed to open database files: {0}")]
    Open(#[source] std::io::Error),
}

/// Failures raised by checked writes into a page buffer.
#[derive(Error, Debug)]
pub enum PageError {
    #[error("write of {len} bytes at offset {offset} exceeds the page size {page_size}")]
    InvalidOffset {
        offset: usize,
        len: usize,
        page_size: usize,
    },
}
