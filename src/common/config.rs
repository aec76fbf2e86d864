/** Size of a data page in bytes. */
pub const DB_PAGE_SIZE: usize = 4096;

/** Number of frames in a buffer pool instance by default. */
pub const BUFFER_POOL_SIZE: usize = 10;

/** Maximum depth of the extendible hash directory. */
pub const HTABLE_DIRECTORY_MAX_DEPTH: u32 = 9;

/** Number of directory slots at maximum depth. */
pub const HTABLE_DIRECTORY_ARRAY_SIZE: usize = 1 << HTABLE_DIRECTORY_MAX_DEPTH;

pub const INVALID_PAGE_ID: PageId = -1; // invalid page id
pub const INVALID_TXN_ID: TxnId = u64::MAX; // invalid transaction id
pub const INVALID_LSN: Lsn = -1; // invalid log sequence number

pub type FrameId = usize; // frame id type
pub type PageId = i32; // page id type
pub type TxnId = u64; // transaction id type, smaller means older
pub type Lsn = i32; // log sequence number type
