use crate::common::config::PageId;
use crate::storage::page::page::PageRef;

/// Common interface of a buffer pool: a single instance and the parallel
/// manager that shards page ids across instances both present it, so
/// index structures can run against either.
///
/// Every successful `new_page`/`fetch_page` hands back a pinned page; the
/// caller owes exactly one `unpin_page` per handle it received.
pub trait BufferPoolManager: Send + Sync {
    /// Allocates a fresh page and pins it in a frame. Returns `None` when
    /// every frame is pinned and the free list is empty.
    fn new_page(&self) -> Option<(PageId, PageRef)>;

    /// Fetches the requested page, reading it from disk on a miss.
    /// Returns `None` when no frame can be freed for it.
    fn fetch_page(&self, page_id: PageId) -> Option<PageRef>;

    /// Drops one pin on the page, folding `is_dirty` into the frame's
    /// dirty flag. Returns `false` if the page is unmapped or unpinned.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool;

    /// Writes the page back to disk if dirty. Returns `false` only when
    /// the page is not resident.
    fn flush_page(&self, page_id: PageId) -> bool;

    /// Removes the page from the pool and deallocates its id. Returns
    /// `false` while the page is pinned; deleting a non-resident page
    /// succeeds trivially.
    fn delete_page(&self, page_id: PageId) -> bool;

    /// Flushes every dirty resident page.
    fn flush_all_pages(&self);

    /// Total number of frames managed.
    fn get_pool_size(&self) -> usize;
}
