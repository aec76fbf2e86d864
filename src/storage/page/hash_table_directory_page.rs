use crate::common::config::{
    Lsn, PageId, DB_PAGE_SIZE, HTABLE_DIRECTORY_ARRAY_SIZE, HTABLE_DIRECTORY_MAX_DEPTH,
    INVALID_LSN, INVALID_PAGE_ID,
};
use log::{debug, warn};
use std::collections::HashMap;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = 12;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + HTABLE_DIRECTORY_ARRAY_SIZE;

/// Directory page for the extendible hash table.
///
/// On-disk layout:
///
/// ```text
/// [page_id: 4B] [lsn: 4B] [global_depth: 4B]
/// [local_depths: 512B] [bucket_page_ids: 2048B] [padding]
/// ```
///
/// The directory addresses `2^global_depth` slots; each slot records the
/// bucket page it routes to and the number of hash bits that bucket
/// distinguishes. Invariants maintained across every mutation:
///
/// 1. `local_depth[i] <= global_depth` for every addressable slot.
/// 2. Each distinct bucket page id appears exactly
///    `2^(global_depth - local_depth)` times.
/// 3. Slots pointing at the same bucket page agree on local depth.
pub struct HashTableDirectoryPage {
    page_id: PageId,
    lsn: Lsn,
    global_depth: u32,
    local_depths: [u8; HTABLE_DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; HTABLE_DIRECTORY_ARRAY_SIZE],
}

impl HashTableDirectoryPage {
    /// Creates an empty directory at depth zero.
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            lsn: INVALID_LSN,
            global_depth: 0,
            local_depths: [0; HTABLE_DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; HTABLE_DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Parses a directory from a raw page image.
    pub fn from_data(data: &[u8; DB_PAGE_SIZE]) -> Self {
        let mut dir = Self::new(INVALID_PAGE_ID);
        dir.page_id = PageId::from_le_bytes(data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].try_into().unwrap());
        dir.lsn = Lsn::from_le_bytes(data[LSN_OFFSET..LSN_OFFSET + 4].try_into().unwrap());
        dir.global_depth =
            u32::from_le_bytes(data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4].try_into().unwrap());
        dir.local_depths
            .copy_from_slice(&data[LOCAL_DEPTHS_OFFSET..BUCKET_PAGE_IDS_OFFSET]);
        for i in 0..HTABLE_DIRECTORY_ARRAY_SIZE {
            let off = BUCKET_PAGE_IDS_OFFSET + i * 4;
            dir.bucket_page_ids[i] = PageId::from_le_bytes(data[off..off + 4].try_into().unwrap());
        }
        dir
    }

    /// Serializes the directory into a raw page image.
    pub fn serialize(&self) -> Box<[u8; DB_PAGE_SIZE]> {
        let mut data = Box::new([0u8; DB_PAGE_SIZE]);
        data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].copy_from_slice(&self.page_id.to_le_bytes());
        data[LSN_OFFSET..LSN_OFFSET + 4].copy_from_slice(&self.lsn.to_le_bytes());
        data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&self.global_depth.to_le_bytes());
        data[LOCAL_DEPTHS_OFFSET..BUCKET_PAGE_IDS_OFFSET].copy_from_slice(&self.local_depths);
        for i in 0..HTABLE_DIRECTORY_ARRAY_SIZE {
            let off = BUCKET_PAGE_IDS_OFFSET + i * 4;
            data[off..off + 4].copy_from_slice(&self.bucket_page_ids[i].to_le_bytes());
        }
        data
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub fn get_lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    pub fn get_global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Returns a mask of `global_depth` low ones.
    pub fn get_global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Returns a mask of `local_depth(bucket_idx)` low ones.
    pub fn get_local_depth_mask(&self, bucket_idx: u32) -> u32 {
        (1u32 << self.get_local_depth(bucket_idx)) - 1
    }

    pub fn incr_global_depth(&mut self) {
        debug_assert!(self.global_depth < HTABLE_DIRECTORY_MAX_DEPTH);
        self.global_depth += 1;
    }

    /// Decrements the global depth. The directory never shrinks below
    /// depth one.
    pub fn decr_global_depth(&mut self) {
        if self.global_depth > 1 {
            self.global_depth -= 1;
        } else {
            warn!("refusing to shrink directory below global depth 1");
        }
    }

    pub fn get_bucket_page_id(&self, bucket_idx: u32) -> PageId {
        self.bucket_page_ids[bucket_idx as usize]
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, bucket_page_id: PageId) {
        self.bucket_page_ids[bucket_idx as usize] = bucket_page_id;
    }

    /// Returns the directory index whose low bits differ from
    /// `bucket_idx` only in the bucket's highest distinguished bit. A
    /// bucket merges with exactly this slot's bucket.
    pub fn get_split_image_index(&self, bucket_idx: u32) -> u32 {
        bucket_idx ^ self.get_local_high_bit(bucket_idx)
    }

    /// Returns the high bit of the bucket's local-depth mask.
    pub fn get_local_high_bit(&self, bucket_idx: u32) -> u32 {
        1u32 << (self.get_local_depth(bucket_idx) - 1)
    }

    /// Number of addressable directory slots.
    pub fn size(&self) -> u32 {
        1u32 << self.global_depth
    }

    /// True when halving the directory would strand no bucket, i.e. every
    /// local depth sits strictly below the global depth.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 1 {
            return false;
        }
        (0..self.size()).all(|i| self.get_local_depth(i) < self.global_depth)
    }

    pub fn get_local_depth(&self, bucket_idx: u32) -> u32 {
        self.local_depths[bucket_idx as usize] as u32
    }

    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u8) {
        self.local_depths[bucket_idx as usize] = local_depth;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: u32) {
        self.local_depths[bucket_idx as usize] += 1;
    }

    pub fn decr_local_depth(&mut self, bucket_idx: u32) {
        if self.local_depths[bucket_idx as usize] > 1 {
            self.local_depths[bucket_idx as usize] -= 1;
        }
    }

    /// Verifies the directory invariants, panicking on violation:
    ///
    /// 1. every local depth is at most the global depth;
    /// 2. each bucket page id has exactly `2^(GD - LD)` pointers;
    /// 3. slots sharing a bucket page id share a local depth.
    pub fn verify_integrity(&self) {
        let mut page_id_to_count: HashMap<PageId, u32> = HashMap::new();
        let mut page_id_to_ld: HashMap<PageId, u32> = HashMap::new();

        for curr_idx in 0..self.size() {
            let curr_page_id = self.get_bucket_page_id(curr_idx);
            let curr_ld = self.get_local_depth(curr_idx);
            assert!(
                curr_ld <= self.global_depth,
                "local depth {} exceeds global depth {} at slot {}",
                curr_ld,
                self.global_depth,
                curr_idx
            );

            *page_id_to_count.entry(curr_page_id).or_insert(0) += 1;

            if let Some(&old_ld) = page_id_to_ld.get(&curr_page_id) {
                if curr_ld != old_ld {
                    warn!(
                        "verify_integrity: local depth {} != {} for page {}",
                        curr_ld, old_ld, curr_page_id
                    );
                    self.print_directory();
                    panic!("local depth mismatch for page {}", curr_page_id);
                }
            } else {
                page_id_to_ld.insert(curr_page_id, curr_ld);
            }
        }

        for (curr_page_id, curr_count) in &page_id_to_count {
            let curr_ld = page_id_to_ld[curr_page_id];
            let required_count = 1u32 << (self.global_depth - curr_ld);
            if *curr_count != required_count {
                warn!(
                    "verify_integrity: count {} != required {} for page {}",
                    curr_count, required_count, curr_page_id
                );
                self.print_directory();
                panic!("pointer count mismatch for page {}", curr_page_id);
            }
        }
    }

    /// Logs the current directory routing table.
    pub fn print_directory(&self) {
        debug!("======== DIRECTORY (global_depth: {}) ========", self.global_depth);
        debug!("| bucket_idx | page_id | local_depth |");
        for idx in 0..self.size() {
            debug!(
                "| {} | {} | {} |",
                idx,
                self.get_bucket_page_id(idx),
                self.get_local_depth(idx)
            );
        }
        debug!("================ END DIRECTORY ================");
    }
}
