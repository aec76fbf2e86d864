use crate::common::config::DB_PAGE_SIZE;
use crate::storage::index::generic_key::Comparator;
use crate::storage::index::key_codec::KeyValueCodec;
use log::debug;
use std::marker::PhantomData;

/// Number of key/value slots a bucket page can hold for a given pair
/// width. Each slot costs one occupied bit, one readable bit and the
/// encoded pair, so `N` must satisfy `2 * ceil(N/8) + N * pair_size <= PAGE`.
pub fn bucket_array_size(pair_size: usize) -> usize {
    (4 * DB_PAGE_SIZE) / (4 * pair_size + 1)
}

/// Bucket page for the extendible hash table.
///
/// Layout inside the 4096-byte page:
///
/// ```text
/// [occupied bitmap: ceil(N/8)B] [readable bitmap: ceil(N/8)B] [array: N pairs]
/// ```
///
/// `occupied` records that a slot has held an entry at some point in the
/// page's life and is never cleared; `readable` tracks live entries.
pub struct HashTableBucketPage<K, V, C> {
    data: Box<[u8; DB_PAGE_SIZE]>,
    _marker: PhantomData<(K, V, C)>,
}

impl<K, V, C> HashTableBucketPage<K, V, C>
where
    K: KeyValueCodec,
    V: KeyValueCodec + PartialEq,
    C: Comparator<K>,
{
    /// Creates an empty bucket page.
    pub fn new() -> Self {
        Self {
            data: Box::new([0; DB_PAGE_SIZE]),
            _marker: PhantomData,
        }
    }

    /// Builds a typed view from a raw page image.
    pub fn from_data(data: &[u8; DB_PAGE_SIZE]) -> Self {
        Self {
            data: Box::new(*data),
            _marker: PhantomData,
        }
    }

    /// Returns the raw page image for writing back through the pool.
    pub fn data(&self) -> &[u8; DB_PAGE_SIZE] {
        &self.data
    }

    /// Capacity of this bucket in entries.
    pub fn array_size() -> usize {
        bucket_array_size(K::ENCODED_LEN + V::ENCODED_LEN)
    }

    fn bitmap_len() -> usize {
        (Self::array_size() + 7) / 8
    }

    fn pair_offset(bucket_idx: usize) -> usize {
        2 * Self::bitmap_len() + bucket_idx * (K::ENCODED_LEN + V::ENCODED_LEN)
    }

    fn bit(data: &[u8], base: usize, bucket_idx: usize) -> bool {
        data[base + bucket_idx / 8] & (1 << (bucket_idx % 8)) != 0
    }

    fn set_bit(data: &mut [u8], base: usize, bucket_idx: usize) {
        data[base + bucket_idx / 8] |= 1 << (bucket_idx % 8);
    }

    fn clear_bit(data: &mut [u8], base: usize, bucket_idx: usize) {
        data[base + bucket_idx / 8] &= !(1 << (bucket_idx % 8));
    }

    /// Returns whether the slot has ever held an entry.
    pub fn is_occupied(&self, bucket_idx: usize) -> bool {
        Self::bit(&self.data[..], 0, bucket_idx)
    }

    fn set_occupied(&mut self, bucket_idx: usize) {
        Self::set_bit(&mut self.data[..], 0, bucket_idx);
    }

    /// Returns whether the slot holds a live entry.
    pub fn is_readable(&self, bucket_idx: usize) -> bool {
        Self::bit(&self.data[..], Self::bitmap_len(), bucket_idx)
    }

    fn set_readable(&mut self, bucket_idx: usize) {
        Self::set_bit(&mut self.data[..], Self::bitmap_len(), bucket_idx);
    }

    /// Returns the key stored at the given slot.
    pub fn key_at(&self, bucket_idx: usize) -> K {
        let off = Self::pair_offset(bucket_idx);
        K::deserialize_from(&self.data[off..])
    }

    /// Returns the value stored at the given slot.
    pub fn value_at(&self, bucket_idx: usize) -> V {
        let off = Self::pair_offset(bucket_idx) + K::ENCODED_LEN;
        V::deserialize_from(&self.data[off..])
    }

    /// Clears the readable bit at the given slot. The occupied bit stays
    /// set for the life of the page.
    pub fn remove_at(&mut self, bucket_idx: usize) {
        let bitmap_len = Self::bitmap_len();
        Self::clear_bit(&mut self.data[..], bitmap_len, bucket_idx);
    }

    /// Appends every live value whose key compares equal to `key` onto
    /// `result`. Returns whether at least one match was found.
    pub fn get_value(&self, key: &K, cmp: &C, result: &mut Vec<V>) -> bool {
        let mut found = false;
        for i in 0..Self::array_size() {
            if self.is_readable(i) && cmp.compare(&self.key_at(i), key).is_eq() {
                result.push(self.value_at(i));
                found = true;
            }
        }
        found
    }

    /// Attempts to insert a key/value pair into the bucket.
    ///
    /// Fails when the bucket is full or when the identical pair is already
    /// present; otherwise the pair lands in the lowest free slot.
    pub fn insert(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        if self.is_full() {
            return false;
        }
        let mut available_slot = Self::array_size();
        for i in 0..Self::array_size() {
            if !self.is_readable(i) {
                if available_slot == Self::array_size() {
                    available_slot = i;
                }
            } else if cmp.compare(&self.key_at(i), key).is_eq() && self.value_at(i) == *value {
                return false;
            }
        }
        self.set_occupied(available_slot);
        self.set_readable(available_slot);
        let off = Self::pair_offset(available_slot);
        key.serialize_into(&mut self.data[off..off + K::ENCODED_LEN]);
        value.serialize_into(
            &mut self.data[off + K::ENCODED_LEN..off + K::ENCODED_LEN + V::ENCODED_LEN],
        );
        true
    }

    /// Removes every live entry matching the exact key/value pair.
    /// Returns whether any removal occurred.
    pub fn remove(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        let mut found = false;
        for i in 0..Self::array_size() {
            if self.is_readable(i)
                && cmp.compare(&self.key_at(i), key).is_eq()
                && self.value_at(i) == *value
            {
                self.remove_at(i);
                found = true;
            }
        }
        found
    }

    /// Number of live entries in the bucket.
    pub fn num_readable(&self) -> usize {
        let bitmap_len = Self::bitmap_len();
        self.data[bitmap_len..2 * bitmap_len]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == Self::array_size()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Logs the bucket's occupancy for debugging.
    pub fn print_bucket(&self) {
        let mut size = 0;
        let mut taken = 0;
        for i in 0..Self::array_size() {
            if !self.is_occupied(i) {
                break;
            }
            size += 1;
            if self.is_readable(i) {
                taken += 1;
            }
        }
        debug!(
            "Bucket Capacity: {}, Size: {}, Taken: {}, Free: {}",
            Self::array_size(),
            size,
            taken,
            size - taken
        );
    }
}

impl<K, V, C> Default for HashTableBucketPage<K, V, C>
where
    K: KeyValueCodec,
    V: KeyValueCodec + PartialEq,
    C: Comparator<K>,
{
    fn default() -> Self {
        Self::new()
    }
}
