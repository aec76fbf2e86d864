use crate::storage::index::key_codec::KeyValueCodec;
use std::marker::PhantomData;
use xxhash_rust::xxh3::xxh3_64;

/// Hash function over index keys, backed by xxh3 on the key's encoded
/// form so the hash matches what is stored in pages.
pub struct HashFunction<K> {
    _marker: PhantomData<K>,
}

impl<K> HashFunction<K> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K> Default for HashFunction<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> HashFunction<K>
where
    K: KeyValueCodec,
{
    /// Returns the 64-bit hash of the given key.
    pub fn get_hash(&self, key: &K) -> u64 {
        let mut buf = vec![0u8; K::ENCODED_LEN];
        key.serialize_into(&mut buf);
        xxh3_64(&buf)
    }
}
