use crate::common::rid::RID;

/// Fixed-width little-endian encoding for keys and values that live
/// inside index pages. The encoded length must be a compile-time constant
/// so page layouts can size their slot arrays from it.
pub trait KeyValueCodec: Sized {
    /// Number of bytes this type occupies inside a page.
    const ENCODED_LEN: usize;

    /// Writes the encoded form into `buf[..Self::ENCODED_LEN]`.
    fn serialize_into(&self, buf: &mut [u8]);

    /// Reads an instance back from `buf[..Self::ENCODED_LEN]`.
    fn deserialize_from(buf: &[u8]) -> Self;
}

impl KeyValueCodec for i32 {
    const ENCODED_LEN: usize = 4;

    fn serialize_into(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn deserialize_from(buf: &[u8]) -> Self {
        i32::from_le_bytes(buf[..4].try_into().unwrap())
    }
}

impl KeyValueCodec for RID {
    const ENCODED_LEN: usize = RID::ENCODED_LEN;

    fn serialize_into(&self, buf: &mut [u8]) {
        buf[..Self::ENCODED_LEN].copy_from_slice(&self.to_bytes_le());
    }

    fn deserialize_from(buf: &[u8]) -> Self {
        RID::deserialize(buf)
    }
}
