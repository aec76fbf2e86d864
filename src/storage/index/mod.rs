pub mod generic_key;
pub mod int_comparator;
pub mod key_codec;
