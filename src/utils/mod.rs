pub mod log;
pub mod mock;
pub mod rc4;
pub mod varint;
