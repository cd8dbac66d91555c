// File header and record codecs
pub mod header;
pub mod records;

pub use header::{FileHeader, Format};
pub use records::{max_count_for_bytes, read_all, RecordReader, RecordWriter};
