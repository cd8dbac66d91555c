// Sequence file input
pub mod reader;

pub use reader::{read_sequences, SequenceReader};
