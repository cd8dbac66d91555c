// Base and k-mer encodings
pub mod dna_2bit;
pub mod kmer;

pub use kmer::{MerCodec, MerIter, MAX_K};
