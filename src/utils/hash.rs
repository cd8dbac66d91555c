//! Hashing of bit-packed k-mer keys.
//!
//! The counting table uses a fixed 64-bit finaliser so its probe sequence is
//! a pure function of the key. The Bloom filter uses random binary matrices
//! over GF(2), generated once and stored in the filter file header so a filter
//! can be reloaded with the exact same hash functions.

use serde::{Deserialize, Serialize};

/// MurmurHash3 64-bit finaliser. Bijective on `u64`.
#[inline]
pub fn fmix64(mut key: u64) -> u64 {
    key ^= key >> 33;
    key = key.wrapping_mul(0xff51_afd7_ed55_8ccd);
    key ^= key >> 33;
    key = key.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    key ^= key >> 33;
    key
}

/// A `rows x cols` binary matrix stored column-wise: column `j` is the
/// `rows`-bit image of input bit `j`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMatrix {
    pub rows: u32,
    pub cols: u32,
    pub columns: Vec<u64>,
}

impl BinaryMatrix {
    /// Random matrix with `rows <= 64` output bits and `cols <= 64` input bits.
    pub fn random(rows: u32, cols: u32, rng: &mut fastrand::Rng) -> Self {
        let row_mask = if rows >= 64 { u64::MAX } else { (1u64 << rows) - 1 };
        let columns = (0..cols).map(|_| rng.u64(..) & row_mask).collect();
        Self { rows, cols, columns }
    }

    /// Matrix-vector product over GF(2).
    #[inline]
    pub fn times(&self, key: u64) -> u64 {
        let mut acc = 0u64;
        let mut bits = key;
        let mut j = 0usize;
        while bits != 0 && j < self.columns.len() {
            if bits & 1 == 1 {
                acc ^= self.columns[j];
            }
            bits >>= 1;
            j += 1;
        }
        acc
    }

    /// A matrix is usable when it has one column per input bit.
    pub fn is_well_formed(&self) -> bool {
        self.rows > 0 && self.rows <= 64 && self.cols <= 64 && self.columns.len() == self.cols as usize
    }
}

/// Two independent hash functions over keys of a fixed bit width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPair {
    pub first: BinaryMatrix,
    pub second: BinaryMatrix,
}

impl HashPair {
    pub fn new(first: BinaryMatrix, second: BinaryMatrix) -> Self {
        Self { first, second }
    }

    /// Fresh random pair for keys of `key_len_bits` bits.
    pub fn random(key_len_bits: u32, rng: &mut fastrand::Rng) -> Self {
        Self {
            first: BinaryMatrix::random(64, key_len_bits, rng),
            second: BinaryMatrix::random(64, key_len_bits, rng),
        }
    }

    #[inline]
    pub fn hash(&self, key: u64) -> (u64, u64) {
        (self.first.times(key), self.second.times(key))
    }
}
