//! Bit-packed k-mer keys.
//!
//! A k-mer of length `k` is packed two bits per base into a `u64`, first base
//! in the most significant position. Numeric order of keys is therefore the
//! lexicographic order of the k-mers, which is what canonical folding and the
//! key-sorted merge rely on.

use super::dna_2bit::{base_to_2bit, complement, twobit_to_base};
use crate::error::{MerError, Result};

/// Largest supported k. Bit 63 of a key word is reserved by the counting table.
pub const MAX_K: usize = 31;

/// Encodes and canonicalises k-mers for one run. `k` is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerCodec {
    k: usize,
    canonical: bool,
    mask: u64,
    /// Shift placing a base in the most significant position of a key.
    high_shift: u32,
}

impl MerCodec {
    pub fn new(k: usize, canonical: bool) -> Result<Self> {
        if k == 0 || k > MAX_K {
            return Err(MerError::config(format!(
                "k-mer length must be between 1 and {}, got {}",
                MAX_K, k
            )));
        }
        Ok(Self {
            k,
            canonical,
            mask: (1u64 << (2 * k)) - 1,
            high_shift: 2 * (k as u32 - 1),
        })
    }

    /// Current k-mer length.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Restates the k-mer length. The length is set once for a run; any attempt
    /// to change it afterwards is rejected.
    pub fn set_k(&self, k: usize) -> Result<()> {
        if k != self.k {
            return Err(MerError::config(format!(
                "k-mer length is already set to {} and cannot be changed to {}",
                self.k, k
            )));
        }
        Ok(())
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// Width of a key in bits (2k).
    pub fn key_len_bits(&self) -> u32 {
        2 * self.k as u32
    }

    /// Number of bytes needed to store one key.
    pub fn key_bytes(&self) -> usize {
        (2 * self.k + 7) / 8
    }

    /// Encodes a window of exactly `k` ACGT bases.
    pub fn encode(&self, window: &[u8]) -> Result<u64> {
        let invalid = |detail: String| MerError::InvalidMer {
            mer: String::from_utf8_lossy(window).into_owned(),
            detail,
        };
        if window.len() != self.k {
            return Err(invalid(format!("expected {} bases, got {}", self.k, window.len())));
        }
        let mut key = 0u64;
        for &base in window {
            let code = base_to_2bit(base)
                .ok_or_else(|| invalid(format!("'{}' is not a DNA base", base as char)))?;
            key = (key << 2) | code as u64;
        }
        Ok(key)
    }

    /// Decodes a key back into its base string.
    pub fn decode(&self, key: u64) -> String {
        let mut bases = Vec::with_capacity(self.k);
        for i in (0..self.k).rev() {
            bases.push(twobit_to_base(((key >> (2 * i)) & 0b11) as u8));
        }
        // Only ACGT bytes are produced above
        String::from_utf8(bases).unwrap_or_default()
    }

    /// Reverse complement of a key.
    #[inline]
    pub fn reverse_complement(&self, key: u64) -> u64 {
        let mut x = !key;
        // Reverse the 2-bit groups: swap pairs, then nibbles, then bytes.
        x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
        x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
        x = x.swap_bytes();
        x >> (64 - 2 * self.k as u32)
    }

    /// Returns the smaller of the key and its reverse complement when canonical
    /// mode is active, the key itself otherwise.
    #[inline]
    pub fn canonicalize(&self, key: u64) -> u64 {
        if self.canonical {
            key.min(self.reverse_complement(key))
        } else {
            key
        }
    }

    /// Rolling iterator over every k-mer of `sequence`, already canonicalised.
    pub fn mers<'a>(&'a self, sequence: &'a [u8]) -> MerIter<'a> {
        MerIter {
            codec: self,
            sequence,
            pos: 0,
            filled: 0,
            forward: 0,
            reverse: 0,
        }
    }
}

/// Iterator over the k-mers of one sequence. A non-ACGT byte restarts the
/// window, so no k-mer spans an ambiguous base.
pub struct MerIter<'a> {
    codec: &'a MerCodec,
    sequence: &'a [u8],
    pos: usize,
    filled: usize,
    forward: u64,
    reverse: u64,
}

impl<'a> Iterator for MerIter<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        while self.pos < self.sequence.len() {
            let base = self.sequence[self.pos];
            self.pos += 1;
            match base_to_2bit(base) {
                Some(code) => {
                    self.forward = ((self.forward << 2) | code as u64) & self.codec.mask;
                    self.reverse =
                        (self.reverse >> 2) | ((complement(code) as u64) << self.codec.high_shift);
                    if self.filled + 1 < self.codec.k {
                        self.filled += 1;
                        continue;
                    }
                    self.filled = self.codec.k;
                    return Some(if self.codec.canonical {
                        self.forward.min(self.reverse)
                    } else {
                        self.forward
                    });
                }
                None => {
                    self.filled = 0;
                    self.forward = 0;
                    self.reverse = 0;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let codec = MerCodec::new(4, false).unwrap();
        let key = codec.encode(b"ACGT").unwrap();
        assert_eq!(key, 0b00_01_10_11);
        assert_eq!(codec.decode(key), "ACGT");
        assert_eq!(codec.encode(b"acgt").unwrap(), key);
        match codec.encode(b"ACNT") {
            Err(MerError::InvalidMer { mer, detail }) => {
                assert_eq!(mer, "ACNT");
                assert!(detail.contains('N'));
            }
            other => panic!("expected invalid k-mer, got {:?}", other),
        }
        assert!(matches!(codec.encode(b"ACG"), Err(MerError::InvalidMer { .. })));
    }

    #[test]
    fn test_k_bounds() {
        assert!(MerCodec::new(0, false).is_err());
        assert!(MerCodec::new(MAX_K + 1, false).is_err());
        let codec = MerCodec::new(MAX_K, true).unwrap();
        let all_t = vec![b'T'; MAX_K];
        assert_eq!(codec.decode(codec.encode(&all_t).unwrap()), "T".repeat(MAX_K));
    }

    #[test]
    fn test_set_k_only_once() {
        let codec = MerCodec::new(21, false).unwrap();
        assert!(codec.set_k(21).is_ok());
        match codec.set_k(25) {
            Err(MerError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_reverse_complement() {
        let codec = MerCodec::new(4, false).unwrap();
        let rc = |s: &str| codec.decode(codec.reverse_complement(codec.encode(s.as_bytes()).unwrap()));
        assert_eq!(rc("ACGT"), "ACGT");
        assert_eq!(rc("AAGT"), "ACTT");
        assert_eq!(rc("CCGT"), "ACGG");

        let codec = MerCodec::new(7, false).unwrap();
        let key = codec.encode(b"GATTACA").unwrap();
        assert_eq!(codec.decode(codec.reverse_complement(key)), "TGTAATC");
        assert_eq!(codec.reverse_complement(codec.reverse_complement(key)), key);
    }

    #[test]
    fn test_canonicalize() {
        let canonical = MerCodec::new(4, true).unwrap();
        let plain = MerCodec::new(4, false).unwrap();
        let key = canonical.encode(b"CCGT").unwrap();
        assert_eq!(canonical.decode(canonical.canonicalize(key)), "ACGG");
        assert_eq!(plain.canonicalize(key), key);
    }

    #[test]
    fn test_mers_rolling_window() {
        let codec = MerCodec::new(4, false).unwrap();
        let mers: Vec<String> = codec.mers(b"ACGTACGT").map(|k| codec.decode(k)).collect();
        assert_eq!(mers, vec!["ACGT", "CGTA", "GTAC", "TACG", "ACGT"]);
    }

    #[test]
    fn test_mers_reset_on_ambiguous_base() {
        let codec = MerCodec::new(3, false).unwrap();
        let mers: Vec<String> = codec.mers(b"ACGNTTGA").map(|k| codec.decode(k)).collect();
        assert_eq!(mers, vec!["ACG", "TTG", "TGA"]);
        assert_eq!(codec.mers(b"AC").count(), 0);
    }

    #[test]
    fn test_mers_canonical_matches_codec() {
        let codec = MerCodec::new(5, true).unwrap();
        let plain = MerCodec::new(5, false).unwrap();
        let seq = b"TTGACCGTAGGCATTAC";
        let rolled: Vec<u64> = codec.mers(seq).collect();
        let direct: Vec<u64> = seq
            .windows(5)
            .map(|w| codec.canonicalize(plain.encode(w).unwrap()))
            .collect();
        assert_eq!(rolled, direct);
    }
}
