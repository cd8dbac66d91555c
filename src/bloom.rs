//! Counting Bloom filter over k-mer keys.
//!
//! Each key addresses `nb_hashes` saturating 8-bit counters at positions
//! `(h1 + i * h2) mod size`, where `h1` and `h2` come from a pair of random
//! GF(2) hash matrices. The matrices are written to the file header so a
//! filter built by one process can be loaded and queried by another.
//!
//! The estimate returned by [`BloomCounter::check`] is the minimum of the
//! addressed counters. Collisions can only raise it, so it never undercounts
//! the observations of a key (up to saturation at 255).

use crate::encode::MerCodec;
use crate::error::{MerError, Result};
use crate::io::{FileHeader, Format};
use crate::utils::hash::HashPair;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

pub const DEFAULT_NB_HASHES: u32 = 2;

/// Default acceptance threshold: a k-mer must have been seen more than once.
pub const DEFAULT_THRESHOLD: u8 = 1;

/// (ln 2)^2
const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

/// Number of counters for `expected_items` keys at false-positive rate `fpr`:
/// `m = -n ln(fpr) / (ln 2)^2`.
pub fn optimal_size(expected_items: u64, fpr: f64) -> u64 {
    let n = expected_items.max(1) as f64;
    let fpr = fpr.clamp(f64::MIN_POSITIVE, 0.999);
    ((-n * fpr.ln()) / LN2_SQUARED).ceil().max(1.0) as u64
}

/// Number of hash positions for `size` counters and `expected_items` keys:
/// `k = (m / n) ln 2`, at least 1.
pub fn optimal_hashes(size: u64, expected_items: u64) -> u32 {
    let n = expected_items.max(1) as f64;
    (((size as f64 / n) * std::f64::consts::LN_2).round() as u32).max(1)
}

#[derive(Debug)]
pub struct BloomCounter {
    counters: Box<[AtomicU8]>,
    nb_hashes: u32,
    hashes: HashPair,
    key_len: u32,
}

impl BloomCounter {
    /// Empty filter with fresh random hash matrices.
    pub fn new(size: u64, nb_hashes: u32, key_len_bits: u32, rng: &mut fastrand::Rng) -> Result<Self> {
        Self::with_hashes(size, nb_hashes, HashPair::random(key_len_bits, rng))
    }

    /// Empty filter using the given hash matrices.
    pub fn with_hashes(size: u64, nb_hashes: u32, hashes: HashPair) -> Result<Self> {
        if size == 0 {
            return Err(MerError::config("Bloom counter size must be positive"));
        }
        if nb_hashes == 0 {
            return Err(MerError::config("Bloom counter needs at least one hash"));
        }
        let key_len = hashes.first.cols;
        let counters = (0..size).map(|_| AtomicU8::new(0)).collect();
        Ok(Self {
            counters,
            nb_hashes,
            hashes,
            key_len,
        })
    }

    /// Filter sized for `expected_items` keys at false-positive rate `fpr`.
    pub fn for_capacity(
        expected_items: u64,
        fpr: f64,
        key_len_bits: u32,
        rng: &mut fastrand::Rng,
    ) -> Result<Self> {
        let size = optimal_size(expected_items, fpr);
        let nb_hashes = optimal_hashes(size, expected_items);
        Self::new(size, nb_hashes, key_len_bits, rng)
    }

    pub fn size(&self) -> u64 {
        self.counters.len() as u64
    }

    pub fn nb_hashes(&self) -> u32 {
        self.nb_hashes
    }

    pub fn hashes(&self) -> &HashPair {
        &self.hashes
    }

    /// Key width the hash matrices were built for, in bits.
    pub fn key_len_bits(&self) -> u32 {
        self.key_len
    }

    #[inline]
    fn positions(&self, key: u64) -> impl Iterator<Item = usize> {
        let (h1, h2) = self.hashes.hash(key);
        let size = self.counters.len() as u64;
        (0..self.nb_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % size) as usize)
    }

    /// Records one observation of `key` and returns the estimate it had
    /// before this observation.
    pub fn insert(&self, key: u64) -> u8 {
        let mut prior = u8::MAX;
        for pos in self.positions(key) {
            let previous = self.counters[pos]
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_add(1))
                .unwrap_or(u8::MAX);
            prior = prior.min(previous);
        }
        prior
    }

    /// Estimated number of observations of `key`.
    #[inline]
    pub fn check(&self, key: u64) -> u8 {
        self.positions(key)
            .map(|pos| self.counters[pos].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    /// Header describing this filter.
    pub fn header(&self, canonical: bool) -> FileHeader {
        let mut header = FileHeader::new(Format::BloomCounter, self.key_len, 1, canonical);
        header.size = self.size();
        header.nb_hashes = self.nb_hashes;
        header.set_matrices(&self.hashes);
        header
    }

    /// Writes `header` followed by the counter array.
    pub fn write(&self, path: &Path, header: &FileHeader) -> Result<()> {
        let mut out = crate::utils::io::open_file_for_writing(path)?;
        header
            .write_to(&mut out)
            .map_err(|e| MerError::io(path, "write header", e))?;
        let bytes: Vec<u8> = self
            .counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        out.write_all(&bytes)
            .and_then(|_| out.flush())
            .map_err(|e| MerError::io(path, "write counters", e))
    }

    /// Loads a filter written by [`BloomCounter::write`], checking that it
    /// was built for the key width of `codec`.
    pub fn load(path: &Path, codec: &MerCodec) -> Result<Self> {
        let mut input = crate::utils::io::open_file_for_reading(path)?;
        let (header, offset) = FileHeader::read_from(&mut input, path)?;

        if header.format != Format::BloomCounter.tag() {
            return Err(MerError::format(
                path,
                format!("expected a bloomcounter file, found '{}'", header.format),
            ));
        }
        if header.key_len != codec.key_len_bits() {
            return Err(MerError::KeyLengthMismatch {
                path: path.to_path_buf(),
                expected: codec.key_len_bits(),
                found: header.key_len,
            });
        }
        let hashes = header
            .matrices()
            .filter(|h| h.first.is_well_formed() && h.second.is_well_formed())
            .ok_or_else(|| MerError::format(path, "missing or malformed hash matrices"))?;
        if hashes.first.cols != header.key_len || hashes.second.cols != header.key_len {
            return Err(MerError::format(path, "hash matrices do not match the key length"));
        }
        if header.size == 0 || header.nb_hashes == 0 {
            return Err(MerError::format(path, "empty Bloom counter"));
        }

        // Grown as bytes arrive, so a corrupt size cannot force a huge allocation
        let mut bytes = Vec::new();
        input
            .by_ref()
            .take(header.size)
            .read_to_end(&mut bytes)
            .map_err(|e| MerError::io(path, "read counters", e))?;
        if (bytes.len() as u64) < header.size {
            return Err(MerError::TruncatedFile {
                path: path.to_path_buf(),
                expected: offset + header.size,
                actual: offset + bytes.len() as u64,
            });
        }

        log::info!(
            "Loaded Bloom counter '{}': {} counters, {} hashes",
            path.display(),
            header.size,
            header.nb_hashes
        );

        Ok(Self {
            counters: bytes.into_iter().map(AtomicU8::new).collect(),
            nb_hashes: header.nb_hashes,
            hashes,
            key_len: header.key_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn filter(size: u64) -> BloomCounter {
        let mut rng = fastrand::Rng::with_seed(42);
        BloomCounter::new(size, DEFAULT_NB_HASHES, 8, &mut rng).unwrap()
    }

    #[test]
    fn test_check_never_undercounts() {
        let bc = filter(1 << 12);
        assert_eq!(bc.check(0b00_01_10_11), 0);
        for expected in 0..5u8 {
            assert!(bc.check(0b00_01_10_11) >= expected);
            bc.insert(0b00_01_10_11);
        }
        assert!(bc.check(0b00_01_10_11) >= 5);
    }

    #[test]
    fn test_insert_returns_prior_estimate() {
        let bc = filter(1 << 12);
        let first = bc.insert(7);
        let second = bc.insert(7);
        assert!(second > first);
    }

    #[test]
    fn test_counters_saturate() {
        let bc = filter(64);
        for _ in 0..300 {
            bc.insert(3);
        }
        assert_eq!(bc.check(3), u8::MAX);
    }

    #[test]
    fn test_write_and_load() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.bc");
        let bc = filter(1000);
        bc.insert(11);
        bc.insert(11);
        bc.write(&path, &bc.header(false))?;

        let codec = MerCodec::new(4, false)?;
        let loaded = BloomCounter::load(&path, &codec)?;
        assert_eq!(loaded.size(), 1000);
        assert_eq!(loaded.hashes(), bc.hashes());
        assert_eq!(loaded.check(11), bc.check(11));
        Ok(())
    }

    #[test]
    fn test_load_rejects_other_k() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.bc");
        let bc = filter(100);
        bc.write(&path, &bc.header(false))?;

        let codec = MerCodec::new(5, false)?;
        match BloomCounter::load(&path, &codec) {
            Err(MerError::KeyLengthMismatch { expected, found, .. }) => {
                assert_eq!(expected, 10);
                assert_eq!(found, 8);
            }
            other => panic!("expected key length mismatch, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_load_rejects_wrong_tag() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counts.mc");
        let bc = filter(100);
        let mut header = bc.header(false);
        header.set_format(Format::BinarySorted);
        bc.write(&path, &header)?;

        let codec = MerCodec::new(4, false)?;
        assert!(matches!(
            BloomCounter::load(&path, &codec),
            Err(MerError::Format { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_rejects_truncated_counters() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.bc");
        let bc = filter(100);
        bc.write(&path, &bc.header(false))?;
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();

        let codec = MerCodec::new(4, false)?;
        match BloomCounter::load(&path, &codec) {
            Err(MerError::TruncatedFile { expected, actual, .. }) => {
                assert_eq!(expected, len);
                assert_eq!(actual, len - 10);
            }
            other => panic!("expected truncated file, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_load_rejects_oversized_header() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.bc");
        let bc = filter(16);
        let mut header = bc.header(false);
        header.size = 1u64 << 62;
        bc.write(&path, &header)?;

        let codec = MerCodec::new(4, false)?;
        match BloomCounter::load(&path, &codec) {
            Err(MerError::TruncatedFile { expected, actual, .. }) => {
                assert!(expected > 1u64 << 62);
                assert_eq!(actual, std::fs::metadata(&path).unwrap().len());
            }
            other => panic!("expected truncated file, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_sizing_helpers() {
        let m = optimal_size(1000, 0.01);
        assert!(m > 9000 && m < 10000);
        assert_eq!(optimal_hashes(m, 1000), 7);
        assert_eq!(optimal_hashes(1, 1000), 1);
    }
}
