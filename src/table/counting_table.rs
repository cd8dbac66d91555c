//! Open-addressed table of `(key, count)` slots mutated concurrently.
//!
//! Key words and count words live in two parallel arrays of atomics. A key
//! word is `0` while the slot is empty and `key | OCCUPIED` once claimed, so
//! the claim is a single compare-and-swap and a slot never changes owner until
//! the table is cleared. Count words hold the count in their low bits and a
//! saturation flag in bit 63.
//!
//! The probe sequence for a key is `(fmix64(key) + i(i+1)/2) & mask` for
//! `i = 0..=max_reprobe`. With a power-of-two capacity the triangular offsets
//! visit every slot once, so a key is always found on the path it was
//! inserted along.

use crate::error::{MerError, Result};
use crate::utils::hash::fmix64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tag marking a claimed key word. Keys are at most 62 bits wide.
pub const OCCUPIED: u64 = 1 << 63;
/// Flag set in a count word whose count hit the counter ceiling.
pub const SATURATED: u64 = 1 << 63;

pub const DEFAULT_MAX_REPROBE: usize = 126;
pub const DEFAULT_LOAD_FACTOR: f64 = 0.9;
pub const DEFAULT_COUNTER_LEN: u32 = 32;
pub const MAX_COUNTER_LEN: u32 = 32;

/// Result of a mutation that may need a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Counted,
    /// The table must be drained before the key can be stored.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableParams {
    /// Requested number of slots, rounded up to a power of two.
    pub capacity: u64,
    /// Bits per in-table count.
    pub counter_len: u32,
    pub max_reprobe: usize,
    pub load_factor: f64,
}

impl Default for TableParams {
    fn default() -> Self {
        Self {
            capacity: 1 << 20,
            counter_len: DEFAULT_COUNTER_LEN,
            max_reprobe: DEFAULT_MAX_REPROBE,
            load_factor: DEFAULT_LOAD_FACTOR,
        }
    }
}

impl TableParams {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MerError::config("table size must be positive"));
        }
        if self.capacity > 1 << 40 {
            return Err(MerError::config(format!(
                "table size {} is too large",
                self.capacity
            )));
        }
        if self.counter_len == 0 || self.counter_len > MAX_COUNTER_LEN {
            return Err(MerError::config(format!(
                "counter length must be between 1 and {} bits, got {}",
                MAX_COUNTER_LEN, self.counter_len
            )));
        }
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(MerError::config(format!(
                "load factor must be in (0, 1], got {}",
                self.load_factor
            )));
        }
        Ok(())
    }
}

/// One occupied slot as seen by a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub key: u64,
    pub count: u64,
    pub saturated: bool,
}

#[derive(Debug)]
pub struct CountingTable {
    keys: Box<[AtomicU64]>,
    counts: Box<[AtomicU64]>,
    mask: u64,
    /// Probe bound in use, at most `capacity - 1`.
    max_reprobe: usize,
    /// Probe bound asked for, restored once a grown table is large enough.
    requested_reprobe: usize,
    counter_len: u32,
    max_count: u64,
    load_factor: f64,
    threshold: u64,
    occupancy: AtomicU64,
    full: AtomicBool,
}

impl CountingTable {
    pub fn new(params: TableParams) -> Result<Self> {
        params.validate()?;
        Ok(Self::allocate(params))
    }

    fn allocate(params: TableParams) -> Self {
        let capacity = params.capacity.max(2).next_power_of_two();
        let threshold = ((capacity as f64 * params.load_factor).floor() as u64).clamp(1, capacity);
        Self {
            keys: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            counts: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: capacity - 1,
            max_reprobe: params.max_reprobe.min(capacity as usize - 1),
            requested_reprobe: params.max_reprobe,
            counter_len: params.counter_len,
            max_count: (1u64 << params.counter_len) - 1,
            load_factor: params.load_factor,
            threshold,
            occupancy: AtomicU64::new(0),
            full: AtomicBool::new(false),
        }
    }

    /// Parameters that reproduce this table's shape.
    pub fn params(&self) -> TableParams {
        TableParams {
            capacity: self.capacity(),
            counter_len: self.counter_len,
            max_reprobe: self.requested_reprobe,
            load_factor: self.load_factor,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }

    pub fn max_reprobe(&self) -> usize {
        self.max_reprobe
    }

    pub fn counter_len(&self) -> u32 {
        self.counter_len
    }

    /// Largest count a slot can hold.
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    pub fn occupancy(&self) -> u64 {
        self.occupancy.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    #[inline]
    fn probe(&self, hash: u64, i: usize) -> usize {
        let i = i as u64;
        (hash.wrapping_add(i * (i + 1) / 2) & self.mask) as usize
    }

    fn mark_full(&self) {
        self.full.store(true, Ordering::Release);
    }

    /// Finds the slot of `key`, claiming an empty one if needed.
    /// Returns `None` when the table is full.
    fn find_or_claim(&self, key: u64) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let tagged = key | OCCUPIED;
        let hash = fmix64(key);
        for i in 0..=self.max_reprobe {
            let pos = self.probe(hash, i);
            let word = self.keys[pos].load(Ordering::Acquire);
            if word == tagged {
                return Some(pos);
            }
            if word != 0 {
                continue;
            }
            match self.keys[pos].compare_exchange(0, tagged, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    let occupied = self.occupancy.fetch_add(1, Ordering::Relaxed) + 1;
                    if occupied >= self.threshold {
                        self.mark_full();
                    }
                    return Some(pos);
                }
                // Lost the race to a thread claiming the same key
                Err(actual) if actual == tagged => return Some(pos),
                Err(_) => continue,
            }
        }
        self.mark_full();
        None
    }

    /// Position of `key` if it is resident.
    fn find(&self, key: u64) -> Option<usize> {
        let tagged = key | OCCUPIED;
        let hash = fmix64(key);
        for i in 0..=self.max_reprobe {
            let pos = self.probe(hash, i);
            match self.keys[pos].load(Ordering::Acquire) {
                0 => return None,
                word if word == tagged => return Some(pos),
                _ => continue,
            }
        }
        None
    }

    /// Saturating increment of a count word.
    #[inline]
    fn increment(&self, pos: usize, delta: u64) {
        if delta == 0 {
            return;
        }
        let slot = &self.counts[pos];
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let value = current & !SATURATED;
            let next = match value.checked_add(delta) {
                Some(v) if v <= self.max_count => v | (current & SATURATED),
                _ => self.max_count | SATURATED,
            };
            if next == current {
                return;
            }
            match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Adds `delta` to the count of `key`, inserting it if absent.
    pub fn add(&self, key: u64, delta: u64) -> AddOutcome {
        match self.find_or_claim(key) {
            Some(pos) => {
                self.increment(pos, delta);
                AddOutcome::Counted
            }
            None => AddOutcome::Full,
        }
    }

    /// Makes `key` resident without counting it.
    pub fn set(&self, key: u64) -> AddOutcome {
        match self.find_or_claim(key) {
            Some(_) => AddOutcome::Counted,
            None => AddOutcome::Full,
        }
    }

    /// Adds `delta` to `key` only if it is already resident. Returns whether
    /// the key was found.
    pub fn update_add(&self, key: u64, delta: u64) -> bool {
        match self.find(key) {
            Some(pos) => {
                self.increment(pos, delta);
                true
            }
            None => false,
        }
    }

    /// Current count of `key`, if resident.
    pub fn get(&self, key: u64) -> Option<u64> {
        self.find(key)
            .map(|pos| self.counts[pos].load(Ordering::Relaxed) & !SATURATED)
    }

    /// Occupied slots in slot order.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.keys
            .iter()
            .zip(self.counts.iter())
            .filter_map(|(k, c)| {
                let word = k.load(Ordering::Acquire);
                if word & OCCUPIED == 0 {
                    return None;
                }
                let count = c.load(Ordering::Relaxed);
                Some(Slot {
                    key: word & !OCCUPIED,
                    count: count & !SATURATED,
                    saturated: count & SATURATED != 0,
                })
            })
    }

    /// Empties every slot and clears the full flag.
    pub fn clear(&mut self) {
        for word in self.keys.iter_mut() {
            *word.get_mut() = 0;
        }
        for word in self.counts.iter_mut() {
            *word.get_mut() = 0;
        }
        *self.occupancy.get_mut() = 0;
        *self.full.get_mut() = false;
    }

    /// Places a key with a raw count word into an empty table.
    fn place(&self, key: u64, count_word: u64) -> bool {
        let tagged = key | OCCUPIED;
        let hash = fmix64(key);
        for i in 0..=self.max_reprobe {
            let pos = self.probe(hash, i);
            if self.keys[pos].load(Ordering::Relaxed) == 0 {
                self.keys[pos].store(tagged, Ordering::Relaxed);
                self.counts[pos].store(count_word, Ordering::Relaxed);
                let occupied = self.occupancy.fetch_add(1, Ordering::Relaxed) + 1;
                if occupied >= self.threshold {
                    self.mark_full();
                }
                return true;
            }
        }
        false
    }

    /// A table of twice the capacity holding the same keys and counts.
    /// Should the larger table still run out of probes, capacity keeps
    /// doubling until every key fits.
    pub fn doubled(&self) -> CountingTable {
        let mut params = self.params();
        loop {
            params.capacity *= 2;
            let bigger = Self::allocate(params);
            let fits = self.keys.iter().zip(self.counts.iter()).all(|(k, c)| {
                let word = k.load(Ordering::Acquire);
                word & OCCUPIED == 0 || bigger.place(word & !OCCUPIED, c.load(Ordering::Relaxed))
            });
            if fits {
                return bigger;
            }
        }
    }
}
