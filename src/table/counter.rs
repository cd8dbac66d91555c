//! Sharing a [`CountingTable`] between workers, and draining it when full.
//!
//! Workers mutate the table under a shared read guard held for one batch of
//! keys. The guard only excludes the drain, which needs the table to itself.
//! A worker whose batch hits a full table drops its guard and waits at a
//! barrier. Once every worker still running has arrived (or the others have
//! finished and called [`HashCounter::done`]), the last one in drains the
//! table under the write lock according to the [`FullPolicy`], then everyone
//! resumes where they stopped.

use super::counting_table::{AddOutcome, CountingTable};
use crate::dump::Dumper;
use crate::error::{MerError, Result};
use log::{debug, info};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What the workers are doing with the keys they extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `add(key, 1)`
    Count,
    /// `set(key)`, building the restricted key universe.
    Prime,
    /// `update_add(key, 1)`, counting only primed keys.
    Update,
}

/// How a full table is made usable again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    /// Dump the table to an intermediate file and clear it.
    Spill,
    /// Replace the table with one of twice the capacity.
    Grow,
    /// Grow while the doubled capacity stays within `max_capacity`, spill after.
    GrowThenSpill { max_capacity: u64 },
}

/// Drains performed during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub grows: usize,
    pub spills: usize,
}

#[derive(Debug)]
struct DrainState {
    operation: Operation,
    active: usize,
    waiting: usize,
    generation: u64,
    error: Option<MerError>,
    stats: DrainStats,
}

pub struct HashCounter {
    table: RwLock<CountingTable>,
    state: Mutex<DrainState>,
    drained: Condvar,
    policy: FullPolicy,
    dumper: Mutex<Option<Box<dyn Dumper>>>,
}

impl HashCounter {
    pub fn new(table: CountingTable, policy: FullPolicy, dumper: Option<Box<dyn Dumper>>) -> Self {
        Self {
            table: RwLock::new(table),
            state: Mutex::new(DrainState {
                operation: Operation::Count,
                active: 0,
                waiting: 0,
                generation: 0,
                error: None,
                stats: DrainStats::default(),
            }),
            drained: Condvar::new(),
            policy,
            dumper: Mutex::new(dumper),
        }
    }

    pub fn policy(&self) -> FullPolicy {
        self.policy
    }

    fn read_table(&self) -> RwLockReadGuard<'_, CountingTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, CountingTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, DrainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a pass of `nb_workers` workers. Each must call [`done`](Self::done)
    /// exactly once when its input is exhausted.
    pub fn begin(&self, nb_workers: usize, operation: Operation) {
        let mut state = self.lock_state();
        state.operation = operation;
        state.active = nb_workers;
        state.waiting = 0;
        state.error = None;
    }

    /// Applies `operation` to every key of the batch, waiting out drains as
    /// needed. Returns the number of keys that reached the table (for
    /// `Update`, the number of keys that were primed).
    pub fn apply(&self, operation: Operation, keys: &[u64]) -> Result<u64> {
        let mut start = 0;
        let mut applied = 0u64;
        while start < keys.len() {
            let stopped_at = {
                let table = self.read_table();
                let mut stopped_at = None;
                for (offset, &key) in keys[start..].iter().enumerate() {
                    let outcome = match operation {
                        Operation::Count => table.add(key, 1),
                        Operation::Prime => table.set(key),
                        Operation::Update => {
                            if table.update_add(key, 1) {
                                applied += 1;
                            }
                            continue;
                        }
                    };
                    if outcome == AddOutcome::Full {
                        stopped_at = Some(start + offset);
                        break;
                    }
                    applied += 1;
                }
                stopped_at
            };
            match stopped_at {
                Some(pos) => {
                    self.wait_for_drain()?;
                    start = pos;
                }
                None => break,
            }
        }
        Ok(applied)
    }

    pub fn add(&self, key: u64) -> Result<()> {
        self.apply(Operation::Count, &[key]).map(|_| ())
    }

    pub fn set(&self, key: u64) -> Result<()> {
        self.apply(Operation::Prime, &[key]).map(|_| ())
    }

    pub fn update_add(&self, key: u64) -> bool {
        self.read_table().update_add(key, 1)
    }

    pub fn is_full(&self) -> bool {
        self.read_table().is_full()
    }

    pub fn occupancy(&self) -> u64 {
        self.read_table().occupancy()
    }

    /// True once every worker of the current pass has called `done`.
    pub fn is_drainable(&self) -> bool {
        self.lock_state().active == 0
    }

    pub fn drain_stats(&self) -> DrainStats {
        self.lock_state().stats
    }

    /// Number of intermediate files written by the dumper so far.
    pub fn nb_dumped_files(&self) -> usize {
        self.dumper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |d| d.nb_files())
    }

    /// Marks one worker as finished. If every remaining worker is waiting on
    /// a full table, the drain happens here.
    pub fn done(&self) -> Result<()> {
        let mut state = self.lock_state();
        state.active = state.active.saturating_sub(1);
        if state.waiting > 0 && state.waiting == state.active {
            self.drain_and_release(&mut state)
        } else {
            Ok(())
        }
    }

    fn wait_for_drain(&self) -> Result<()> {
        let mut state = self.lock_state();
        if let Some(err) = &state.error {
            return Err(err.replicate());
        }
        state.waiting += 1;
        if state.waiting == state.active {
            return self.drain_and_release(&mut state);
        }
        let generation = state.generation;
        while state.generation == generation {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match &state.error {
            Some(err) => Err(err.replicate()),
            None => Ok(()),
        }
    }

    /// Drains with the state lock held, then wakes the waiting workers.
    fn drain_and_release(&self, state: &mut DrainState) -> Result<()> {
        let result = self.drain(state);
        state.waiting = 0;
        state.generation += 1;
        let result = match result {
            Ok(()) => Ok(()),
            Err(err) => {
                let copy = err.replicate();
                state.error = Some(err);
                Err(copy)
            }
        };
        self.drained.notify_all();
        result
    }

    fn drain(&self, state: &mut DrainState) -> Result<()> {
        let mut table = self.write_table();
        if !table.is_full() {
            return Ok(());
        }
        let grow = match self.policy {
            FullPolicy::Grow => true,
            FullPolicy::Spill => false,
            FullPolicy::GrowThenSpill { max_capacity } => table.capacity() * 2 <= max_capacity,
        };
        if grow {
            let bigger = table.doubled();
            info!(
                "Hash table full ({} entries), growing to {} slots",
                table.occupancy(),
                bigger.capacity()
            );
            *table = bigger;
            state.stats.grows += 1;
            return Ok(());
        }

        if state.operation == Operation::Prime {
            return Err(MerError::config(format!(
                "the intersection k-mers do not fit in a table of {} slots; increase the table size",
                table.capacity()
            )));
        }
        let mut dumper = self.dumper.lock().unwrap_or_else(PoisonError::into_inner);
        let dumper = dumper
            .as_mut()
            .ok_or_else(|| MerError::config("hash table is full and no dumper is configured"))?;
        debug!("Hash table full ({} entries), dumping to disk", table.occupancy());
        dumper.dump(&mut table)?;
        state.stats.spills += 1;
        Ok(())
    }

    /// Consumes the counter once all passes are over.
    pub fn finish(self) -> (CountingTable, Option<Box<dyn Dumper>>) {
        let table = self.table.into_inner().unwrap_or_else(PoisonError::into_inner);
        let dumper = self.dumper.into_inner().unwrap_or_else(PoisonError::into_inner);
        (table, dumper)
    }
}
