//! Worker pool extracting k-mers from the shared streams into the table.

use super::streams::StreamManager;
use crate::encode::MerCodec;
use crate::error::{MerError, Result};
use crate::filter::FilterChain;
use crate::table::{HashCounter, Operation};
use log::{debug, warn};
use std::time::{Duration, Instant};

/// Keys buffered by a worker before they are applied to the table.
const KEY_BATCH: usize = 4096;

/// Per-pass counters, summed over workers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CountMetrics {
    /// Batches of sequences pulled from the streams
    pub batches: u64,
    pub sequences: u64,
    /// k-mers extracted from the sequences
    pub mers: u64,
    /// k-mers rejected by the filter chain
    pub filtered: u64,
    /// k-mers that changed the table
    pub applied: u64,
    pub elapsed: Duration,
}

impl CountMetrics {
    fn absorb(&mut self, other: &CountMetrics) {
        self.batches += other.batches;
        self.sequences += other.sequences;
        self.mers += other.mers;
        self.filtered += other.filtered;
        self.applied += other.applied;
    }
}

/// Calls `done` on the counter however the worker exits, so the others are
/// never left waiting for it at a drain.
struct DoneGuard<'a>(&'a HashCounter);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.done() {
            debug!("Drain at worker exit failed: {}", e);
        }
    }
}

/// One pass of `operation` over every stream of `streams`.
pub struct MerCounter<'a> {
    counter: &'a HashCounter,
    codec: &'a MerCodec,
    filter: &'a FilterChain,
    streams: &'a StreamManager,
    operation: Operation,
}

impl<'a> MerCounter<'a> {
    pub fn new(
        counter: &'a HashCounter,
        codec: &'a MerCodec,
        filter: &'a FilterChain,
        streams: &'a StreamManager,
        operation: Operation,
    ) -> Self {
        Self {
            counter,
            codec,
            filter,
            streams,
            operation,
        }
    }

    /// Runs `threads` workers to completion and returns their summed metrics,
    /// or the first error any of them hit.
    pub fn exec_join(&self, threads: usize) -> Result<CountMetrics> {
        let threads = threads.max(1);
        let start = Instant::now();
        self.counter.begin(threads, self.operation);

        let results: Vec<Result<CountMetrics>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|id| s.spawn(move || self.worker(id)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(MerError::config("a counting worker panicked")))
                })
                .collect()
        });

        let mut total = CountMetrics::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(metrics) => total.absorb(&metrics),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        warn!("Additional worker error: {}", e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        total.elapsed = start.elapsed();
        debug!(
            "{:?} pass: {} sequences, {} k-mers, {} filtered, {} applied in {:.2?}",
            self.operation, total.sequences, total.mers, total.filtered, total.applied, total.elapsed
        );
        Ok(total)
    }

    fn worker(&self, id: usize) -> Result<CountMetrics> {
        let _done = DoneGuard(self.counter);
        let mut metrics = CountMetrics::default();
        let mut cursor = id;
        let mut sequences = Vec::new();
        let mut keys = Vec::with_capacity(KEY_BATCH);

        while self.streams.next_batch(&mut cursor, &mut sequences)? {
            metrics.batches += 1;
            metrics.sequences += sequences.len() as u64;
            for sequence in sequences.drain(..) {
                for key in self.codec.mers(&sequence) {
                    metrics.mers += 1;
                    if !self.filter.accepts(key) {
                        metrics.filtered += 1;
                        continue;
                    }
                    keys.push(key);
                    if keys.len() == KEY_BATCH {
                        metrics.applied += self.counter.apply(self.operation, &keys)?;
                        keys.clear();
                    }
                }
            }
        }
        if !keys.is_empty() {
            metrics.applied += self.counter.apply(self.operation, &keys)?;
        }
        Ok(metrics)
    }
}
