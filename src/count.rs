//! One counting run from configuration to output file.
//!
//! 1. Build the codec, table, dumper and filter chain (loading the Bloom
//!    counter if one is given).
//! 2. With intersection files, prime the table with their k-mers and count
//!    only those in the update pass; otherwise count everything.
//! 3. Check the generator commands all succeeded.
//! 4. Write the output: a single dump if the table never spilled, otherwise
//!    a last dump followed by a merge of every intermediate file.
//! 5. Write the timing report if requested.

use crate::bloom::BloomCounter;
use crate::config::RunConfig;
use crate::dump::{Dumper, FileDumper};
use crate::error::{MerError, Result};
use crate::filter::{bloom_predicate, FilterChain};
use crate::merge::{merge_files, MergeSummary};
use crate::parallel::{CountMetrics, GeneratorManager, MerCounter, StreamManager};
use crate::table::{CountingTable, DrainStats, HashCounter, Operation};
use crate::utils::io::remove_file_quietly;
use crate::utils::timing::PhaseTimer;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct CountReport {
    /// Metrics of the priming pass over the intersection files.
    pub prime: Option<CountMetrics>,
    pub count: CountMetrics,
    pub drains: DrainStats,
    /// Intermediate files written when the table spilled.
    pub intermediate_files: Vec<PathBuf>,
    pub merge: Option<MergeSummary>,
    /// Final output, unless nothing was written.
    pub output: Option<PathBuf>,
    pub timings: Vec<(&'static str, Duration)>,
}

pub fn run(config: &RunConfig) -> Result<CountReport> {
    config.validate()?;
    let mut timer = PhaseTimer::new();
    let mut report = CountReport::default();

    let codec = config.codec()?;
    let mut header = config.header();

    let mut filter = FilterChain::new();
    if let Some(path) = &config.bloom_filter {
        let bloom = Arc::new(BloomCounter::load(path, &codec)?);
        header.set_matrices(bloom.hashes());
        filter.push(bloom_predicate(bloom, config.bloom_threshold));
    }

    let generators = match &config.generator {
        Some(path) => Some(Arc::new(GeneratorManager::from_file(path, config.shell.as_deref())?)),
        None => None,
    };

    let table = CountingTable::new(config.table)?;
    info!(
        "Hash table: {} slots, {} bit counters, policy {:?}",
        table.capacity(),
        table.counter_len(),
        config.policy
    );
    let dumper: Box<dyn Dumper> = if config.text {
        Box::new(FileDumper::text(&config.output, &header))
    } else {
        Box::new(FileDumper::binary(&config.output, &header))
    };
    let counter = HashCounter::new(table, config.policy, Some(dumper));
    timer.lap("Init");

    let operation = if config.intersection.is_empty() {
        Operation::Count
    } else {
        let streams = StreamManager::from_files(&config.intersection, config.concurrent_files)
            .with_batch_bases(config.batch_bases);
        let everything = FilterChain::new();
        let metrics = MerCounter::new(&counter, &codec, &everything, &streams, Operation::Prime)
            .exec_join(config.threads)?;
        info!(
            "Primed {} distinct k-mers from {} intersection files",
            counter.occupancy(),
            config.intersection.len()
        );
        report.prime = Some(metrics);
        Operation::Update
    };

    let streams = StreamManager::new(
        &config.files,
        config.concurrent_files,
        generators.clone(),
        config.concurrent_generators,
    )
    .with_batch_bases(config.batch_bases);
    let counted = MerCounter::new(&counter, &codec, &filter, &streams, operation).exec_join(config.threads);
    // Drops any stream left open by a failed pass, killing its generator
    drop(streams);
    report.count = counted?;
    if let Some(generators) = &generators {
        generators.wait()?;
    }
    report.drains = counter.drain_stats();
    info!(
        "Counted {} k-mers ({} filtered), {} grows, {} spills",
        report.count.mers, report.count.filtered, report.drains.grows, report.drains.spills
    );
    timer.lap("Counting");

    let (mut table, dumper) = counter.finish();
    let mut dumper = dumper.ok_or_else(|| MerError::config("dumper missing at end of run"))?;
    if !config.no_write {
        if dumper.nb_files() == 0 {
            dumper.one_file(true);
            dumper.min(config.min_count());
            dumper.max(config.max_count());
            dumper.dump(&mut table)?;
            report.output = Some(config.output.clone());
        } else {
            dumper.dump(&mut table)?;
            let files = dumper.file_names().to_vec();
            if !config.no_merge {
                let summary = merge_files(
                    &files,
                    &config.output,
                    &header,
                    config.min_count(),
                    config.max_count(),
                )?;
                if !config.no_unlink {
                    for file in &files {
                        remove_file_quietly(file);
                    }
                }
                report.merge = Some(summary);
                report.output = Some(config.output.clone());
            }
            report.intermediate_files = files;
        }
    }
    timer.lap("Writing");

    if let Some(path) = &config.timing {
        timer.write_report_file(path)?;
    }
    report.timings = timer.phases().to_vec();
    Ok(report)
}
