use crate::args::CountArgs;
use crate::encode::{MerCodec, MAX_K};
use crate::error::{MerError, Result};
use crate::io::{FileHeader, Format};
use crate::parallel::streams::DEFAULT_BATCH_BASES;
use crate::table::{FullPolicy, TableParams};
use std::path::PathBuf;

/// Settings of one counting run, built once from the command line and
/// passed by reference to everything that needs them.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub k: usize,
    pub canonical: bool,
    pub table: TableParams,
    pub policy: FullPolicy,
    pub threads: usize,
    pub output: PathBuf,
    /// Bytes per count in binary output.
    pub out_counter_len: u32,
    pub text: bool,
    pub lower_count: Option<u64>,
    pub upper_count: Option<u64>,
    pub files: Vec<PathBuf>,
    pub intersection: Vec<PathBuf>,
    pub bloom_filter: Option<PathBuf>,
    pub bloom_threshold: u8,
    pub concurrent_files: usize,
    pub generator: Option<PathBuf>,
    pub concurrent_generators: usize,
    pub shell: Option<PathBuf>,
    pub timing: Option<PathBuf>,
    pub no_merge: bool,
    pub no_unlink: bool,
    pub no_write: bool,
    /// Bases handed to a worker at a time.
    pub batch_bases: usize,
    pub cmdline: Vec<String>,
}

impl RunConfig {
    /// Configuration with default settings counting `files`.
    pub fn new(k: usize, size: u64, files: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            k,
            canonical: false,
            table: TableParams {
                capacity: size,
                ..TableParams::default()
            },
            policy: FullPolicy::Grow,
            threads: 1,
            output,
            out_counter_len: 4,
            text: false,
            lower_count: None,
            upper_count: None,
            files,
            intersection: Vec::new(),
            bloom_filter: None,
            bloom_threshold: crate::bloom::DEFAULT_THRESHOLD,
            concurrent_files: 1,
            generator: None,
            concurrent_generators: 1,
            shell: None,
            timing: None,
            no_merge: false,
            no_unlink: false,
            no_write: false,
            batch_bases: DEFAULT_BATCH_BASES,
            cmdline: Vec::new(),
        }
    }

    /// Builds and validates the configuration of a `mercount` invocation.
    pub fn from_args(args: &CountArgs, cmdline: Vec<String>) -> Result<Self> {
        if args.disk && args.max_size.is_some() {
            return Err(MerError::config(
                "--disk and --max-size are exclusive: --disk never grows the table",
            ));
        }
        let policy = match (args.disk, args.max_size) {
            (true, _) => FullPolicy::Spill,
            (false, Some(max_capacity)) => FullPolicy::GrowThenSpill { max_capacity },
            (false, None) => FullPolicy::Grow,
        };

        let mut config = Self::new(args.mer_len, args.size, args.files.clone(), args.output.clone());
        config.canonical = args.canonical;
        config.table.counter_len = args.counter_len;
        config.table.max_reprobe = args.reprobes;
        config.policy = policy;
        config.threads = args.threads.unwrap_or_else(num_cpus::get);
        config.out_counter_len = args.out_counter_len;
        config.text = args.text;
        config.lower_count = args.lower_count;
        config.upper_count = args.upper_count;
        config.intersection = args.intersection.clone();
        config.bloom_filter = args.bloom_filter.clone();
        config.bloom_threshold = args.bf_threshold;
        config.concurrent_files = args.concurrent_files;
        config.generator = args.generator.clone();
        config.concurrent_generators = args.concurrent_generators;
        config.shell = args.shell.clone();
        config.timing = args.timing.clone();
        config.no_merge = args.no_merge;
        config.no_unlink = args.no_unlink;
        config.no_write = args.no_write;
        config.cmdline = cmdline;

        config.validate()?;
        Ok(config)
    }

    /// Rejects out-of-range and contradictory settings.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k > MAX_K {
            return Err(MerError::config(format!(
                "k-mer length must be between 1 and {}, got {}",
                MAX_K, self.k
            )));
        }
        self.table.validate()?;
        if self.threads == 0 {
            return Err(MerError::config("at least one thread is required"));
        }
        if self.files.is_empty() && self.generator.is_none() {
            return Err(MerError::config(
                "no input: give sequence files or a generator file",
            ));
        }
        if self.out_counter_len == 0 || self.out_counter_len > 8 {
            return Err(MerError::config(format!(
                "output counter length must be between 1 and 8 bytes, got {}",
                self.out_counter_len
            )));
        }
        if self.min_count() > self.max_count() {
            return Err(MerError::config(format!(
                "lower count {} is above upper count {}",
                self.min_count(),
                self.max_count()
            )));
        }
        if self.concurrent_files == 0 || self.concurrent_generators == 0 {
            return Err(MerError::config(
                "concurrent files and generators must be at least 1",
            ));
        }
        if let FullPolicy::GrowThenSpill { max_capacity } = self.policy {
            if max_capacity < self.table.capacity {
                return Err(MerError::config(format!(
                    "maximum table size {} is below the initial size {}",
                    max_capacity, self.table.capacity
                )));
            }
        }
        Ok(())
    }

    pub fn codec(&self) -> Result<MerCodec> {
        MerCodec::new(self.k, self.canonical)
    }

    pub fn min_count(&self) -> u64 {
        self.lower_count.unwrap_or(0)
    }

    pub fn max_count(&self) -> u64 {
        self.upper_count.unwrap_or(u64::MAX)
    }

    /// Header template for every file this run writes.
    pub fn header(&self) -> FileHeader {
        let format = if self.text {
            Format::TextUnsorted
        } else {
            Format::BinaryUnsorted
        };
        let mut header = FileHeader::new(format, 2 * self.k as u32, self.out_counter_len, self.canonical);
        header.fill_standard(&self.cmdline);
        header.size = self.table.capacity;
        header.max_reprobe = self.table.max_reprobe as u32;
        header
    }
}
