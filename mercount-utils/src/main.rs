use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use mercount::bloom::{optimal_size, BloomCounter};
use mercount::encode::MerCodec;
use mercount::fasta::SequenceReader;
use mercount::io::{FileHeader, Format, RecordReader};
use mercount::logging::init_logger;
use mercount::merge::merge_files;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(name = "mercount-utils", version = "0.1.0", about = "Utility tools for mercount files")]
struct Cli {
    /// Log progress to stderr.
    #[clap(short, long, action, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merges count files, summing the counts of identical k-mers.
    Merge {
        /// Output file.
        #[clap(short, long, value_parser, default_value = "mer_counts_merged.mc")]
        output: PathBuf,

        /// Do not output k-mers with a count below this value.
        #[clap(short = 'L', long, value_parser)]
        lower_count: Option<u64>,

        /// Do not output k-mers with a count above this value.
        #[clap(short = 'U', long, value_parser)]
        upper_count: Option<u64>,

        /// Write text output instead of binary.
        #[clap(long, action)]
        text: bool,

        /// Count files to merge.
        #[clap(value_parser, required = true)]
        files: Vec<PathBuf>,
    },

    /// Prints the k-mers and counts of a count file.
    Dump {
        /// Skip k-mers with a count below this value.
        #[clap(short = 'L', long, value_parser)]
        lower_count: Option<u64>,

        /// Skip k-mers with a count above this value.
        #[clap(short = 'U', long, value_parser)]
        upper_count: Option<u64>,

        /// Column format: `KMER COUNT` per line instead of FASTA-like records.
        #[clap(short = 'c', long, action)]
        column: bool,

        /// Separate columns with a tab.
        #[clap(short = 't', long, action)]
        tab: bool,

        /// Write to this file instead of stdout.
        #[clap(short, long, value_parser)]
        output: Option<PathBuf>,

        #[clap(value_parser)]
        file: PathBuf,
    },

    /// Histogram of the counts of a count file.
    Histo {
        /// Lowest count shown. Smaller counts go to the bin below.
        #[clap(short = 'l', long, value_parser, default_value_t = 1)]
        low: u64,

        /// Highest count shown. Larger counts go to the bin above.
        #[clap(short = 'H', long, value_parser, default_value_t = 10000)]
        high: u64,

        /// Print empty bins too.
        #[clap(short, long, action)]
        full: bool,

        #[clap(value_parser)]
        file: PathBuf,
    },

    /// Builds a Bloom counter from sequence files, for `mercount --bf`.
    Bc {
        /// Length of the k-mers.
        #[clap(short = 'm', long, value_parser)]
        mer_len: usize,

        /// Expected number of distinct k-mers. Accepts k, M and G suffixes.
        #[clap(short = 's', long, value_parser = mercount::args::parse_size)]
        size: u64,

        /// Target false positive rate.
        #[clap(short = 'f', long, value_parser, default_value_t = 0.01)]
        fpr: f64,

        /// Number of hash positions per k-mer. Derived from the size and
        /// false positive rate when absent.
        #[clap(long, value_parser)]
        nb_hashes: Option<u32>,

        /// Count canonical k-mers.
        #[clap(short = 'C', long, action)]
        canonical: bool,

        /// Seed for the hash matrices.
        #[clap(long, value_parser)]
        seed: Option<u64>,

        /// Output file.
        #[clap(short, long, value_parser, default_value = "mer_counts.bc")]
        output: PathBuf,

        /// Sequence files.
        #[clap(value_parser, required = true)]
        files: Vec<PathBuf>,
    },

    /// Prints the header of a count or Bloom counter file as JSON.
    Info {
        #[clap(value_parser)]
        file: PathBuf,
    },
}

fn open_output(output: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    })
}

fn run_merge(
    files: &[PathBuf],
    output: &Path,
    lower: Option<u64>,
    upper: Option<u64>,
    text: bool,
    cmdline: &[String],
) -> Result<()> {
    let first = RecordReader::open(&files[0])
        .with_context(|| format!("Failed to read header of {}", files[0].display()))?;
    let mut header = first.header().clone();
    header.fill_standard(cmdline);
    header.set_format(if text {
        Format::TextSorted
    } else {
        Format::BinarySorted
    });
    drop(first);

    let summary = merge_files(
        files,
        output,
        &header,
        lower.unwrap_or(0),
        upper.unwrap_or(u64::MAX),
    )
    .with_context(|| format!("Failed to merge into {}", output.display()))?;
    info!(
        "Merged {} files: {} distinct k-mers, {} written",
        summary.inputs, summary.distinct_keys, summary.records_written
    );
    Ok(())
}

fn run_dump(
    file: &Path,
    lower: Option<u64>,
    upper: Option<u64>,
    column: bool,
    tab: bool,
    output: Option<&Path>,
) -> Result<()> {
    let mut reader = RecordReader::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let header = reader.header();
    let codec = MerCodec::new(header.key_len as usize / 2, header.canonical)?;
    let (min, max) = (lower.unwrap_or(0), upper.unwrap_or(u64::MAX));
    let separator = if tab { '\t' } else { ' ' };

    let mut out = open_output(output)?;
    while let Some((key, count)) = reader.next_record()? {
        if count < min || count > max {
            continue;
        }
        if column {
            writeln!(out, "{}{}{}", codec.decode(key), separator, count)?;
        } else {
            writeln!(out, ">{}\n{}", count, codec.decode(key))?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Count of k-mers per count value. Counts below `low` land in bin `low - 1`,
/// counts above `high` in bin `high + 1`.
fn histogram(file: &Path, low: u64, high: u64) -> Result<BTreeMap<u64, u64>> {
    if low > high {
        bail!("Low bound {} is above high bound {}", low, high);
    }
    let mut reader = RecordReader::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let mut bins = BTreeMap::new();
    while let Some((_, count)) = reader.next_record()? {
        let bin = if count < low {
            low.saturating_sub(1)
        } else if count > high {
            high.saturating_add(1)
        } else {
            count
        };
        *bins.entry(bin).or_insert(0u64) += 1;
    }
    Ok(bins)
}

/// Rows of the histogram, underflow and overflow bins included. Without
/// `full` only non-empty bins are listed.
fn histogram_rows(bins: &BTreeMap<u64, u64>, low: u64, high: u64, full: bool) -> Vec<(u64, u64)> {
    if !full {
        return bins.iter().map(|(&bin, &freq)| (bin, freq)).collect();
    }
    (low.saturating_sub(1)..=high.saturating_add(1))
        .map(|bin| (bin, bins.get(&bin).copied().unwrap_or(0)))
        .collect()
}

fn run_histo(file: &Path, low: u64, high: u64, full: bool) -> Result<()> {
    let bins = histogram(file, low, high)?;
    let mut out = open_output(None)?;
    for (bin, freq) in histogram_rows(&bins, low, high, full) {
        writeln!(out, "{} {}", bin, freq)?;
    }
    out.flush()?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_bc(
    mer_len: usize,
    expected: u64,
    fpr: f64,
    nb_hashes: Option<u32>,
    canonical: bool,
    seed: Option<u64>,
    output: &Path,
    files: &[PathBuf],
    cmdline: &[String],
) -> Result<()> {
    let codec = MerCodec::new(mer_len, canonical)?;
    let mut rng = match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    let bloom = match nb_hashes {
        Some(nb_hashes) => BloomCounter::new(
            optimal_size(expected, fpr),
            nb_hashes,
            codec.key_len_bits(),
            &mut rng,
        )?,
        None => BloomCounter::for_capacity(expected, fpr, codec.key_len_bits(), &mut rng)?,
    };
    info!(
        "Bloom counter: {} counters, {} hashes",
        bloom.size(),
        bloom.nb_hashes()
    );

    files.par_iter().try_for_each(|path| -> Result<()> {
        let mut reader = SequenceReader::open(path)?;
        while let Some(sequence) = reader.next_sequence()? {
            for key in codec.mers(&sequence) {
                bloom.insert(key);
            }
        }
        Ok(())
    })?;

    let mut header: FileHeader = bloom.header(canonical);
    header.fill_standard(cmdline);
    bloom
        .write(output, &header)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

fn run_info(file: &Path) -> Result<()> {
    let mut input = File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let (header, _) = FileHeader::read_from(&mut input, file)?;
    println!("{}", serde_json::to_string_pretty(&header)?);
    Ok(())
}

fn main() -> Result<()> {
    let cmdline: Vec<String> = std::env::args().collect();
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Merge {
            output,
            lower_count,
            upper_count,
            text,
            files,
        } => run_merge(&files, &output, lower_count, upper_count, text, &cmdline),
        Commands::Dump {
            lower_count,
            upper_count,
            column,
            tab,
            output,
            file,
        } => run_dump(&file, lower_count, upper_count, column, tab, output.as_deref()),
        Commands::Histo {
            low,
            high,
            full,
            file,
        } => run_histo(&file, low, high, full),
        Commands::Bc {
            mer_len,
            size,
            fpr,
            nb_hashes,
            canonical,
            seed,
            output,
            files,
        } => run_bc(mer_len, size, fpr, nb_hashes, canonical, seed, &output, &files, &cmdline),
        Commands::Info { file } => run_info(&file),
    }
}
