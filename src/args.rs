use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// mercount: concurrent k-mer counting.
///
/// Counts every k-mer of the input FASTA/FASTQ files with a fixed-size hash
/// table shared by all threads. When the table fills up it either grows or is
/// written to disk, in which case the intermediate files are merged into the
/// final output at the end.
#[derive(Parser, Debug, Clone, Serialize, Deserialize, Default)]
#[command(author, version, about, long_about = None)]
#[command(help_template = "\n{before-help}{name} {version}\n{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}\n")]
pub struct CountArgs {
    /// Input FASTA or FASTQ files.
    #[clap(value_parser)]
    pub files: Vec<PathBuf>,

    /// Length of the k-mers (1 to 31).
    #[clap(short = 'm', long, value_parser)]
    pub mer_len: usize,

    /// Initial hash table size, in entries. Accepts k, M and G suffixes.
    #[clap(short = 's', long, value_parser = parse_size)]
    pub size: u64,

    /// Number of counting threads. Defaults to the number of CPUs.
    #[clap(short = 't', long, value_parser)]
    pub threads: Option<usize>,

    /// Output file.
    #[clap(short = 'o', long, value_parser, default_value = "mer_counts.mc")]
    pub output: PathBuf,

    /// Bits per count stored in the hash table (1 to 32).
    ///
    /// Counts above 2^bits - 1 are capped and reported as saturated.
    #[clap(short = 'c', long, value_parser, default_value_t = 32)]
    pub counter_len: u32,

    /// Bytes per count in the binary output (1 to 8).
    #[clap(long, value_parser, default_value_t = 4)]
    pub out_counter_len: u32,

    /// Maximum number of reprobes when looking for a slot.
    #[clap(short = 'p', long, value_parser, default_value_t = 126)]
    pub reprobes: usize,

    /// Count canonical k-mers: a k-mer and its reverse complement are the same key.
    #[clap(short = 'C', long, action)]
    pub canonical: bool,

    /// Write text output (`KMER COUNT` lines) instead of binary.
    #[clap(long, action)]
    pub text: bool,

    /// Never grow the hash table: write it to disk when it is full.
    #[clap(long, action)]
    pub disk: bool,

    /// Grow the hash table up to this many entries, then write to disk.
    /// Accepts k, M and G suffixes.
    #[clap(long, value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Do not output k-mers with a count below this value.
    #[clap(short = 'L', long, value_parser)]
    pub lower_count: Option<u64>,

    /// Do not output k-mers with a count above this value.
    #[clap(short = 'U', long, value_parser)]
    pub upper_count: Option<u64>,

    /// Bloom counter file: only count k-mers it has seen more than once.
    #[clap(long = "bf", value_parser)]
    pub bloom_filter: Option<PathBuf>,

    /// Bloom estimate a k-mer must exceed to be counted.
    #[clap(long, value_parser, default_value_t = 1)]
    pub bf_threshold: u8,

    /// Intersection files: only k-mers present in these files are counted.
    #[clap(long = "if", value_parser)]
    pub intersection: Vec<PathBuf>,

    /// Number of files read concurrently.
    #[clap(short = 'F', long = "files", value_parser, default_value_t = 1)]
    pub concurrent_files: usize,

    /// File of commands generating sequences on their standard output.
    #[clap(short = 'g', long, value_parser)]
    pub generator: Option<PathBuf>,

    /// Number of generator commands run concurrently.
    #[clap(short = 'G', long = "generators", value_parser, default_value_t = 1)]
    pub concurrent_generators: usize,

    /// Shell used to run the generator commands (default /bin/sh).
    #[clap(short = 'S', long, value_parser)]
    pub shell: Option<PathBuf>,

    /// Write Init, Counting and Writing phase durations to this file.
    #[clap(long, value_parser)]
    pub timing: Option<PathBuf>,

    /// Leave the intermediate files unmerged.
    #[clap(long, action)]
    pub no_merge: bool,

    /// Keep the intermediate files after merging.
    #[clap(long, action)]
    pub no_unlink: bool,

    /// Count but do not write any output.
    #[clap(long, action)]
    pub no_write: bool,

    /// Log progress to stderr.
    #[clap(short, long, action)]
    pub verbose: bool,
}

/// Parses a count with an optional `k`, `M` or `G` suffix (powers of 1000).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1_000u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1_000_000),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1_000_000_000),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", s))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1000"), Ok(1000));
        assert_eq!(parse_size("10k"), Ok(10_000));
        assert_eq!(parse_size("2M"), Ok(2_000_000));
        assert_eq!(parse_size("1G"), Ok(1_000_000_000));
        assert!(parse_size("abc").is_err());
        assert!(parse_size("").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn test_parse_count_args() {
        let args = CountArgs::try_parse_from([
            "mercount", "-m", "21", "-s", "100M", "-t", "4", "-C", "--bf", "filter.bc", "-L", "2",
            "reads.fa", "more.fq",
        ])
        .unwrap();
        assert_eq!(args.mer_len, 21);
        assert_eq!(args.size, 100_000_000);
        assert_eq!(args.threads, Some(4));
        assert!(args.canonical);
        assert_eq!(args.bloom_filter, Some(PathBuf::from("filter.bc")));
        assert_eq!(args.lower_count, Some(2));
        assert_eq!(args.output, PathBuf::from("mer_counts.mc"));
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_missing_required_args() {
        assert!(CountArgs::try_parse_from(["mercount", "reads.fa"]).is_err());
    }
}
