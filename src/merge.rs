//! External k-way merge of dump files.
//!
//! Dumps are written in table slot order, which is not key order. Each input
//! is first normalised into a key-sorted run (`sort_run`), then the sorted
//! runs are merged through a min-heap: identical keys from different runs
//! are summed and one record per distinct key is written if its total lies
//! within `[min, max]`.

use crate::error::{MerError, Result};
use crate::io::{FileHeader, Format, RecordReader, RecordWriter};
use crate::utils::io::remove_file_quietly;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inputs: usize,
    /// Distinct keys seen across all inputs.
    pub distinct_keys: u64,
    pub records_written: u64,
    /// Distinct keys dropped by the count bounds.
    pub filtered: u64,
    /// Sum of the counts written.
    pub total_count: u64,
}

/// Sorted runs created for the merge, removed when dropped.
struct TempRuns(Vec<PathBuf>);

impl Drop for TempRuns {
    fn drop(&mut self) {
        for path in &self.0 {
            remove_file_quietly(path);
        }
    }
}

/// Path of the sorted copy of `path`.
pub fn sorted_run_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sorted");
    PathBuf::from(name)
}

/// Loads one run, sorts it by key and writes it as a sorted binary file next
/// to the input. Returns the path of the sorted run.
pub fn sort_run(path: &Path) -> Result<PathBuf> {
    let (header, mut records) = crate::io::read_all(path)?;
    records.par_sort_unstable_by_key(|&(key, _)| key);

    let mut sorted_header = header.clone();
    sorted_header.set_format(Format::BinarySorted);
    if header.format_kind(path)?.is_text() {
        sorted_header.counter_len = 8;
    }

    let target = sorted_run_path(path);
    let mut writer = RecordWriter::create(&target, &sorted_header)?;
    for &(key, count) in &records {
        writer.write(key, count)?;
    }
    let written = writer.finish()?;
    debug!("Sorted {} records of '{}'", written, path.display());
    Ok(target)
}

/// Merges dump files into `output`, written key-sorted in the encoding named
/// by `header` (binary or text). Every failure is reported as
/// `MerError::Merge`. The inputs are left in place.
pub fn merge_files(
    files: &[PathBuf],
    output: &Path,
    header: &FileHeader,
    min: u64,
    max: u64,
) -> Result<MergeSummary> {
    merge_inner(files, output, header, min, max).map_err(MerError::into_merge)
}

fn check_compatible(first: &FileHeader, first_path: &Path, other: &FileHeader, path: &Path) -> Result<()> {
    let mismatch = |field: &str, a: String, b: String| {
        MerError::merge(format!(
            "'{}' has {} {} but '{}' has {}",
            path.display(),
            field,
            b,
            first_path.display(),
            a
        ))
    };
    if other.key_len != first.key_len {
        return Err(mismatch("key length", first.key_len.to_string(), other.key_len.to_string()));
    }
    if other.counter_len != first.counter_len {
        return Err(mismatch(
            "counter length",
            first.counter_len.to_string(),
            other.counter_len.to_string(),
        ));
    }
    if other.canonical != first.canonical {
        return Err(mismatch(
            "canonical flag",
            first.canonical.to_string(),
            other.canonical.to_string(),
        ));
    }
    Ok(())
}

fn merge_inner(
    files: &[PathBuf],
    output: &Path,
    header: &FileHeader,
    min: u64,
    max: u64,
) -> Result<MergeSummary> {
    if files.is_empty() {
        return Err(MerError::merge("no input files to merge"));
    }
    if min > max {
        return Err(MerError::merge(format!(
            "lower count bound {} is above upper bound {}",
            min, max
        )));
    }

    // Check every header before doing any work
    let mut formats = Vec::with_capacity(files.len());
    let mut first: Option<FileHeader> = None;
    for path in files {
        let reader = RecordReader::open(path)?;
        let input_header = reader.header().clone();
        match &first {
            None => first = Some(input_header.clone()),
            Some(first_header) => check_compatible(first_header, &files[0], &input_header, path)?,
        }
        formats.push(input_header.format_kind(path)?);
    }
    if let Some(first_header) = &first {
        if first_header.key_len != header.key_len {
            return Err(MerError::merge(format!(
                "inputs have key length {} but the output header has {}",
                first_header.key_len, header.key_len
            )));
        }
    }

    let mut temp_runs = TempRuns(Vec::new());
    let mut runs = Vec::with_capacity(files.len());
    for (path, format) in files.iter().zip(&formats) {
        if format.is_sorted() {
            runs.push(path.clone());
        } else {
            let sorted = sort_run(path)?;
            temp_runs.0.push(sorted.clone());
            runs.push(sorted);
        }
    }

    let mut readers: Vec<RecordReader<BufReader<File>>> = runs
        .iter()
        .map(|p| RecordReader::open(p))
        .collect::<Result<_>>()?;

    let mut out_header = header.clone();
    out_header.set_format(header.format_kind(output)?.with_sorted(true));
    let mut writer = RecordWriter::create(output, &out_header)?;

    let mut heap: BinaryHeap<Reverse<(u64, u64, usize)>> = BinaryHeap::with_capacity(readers.len());
    for (idx, reader) in readers.iter_mut().enumerate() {
        if let Some((key, count)) = reader.next_record()? {
            heap.push(Reverse((key, count, idx)));
        }
    }

    let mut summary = MergeSummary {
        inputs: files.len(),
        ..MergeSummary::default()
    };
    let mut current: Option<(u64, u64)> = None;
    let mut last_popped = vec![None::<u64>; readers.len()];

    while let Some(Reverse((key, count, idx))) = heap.pop() {
        if let Some(previous) = last_popped[idx] {
            if key < previous {
                return Err(MerError::merge(format!(
                    "'{}' is not sorted by key",
                    runs[idx].display()
                )));
            }
        }
        last_popped[idx] = Some(key);

        current = match current {
            Some((k, total)) if k == key => Some((k, total.saturating_add(count))),
            Some((k, total)) => {
                emit(&mut writer, &mut summary, k, total, min, max)?;
                Some((key, count))
            }
            None => Some((key, count)),
        };

        if let Some((next_key, next_count)) = readers[idx].next_record()? {
            heap.push(Reverse((next_key, next_count, idx)));
        }
    }
    if let Some((k, total)) = current {
        emit(&mut writer, &mut summary, k, total, min, max)?;
    }
    writer.finish()?;
    drop(temp_runs);

    info!(
        "Merged {} files into '{}': {} distinct keys, {} written",
        summary.inputs,
        output.display(),
        summary.distinct_keys,
        summary.records_written
    );
    Ok(summary)
}

fn emit<W: std::io::Write>(
    writer: &mut RecordWriter<W>,
    summary: &mut MergeSummary,
    key: u64,
    count: u64,
    min: u64,
    max: u64,
) -> Result<()> {
    summary.distinct_keys += 1;
    if count < min || count > max {
        summary.filtered += 1;
        return Ok(());
    }
    if count > writer.max_count() {
        warn!("Merged count {} exceeds the output counter and was capped", count);
    }
    writer.write(key, count)?;
    summary.records_written += 1;
    summary.total_count = summary.total_count.saturating_add(count.min(writer.max_count()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_all;
    use tempfile::tempdir;

    fn write_run(path: &Path, format: Format, records: &[(u64, u64)]) {
        let header = FileHeader::new(format, 8, 4, false);
        let mut writer = RecordWriter::create(path, &header).unwrap();
        for &(k, c) in records {
            writer.write(k, c).unwrap();
        }
        writer.finish().unwrap();
    }

    fn out_header() -> FileHeader {
        FileHeader::new(Format::BinaryUnsorted, 8, 4, false)
    }

    #[test]
    fn test_sort_run() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_0");
        write_run(&path, Format::BinaryUnsorted, &[(9, 1), (2, 4), (5, 3)]);

        let sorted = sort_run(&path)?;
        assert_eq!(sorted, dir.path().join("run_0.sorted"));
        let (header, records) = read_all(&sorted)?;
        assert_eq!(header.format, "binary/sorted");
        assert_eq!(records, vec![(2, 4), (5, 3), (9, 1)]);
        Ok(())
    }

    #[test]
    fn test_merge_sums_and_filters() -> Result<()> {
        let dir = tempdir().unwrap();
        let a = dir.path().join("run_0");
        let b = dir.path().join("run_1");
        let out = dir.path().join("merged.mc");
        write_run(&a, Format::BinaryUnsorted, &[(9, 1), (2, 4), (5, 3)]);
        write_run(&b, Format::BinaryUnsorted, &[(5, 2), (7, 1), (2, 1)]);

        let summary = merge_files(&[a.clone(), b.clone()], &out, &out_header(), 2, 10)?;
        assert_eq!(summary.distinct_keys, 4);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.filtered, 2);

        let (header, records) = read_all(&out)?;
        assert_eq!(header.format, "binary/sorted");
        assert_eq!(records, vec![(2, 5), (5, 5)]);

        // Inputs stay, temporary sorted runs do not
        assert!(a.exists() && b.exists());
        assert!(!sorted_run_path(&a).exists());
        assert!(!sorted_run_path(&b).exists());
        Ok(())
    }

    #[test]
    fn test_single_input_is_idempotent() -> Result<()> {
        let dir = tempdir().unwrap();
        let a = dir.path().join("run_0");
        let out = dir.path().join("merged.mc");
        let records = vec![(40, 2), (3, 1), (17, 6)];
        write_run(&a, Format::BinaryUnsorted, &records);

        merge_files(&[a], &out, &out_header(), 0, u64::MAX)?;
        let (_, merged) = read_all(&out)?;
        let mut expected = records.clone();
        expected.sort_unstable();
        assert_eq!(merged, expected);
        Ok(())
    }

    #[test]
    fn test_text_output_and_text_input() -> Result<()> {
        let dir = tempdir().unwrap();
        let a = dir.path().join("run_0");
        let b = dir.path().join("run_1.txt");
        let out = dir.path().join("merged.txt");
        write_run(&a, Format::BinaryUnsorted, &[(0b00_01_10_11, 1)]);
        write_run(&b, Format::TextUnsorted, &[(0b00_01_10_11, 2), (0, 1)]);

        let mut header = out_header();
        header.set_format(Format::TextUnsorted);
        merge_files(&[a, b], &out, &header, 0, u64::MAX)?;
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.ends_with("AAAA 1\nACGT 3\n"));
        Ok(())
    }

    #[test]
    fn test_header_mismatch_is_merge_error() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("run_0");
        let b = dir.path().join("run_1");
        write_run(&a, Format::BinaryUnsorted, &[(1, 1)]);
        let header = FileHeader::new(Format::BinaryUnsorted, 8, 4, true);
        let mut writer = RecordWriter::create(&b, &header).unwrap();
        writer.write(1, 1).unwrap();
        writer.finish().unwrap();

        let err = merge_files(&[a, b], &dir.path().join("out"), &out_header(), 0, u64::MAX).unwrap_err();
        match err {
            MerError::Merge { message } => assert!(message.contains("canonical")),
            other => panic!("expected merge error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_input_is_merge_error() {
        let dir = tempdir().unwrap();
        let err = merge_files(
            &[dir.path().join("absent")],
            &dir.path().join("out"),
            &out_header(),
            0,
            u64::MAX,
        )
        .unwrap_err();
        assert!(matches!(err, MerError::Merge { .. }));
        assert!(merge_files(&[], &dir.path().join("out"), &out_header(), 0, 1).is_err());
    }
}
