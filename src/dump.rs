//! Draining the counting table to files.

use crate::encode::MerCodec;
use crate::error::Result;
use crate::io::{FileHeader, Format, RecordWriter};
use crate::table::CountingTable;
use crate::utils::io::numbered_path;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Saturated keys reported individually before switching to a summary.
const SATURATION_REPORT_LIMIT: usize = 10;

/// Writes the contents of a table somewhere and empties it.
pub trait Dumper: Send {
    /// Writes every occupied slot with a non-zero count, then clears `table`.
    fn dump(&mut self, table: &mut CountingTable) -> Result<()>;

    /// The next dump is the only one and goes straight to the output path.
    fn one_file(&mut self, one_file: bool);

    /// Lower count bound applied to a single-file dump.
    fn min(&mut self, min: u64);

    /// Upper count bound applied to a single-file dump.
    fn max(&mut self, max: u64);

    /// Intermediate files written so far, in creation order.
    fn file_names(&self) -> &[PathBuf];

    fn nb_files(&self) -> usize {
        self.file_names().len()
    }
}

/// Outcome of one dump, kept for logging and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub records: u64,
    pub skipped_zero: u64,
    pub filtered: u64,
    pub saturated: u64,
    pub capped: u64,
}

/// Dumper writing binary or text record files.
#[derive(Debug)]
pub struct FileDumper {
    output: PathBuf,
    header: FileHeader,
    one_file: bool,
    min: u64,
    max: u64,
    files: Vec<PathBuf>,
    last: Option<DumpStats>,
}

impl FileDumper {
    /// Binary dumper. `header` supplies key length, output counter bytes,
    /// canonical flag and provenance.
    pub fn binary(output: &Path, header: &FileHeader) -> Self {
        Self::with_format(output, header, Format::BinaryUnsorted)
    }

    /// Text dumper (`KMER COUNT` lines).
    pub fn text(output: &Path, header: &FileHeader) -> Self {
        Self::with_format(output, header, Format::TextUnsorted)
    }

    fn with_format(output: &Path, header: &FileHeader, format: Format) -> Self {
        let mut header = header.clone();
        header.set_format(format);
        Self {
            output: output.to_path_buf(),
            header,
            one_file: false,
            min: 0,
            max: u64::MAX,
            files: Vec::new(),
            last: None,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Statistics of the most recent dump.
    pub fn last_stats(&self) -> Option<&DumpStats> {
        self.last.as_ref()
    }

    fn write_table(&self, path: &Path, table: &CountingTable) -> Result<DumpStats> {
        let mut header = self.header.clone();
        header.size = table.capacity();
        header.max_reprobe = table.max_reprobe() as u32;

        let codec = MerCodec::new(header.key_len as usize / 2, header.canonical)?;
        let mut writer = RecordWriter::create(path, &header)?;
        let (min, max) = if self.one_file {
            (self.min, self.max)
        } else {
            (0, u64::MAX)
        };

        let mut stats = DumpStats::default();
        for slot in table.slots() {
            if slot.count == 0 {
                stats.skipped_zero += 1;
                continue;
            }
            if slot.count < min || slot.count > max {
                stats.filtered += 1;
                continue;
            }
            if slot.saturated {
                stats.saturated += 1;
                if stats.saturated as usize <= SATURATION_REPORT_LIMIT {
                    warn!(
                        "Count of {} saturated at {} ({} bit counters)",
                        codec.decode(slot.key),
                        slot.count,
                        table.counter_len()
                    );
                } else {
                    debug!("Count of {} saturated at {}", codec.decode(slot.key), slot.count);
                }
            }
            if slot.count > writer.max_count() {
                stats.capped += 1;
            }
            writer.write(slot.key, slot.count)?;
        }
        stats.records = writer.finish()?;

        if stats.saturated as usize > SATURATION_REPORT_LIMIT {
            warn!(
                "{} keys saturated their counters in '{}'",
                stats.saturated,
                path.display()
            );
        }
        if stats.capped > 0 {
            warn!(
                "{} counts exceeded the {} byte output counter and were capped in '{}'",
                stats.capped,
                header.counter_len,
                path.display()
            );
        }
        Ok(stats)
    }
}

impl Dumper for FileDumper {
    fn dump(&mut self, table: &mut CountingTable) -> Result<()> {
        let path = if self.one_file {
            self.output.clone()
        } else {
            numbered_path(&self.output, self.files.len())
        };
        let stats = self.write_table(&path, table)?;
        debug!(
            "Dumped {} records to '{}' ({} zero-count slots skipped, {} filtered)",
            stats.records,
            path.display(),
            stats.skipped_zero,
            stats.filtered
        );
        if !self.one_file {
            self.files.push(path);
        }
        self.last = Some(stats);
        table.clear();
        Ok(())
    }

    fn one_file(&mut self, one_file: bool) {
        self.one_file = one_file;
    }

    fn min(&mut self, min: u64) {
        self.min = min;
    }

    fn max(&mut self, max: u64) {
        self.max = max;
    }

    fn file_names(&self) -> &[PathBuf] {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_all;
    use crate::table::TableParams;
    use tempfile::tempdir;

    fn filled_table() -> CountingTable {
        let table = CountingTable::new(TableParams {
            capacity: 64,
            ..TableParams::default()
        })
        .unwrap();
        table.add(1, 1);
        table.add(2, 5);
        table.add(3, 9);
        table.set(4);
        table
    }

    fn sorted(mut records: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
        records.sort_unstable();
        records
    }

    #[test]
    fn test_intermediate_dumps_are_numbered() -> Result<()> {
        let dir = tempdir().unwrap();
        let output = dir.path().join("counts.mc");
        let header = FileHeader::new(Format::BinaryUnsorted, 8, 4, false);
        let mut dumper = FileDumper::binary(&output, &header);
        dumper.min(3);

        let mut table = filled_table();
        dumper.dump(&mut table)?;
        assert_eq!(table.occupancy(), 0);
        table.add(7, 2);
        dumper.dump(&mut table)?;

        assert_eq!(dumper.nb_files(), 2);
        assert_eq!(dumper.file_names()[0], dir.path().join("counts.mc_0"));
        assert_eq!(dumper.file_names()[1], dir.path().join("counts.mc_1"));
        assert!(!output.exists());

        // Bounds only apply to a single final file; zero counts never appear
        let (header, records) = read_all(&dumper.file_names()[0])?;
        assert_eq!(header.size, 64);
        assert_eq!(sorted(records), vec![(1, 1), (2, 5), (3, 9)]);
        Ok(())
    }

    #[test]
    fn test_one_file_applies_bounds() -> Result<()> {
        let dir = tempdir().unwrap();
        let output = dir.path().join("counts.mc");
        let header = FileHeader::new(Format::BinaryUnsorted, 8, 4, false);
        let mut dumper = FileDumper::binary(&output, &header);
        dumper.one_file(true);
        dumper.min(2);
        dumper.max(6);

        let mut table = filled_table();
        dumper.dump(&mut table)?;
        assert_eq!(dumper.nb_files(), 0);
        let (_, records) = read_all(&output)?;
        assert_eq!(records, vec![(2, 5)]);
        assert_eq!(dumper.last_stats().unwrap().filtered, 2);
        Ok(())
    }

    #[test]
    fn test_text_dump() -> Result<()> {
        let dir = tempdir().unwrap();
        let output = dir.path().join("counts.txt");
        let header = FileHeader::new(Format::BinaryUnsorted, 8, 4, false);
        let mut dumper = FileDumper::text(&output, &header);
        dumper.one_file(true);

        let mut table = filled_table();
        dumper.dump(&mut table)?;
        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.contains("AAAC 1\n"));
        assert!(text.contains("AAAT 9\n"));
        assert!(!text.contains("AACA"));
        Ok(())
    }

    #[test]
    fn test_narrow_output_counter_caps() -> Result<()> {
        let dir = tempdir().unwrap();
        let output = dir.path().join("counts.mc");
        let header = FileHeader::new(Format::BinaryUnsorted, 8, 1, false);
        let mut dumper = FileDumper::binary(&output, &header);
        dumper.one_file(true);

        let mut table = filled_table();
        table.add(1, 1000);
        dumper.dump(&mut table)?;
        let (_, records) = read_all(&output)?;
        assert!(sorted(records).contains(&(1, 255)));
        assert_eq!(dumper.last_stats().unwrap().capped, 1);
        Ok(())
    }

    #[test]
    fn test_every_saturated_key_is_reported() -> Result<()> {
        let dir = tempdir().unwrap();
        let output = dir.path().join("counts.mc");
        let header = FileHeader::new(Format::BinaryUnsorted, 8, 4, false);
        let mut dumper = FileDumper::binary(&output, &header);
        dumper.one_file(true);

        let mut table = CountingTable::new(TableParams {
            capacity: 64,
            counter_len: 2,
            ..TableParams::default()
        })
        .unwrap();
        let nb_saturated = SATURATION_REPORT_LIMIT as u64 + 5;
        for key in 0..nb_saturated {
            table.add(key, 10);
        }
        table.add(100, 1);
        dumper.dump(&mut table)?;

        assert_eq!(dumper.last_stats().unwrap().saturated, nb_saturated);
        let (_, records) = read_all(&output)?;
        assert_eq!(records.len() as u64, nb_saturated + 1);
        assert!(records.iter().filter(|&&(k, _)| k < nb_saturated).all(|&(_, c)| c == 3));
        Ok(())
    }
}
