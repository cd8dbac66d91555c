//! `(key, count)` record codecs for dump and merge files.
//!
//! Binary records are the key in `ceil(key_len / 8)` bytes followed by the
//! count in `counter_len` bytes, both little-endian. Text records are one
//! `KMER COUNT` pair per line. Both follow a [`FileHeader`].

use super::header::{FileHeader, Format};
use crate::encode::MerCodec;
use crate::error::{MerError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Encoding {
    Binary { key_bytes: usize, counter_bytes: usize },
    Text { codec: MerCodec },
}

impl Encoding {
    fn from_header(header: &FileHeader, path: &Path) -> Result<Self> {
        let format = header.format_kind(path)?;
        if format == Format::BloomCounter {
            return Err(MerError::format(path, "Bloom counter file is not a k-mer count file"));
        }
        if header.key_len == 0 || header.key_len % 2 != 0 || header.key_len > 62 {
            return Err(MerError::format(
                path,
                format!("unsupported key length {} bits", header.key_len),
            ));
        }
        if format.is_text() {
            let codec = MerCodec::new(header.key_len as usize / 2, header.canonical)?;
            Ok(Encoding::Text { codec })
        } else {
            if header.counter_len == 0 || header.counter_len > 8 {
                return Err(MerError::format(
                    path,
                    format!("unsupported counter length {} bytes", header.counter_len),
                ));
            }
            Ok(Encoding::Binary {
                key_bytes: (header.key_len as usize + 7) / 8,
                counter_bytes: header.counter_len as usize,
            })
        }
    }
}

/// Largest count representable in `counter_bytes` bytes.
pub fn max_count_for_bytes(counter_bytes: u32) -> u64 {
    if counter_bytes >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * counter_bytes)) - 1
    }
}

/// Writes a header then records in the encoding it announces.
pub struct RecordWriter<W: Write> {
    out: W,
    encoding: Encoding,
    path: PathBuf,
    max_count: u64,
    records: u64,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: &Path, header: &FileHeader) -> Result<Self> {
        let out = crate::utils::io::open_file_for_writing(path)?;
        Self::new(out, header, path)
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(mut out: W, header: &FileHeader, path: &Path) -> Result<Self> {
        let encoding = Encoding::from_header(header, path)?;
        header
            .write_to(&mut out)
            .map_err(|e| MerError::io(path, "write header", e))?;
        let max_count = match encoding {
            Encoding::Binary { counter_bytes, .. } => max_count_for_bytes(counter_bytes as u32),
            Encoding::Text { .. } => u64::MAX,
        };
        Ok(Self {
            out,
            encoding,
            path: path.to_path_buf(),
            max_count,
            records: 0,
        })
    }

    /// Largest count this writer can store. Larger counts are capped.
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    pub fn write(&mut self, key: u64, count: u64) -> Result<()> {
        let count = count.min(self.max_count);
        let result = match &self.encoding {
            Encoding::Binary {
                key_bytes,
                counter_bytes,
            } => self
                .out
                .write_uint::<LittleEndian>(key, *key_bytes)
                .and_then(|_| self.out.write_uint::<LittleEndian>(count, *counter_bytes)),
            Encoding::Text { codec } => writeln!(self.out, "{} {}", codec.decode(key), count),
        };
        result.map_err(|e| MerError::io(&self.path, "write record", e))?;
        self.records += 1;
        Ok(())
    }

    /// Flushes and returns the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.out
            .flush()
            .map_err(|e| MerError::io(&self.path, "flush", e))?;
        Ok(self.records)
    }
}

/// Reads the header then streams records.
pub struct RecordReader<R: BufRead> {
    input: R,
    header: FileHeader,
    encoding: Encoding,
    path: PathBuf,
    line: String,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let input = crate::utils::io::open_file_for_reading(path)?;
        Self::new(input, path)
    }
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(mut input: R, path: &Path) -> Result<Self> {
        let (header, _) = FileHeader::read_from(&mut input, path)?;
        let encoding = Encoding::from_header(&header, path)?;
        Ok(Self {
            input,
            header,
            encoding,
            path: path.to_path_buf(),
            line: String::new(),
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next record, `None` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<(u64, u64)>> {
        match &self.encoding {
            Encoding::Binary {
                key_bytes,
                counter_bytes,
            } => {
                let at_end = self
                    .input
                    .fill_buf()
                    .map_err(|e| MerError::io(&self.path, "read record", e))?
                    .is_empty();
                if at_end {
                    return Ok(None);
                }
                let key = self.input.read_uint::<LittleEndian>(*key_bytes);
                let count = key.and_then(|k| {
                    self.input
                        .read_uint::<LittleEndian>(*counter_bytes)
                        .map(|c| (k, c))
                });
                match count {
                    Ok(record) => Ok(Some(record)),
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        Err(MerError::format(&self.path, "truncated record at end of file"))
                    }
                    Err(e) => Err(MerError::io(&self.path, "read record", e)),
                }
            }
            Encoding::Text { codec } => loop {
                self.line.clear();
                let n = self
                    .input
                    .read_line(&mut self.line)
                    .map_err(|e| MerError::io(&self.path, "read record", e))?;
                if n == 0 {
                    return Ok(None);
                }
                let line = self.line.trim();
                if line.is_empty() {
                    continue;
                }
                let mut fields = line.split_whitespace();
                let (mer, count) = match (fields.next(), fields.next(), fields.next()) {
                    (Some(mer), Some(count), None) => (mer, count),
                    _ => {
                        return Err(MerError::format(
                            &self.path,
                            format!("malformed text record '{}'", line),
                        ))
                    }
                };
                let key = codec.encode(mer.as_bytes()).map_err(|_| {
                    MerError::format(&self.path, format!("invalid k-mer '{}'", mer))
                })?;
                let count = count.parse::<u64>().map_err(|_| {
                    MerError::format(&self.path, format!("invalid count '{}'", count))
                })?;
                return Ok(Some((key, count)));
            },
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Loads every record of a file along with its header.
pub fn read_all(path: &Path) -> Result<(FileHeader, Vec<(u64, u64)>)> {
    let mut reader = RecordReader::open(path)?;
    let mut records = Vec::new();
    while let Some(record) = reader.next_record()? {
        records.push(record);
    }
    Ok((reader.header, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn header(format: Format, counter_len: u32) -> FileHeader {
        FileHeader::new(format, 8, counter_len, false)
    }

    #[test]
    fn test_binary_records() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_0");
        let mut writer = RecordWriter::create(&path, &header(Format::BinaryUnsorted, 2))?;
        assert_eq!(writer.max_count(), 65535);
        writer.write(0b00_01_10_11, 2)?;
        writer.write(0b11_11_11_11, 70000)?;
        assert_eq!(writer.finish()?, 2);

        let (back, records) = read_all(&path)?;
        assert_eq!(back.counter_len, 2);
        assert_eq!(records, vec![(0b00_01_10_11, 2), (0xff, 65535)]);
        Ok(())
    }

    #[test]
    fn test_text_records() -> Result<()> {
        let mut bytes = Vec::new();
        let mut writer = RecordWriter::new(&mut bytes, &header(Format::TextSorted, 4), Path::new("mem"))?;
        writer.write(0b00_01_10_11, 7)?;
        writer.finish()?;

        let text = String::from_utf8_lossy(&bytes).to_string();
        assert!(text.ends_with("ACGT 7\n"));

        let reader = RecordReader::new(Cursor::new(bytes), Path::new("mem"))?;
        let records: Vec<(u64, u64)> = reader.collect::<Result<_>>()?;
        assert_eq!(records, vec![(0b00_01_10_11, 7)]);
        Ok(())
    }

    #[test]
    fn test_truncated_binary_record() -> Result<()> {
        let mut bytes = Vec::new();
        let mut writer = RecordWriter::new(&mut bytes, &header(Format::BinarySorted, 4), Path::new("mem"))?;
        writer.write(1, 1)?;
        writer.finish()?;
        bytes.truncate(bytes.len() - 2);

        let mut reader = RecordReader::new(Cursor::new(bytes), Path::new("mem"))?;
        assert!(matches!(reader.next_record(), Err(MerError::Format { .. })));
        Ok(())
    }

    #[test]
    fn test_bloom_file_is_not_a_count_file() {
        let mut bytes = Vec::new();
        FileHeader::new(Format::BloomCounter, 8, 1, false)
            .write_to(&mut bytes)
            .unwrap();
        assert!(matches!(
            RecordReader::new(Cursor::new(bytes), Path::new("filter.bc")),
            Err(MerError::Format { .. })
        ));
    }
}
