use crate::error::{MerError, Result};
use bio::io::{fasta, fastq};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

type SequenceIter = Box<dyn Iterator<Item = std::result::Result<Vec<u8>, String>> + Send>;

/// Streams sequences out of a FASTA or FASTQ source.
///
/// The format is picked from the first byte of the stream: `>` for FASTA,
/// `@` for FASTQ. An empty stream yields no sequences.
pub struct SequenceReader {
    records: Option<SequenceIter>,
    source: String,
    sequences: u64,
    bases: u64,
}

impl SequenceReader {
    /// Wraps any byte stream. `source` names it in error messages.
    pub fn new(input: Box<dyn Read + Send>, source: &str) -> Result<Self> {
        let mut input = BufReader::new(input);
        let first = input
            .fill_buf()
            .map_err(|e| MerError::io(source, "read", e))?
            .first()
            .copied();

        let records: Option<SequenceIter> = match first {
            None => None,
            Some(b'>') => Some(Box::new(
                fasta::Reader::from_bufread(input)
                    .records()
                    .map(|r| r.map(|rec| rec.seq().to_vec()).map_err(|e| e.to_string())),
            )),
            Some(b'@') => Some(Box::new(
                fastq::Reader::from_bufread(input)
                    .records()
                    .map(|r| r.map(|rec| rec.seq().to_vec()).map_err(|e| e.to_string())),
            )),
            Some(other) => {
                return Err(MerError::format(
                    source,
                    format!(
                        "expected FASTA ('>') or FASTQ ('@') input, found '{}'",
                        other.escape_ascii()
                    ),
                ))
            }
        };

        Ok(Self {
            records,
            source: source.to_string(),
            sequences: 0,
            bases: 0,
        })
    }

    /// Opens a sequence file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| MerError::io(path, "open", e))?;
        Self::new(Box::new(file), &path.display().to_string())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Sequences and bases read so far.
    pub fn totals(&self) -> (u64, u64) {
        (self.sequences, self.bases)
    }

    /// Next sequence, `None` at end of stream.
    pub fn next_sequence(&mut self) -> Result<Option<Vec<u8>>> {
        let records = match self.records.as_mut() {
            Some(records) => records,
            None => return Ok(None),
        };
        match records.next() {
            None => {
                self.records = None;
                Ok(None)
            }
            Some(Ok(seq)) => {
                self.sequences += 1;
                self.bases += seq.len() as u64;
                Ok(Some(seq))
            }
            Some(Err(e)) => Err(MerError::format(
                &self.source,
                format!("malformed sequence record: {}", e),
            )),
        }
    }

    /// Appends sequences to `batch` until at least `max_bases` bases were
    /// added or the stream ended. Returns `false` once the stream is exhausted.
    pub fn read_batch(&mut self, max_bases: usize, batch: &mut Vec<Vec<u8>>) -> Result<bool> {
        let mut added = 0;
        while added < max_bases.max(1) {
            match self.next_sequence()? {
                Some(seq) => {
                    added += seq.len();
                    batch.push(seq);
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

/// Reads every sequence of a file.
pub fn read_sequences(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = SequenceReader::open(path)?;
    let mut sequences = Vec::new();
    while let Some(seq) = reader.next_sequence()? {
        sequences.push(seq);
    }
    Ok(sequences)
}
