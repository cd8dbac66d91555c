//! Self-describing header shared by dump files, merged outputs and Bloom
//! counter files.
//!
//! On disk a header is nine ASCII decimal digits giving the length of the JSON
//! document that follows, the JSON document itself, then `\n` padding so the
//! payload starts on an 8-byte boundary.

use crate::error::{MerError, Result};
use crate::utils::hash::{BinaryMatrix, HashPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

const LENGTH_DIGITS: usize = 9;
const ALIGNMENT: usize = 8;

/// Payload encodings a header can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    BinaryUnsorted,
    BinarySorted,
    TextUnsorted,
    TextSorted,
    BloomCounter,
}

impl Format {
    pub fn tag(&self) -> &'static str {
        match self {
            Format::BinaryUnsorted => "binary/unsorted",
            Format::BinarySorted => "binary/sorted",
            Format::TextUnsorted => "text/unsorted",
            Format::TextSorted => "text/sorted",
            Format::BloomCounter => "bloomcounter",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "binary/unsorted" => Some(Format::BinaryUnsorted),
            "binary/sorted" => Some(Format::BinarySorted),
            "text/unsorted" => Some(Format::TextUnsorted),
            "text/sorted" => Some(Format::TextSorted),
            "bloomcounter" => Some(Format::BloomCounter),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Format::TextUnsorted | Format::TextSorted)
    }

    pub fn is_sorted(&self) -> bool {
        matches!(self, Format::BinarySorted | Format::TextSorted)
    }

    /// Same encoding with the given ordering. Bloom counters have no ordering.
    pub fn with_sorted(self, sorted: bool) -> Self {
        match (self, sorted) {
            (Format::BinaryUnsorted | Format::BinarySorted, true) => Format::BinarySorted,
            (Format::BinaryUnsorted | Format::BinarySorted, false) => Format::BinaryUnsorted,
            (Format::TextUnsorted | Format::TextSorted, true) => Format::TextSorted,
            (Format::TextUnsorted | Format::TextSorted, false) => Format::TextUnsorted,
            (Format::BloomCounter, _) => Format::BloomCounter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Format tag, see [`Format::tag`].
    pub format: String,
    /// Key width in bits (2k).
    pub key_len: u32,
    /// Count width in bytes of binary records.
    pub counter_len: u32,
    pub canonical: bool,
    #[serde(default)]
    pub cmdline: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe_path: Option<String>,
    /// Table capacity for dumps, counter count for Bloom counters.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub max_reprobe: u32,
    #[serde(default)]
    pub nb_hashes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix1: Option<BinaryMatrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix2: Option<BinaryMatrix>,
}

impl FileHeader {
    pub fn new(format: Format, key_len: u32, counter_len: u32, canonical: bool) -> Self {
        Self {
            format: format.tag().to_string(),
            key_len,
            counter_len,
            canonical,
            cmdline: Vec::new(),
            hostname: None,
            pwd: None,
            time: None,
            exe_path: None,
            size: 0,
            max_reprobe: 0,
            nb_hashes: 0,
            matrix1: None,
            matrix2: None,
        }
    }

    /// Records the command line, host, working directory, executable and
    /// current time.
    pub fn fill_standard(&mut self, cmdline: &[String]) {
        self.cmdline = cmdline.to_vec();
        self.hostname = std::fs::read_to_string("/etc/hostname")
            .ok()
            .map(|h| h.trim().to_string())
            .or_else(|| std::env::var("HOSTNAME").ok());
        self.pwd = std::env::current_dir()
            .ok()
            .map(|p| p.display().to_string());
        self.exe_path = std::env::current_exe()
            .ok()
            .map(|p| p.display().to_string());
        self.time = Some(Utc::now());
    }

    pub fn set_matrices(&mut self, hashes: &HashPair) {
        self.matrix1 = Some(hashes.first.clone());
        self.matrix2 = Some(hashes.second.clone());
    }

    pub fn matrices(&self) -> Option<HashPair> {
        match (&self.matrix1, &self.matrix2) {
            (Some(m1), Some(m2)) => Some(HashPair::new(m1.clone(), m2.clone())),
            _ => None,
        }
    }

    /// Parsed format tag, `MerError::Format` if unknown.
    pub fn format_kind(&self, path: &Path) -> Result<Format> {
        Format::from_tag(&self.format).ok_or_else(|| {
            MerError::format(path, format!("unknown format tag '{}'", self.format))
        })
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format.tag().to_string();
    }

    /// Writes the framed header and returns the number of bytes written.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<u64> {
        let json = serde_json::to_vec(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write!(out, "{:0width$}", json.len(), width = LENGTH_DIGITS)?;
        out.write_all(&json)?;
        let padding = padding_for(LENGTH_DIGITS + json.len());
        out.write_all(&b"\n\n\n\n\n\n\n\n"[..padding])?;
        Ok((LENGTH_DIGITS + json.len() + padding) as u64)
    }

    /// Reads a framed header. `path` is only used for error context.
    pub fn read_from<R: Read>(input: &mut R, path: &Path) -> Result<(Self, u64)> {
        let mut digits = [0u8; LENGTH_DIGITS];
        input
            .read_exact(&mut digits)
            .map_err(|e| short_or_io(e, path, LENGTH_DIGITS as u64))?;
        let len: usize = std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MerError::format(path, "missing header length"))?;

        let mut json = Vec::new();
        input
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut json)
            .map_err(|e| MerError::io(path, "read header", e))?;
        if json.len() < len {
            return Err(MerError::TruncatedFile {
                path: path.to_path_buf(),
                expected: (LENGTH_DIGITS + len) as u64,
                actual: (LENGTH_DIGITS + json.len()) as u64,
            });
        }
        let header: FileHeader = serde_json::from_slice(&json)
            .map_err(|e| MerError::format(path, format!("invalid header: {}", e)))?;

        let padding = padding_for(LENGTH_DIGITS + len);
        let mut pad = [0u8; ALIGNMENT];
        input
            .read_exact(&mut pad[..padding])
            .map_err(|e| short_or_io(e, path, (LENGTH_DIGITS + len + padding) as u64))?;

        Ok((header, (LENGTH_DIGITS + len + padding) as u64))
    }
}

fn padding_for(len: usize) -> usize {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

fn short_or_io(e: std::io::Error, path: &Path, expected: u64) -> MerError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        let actual = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        MerError::TruncatedFile {
            path: path.to_path_buf(),
            expected,
            actual,
        }
    } else {
        MerError::io(path, "read header", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_format_tags() {
        for format in [
            Format::BinaryUnsorted,
            Format::BinarySorted,
            Format::TextUnsorted,
            Format::TextSorted,
            Format::BloomCounter,
        ] {
            assert_eq!(Format::from_tag(format.tag()), Some(format));
        }
        assert_eq!(Format::from_tag("jellyfish"), None);
        assert_eq!(Format::TextUnsorted.with_sorted(true), Format::TextSorted);
        assert!(Format::BinarySorted.is_sorted());
        assert!(!Format::BinarySorted.is_text());
    }

    #[test]
    fn test_header_is_aligned_and_readable() -> Result<()> {
        let mut header = FileHeader::new(Format::BinaryUnsorted, 42, 4, true);
        header.fill_standard(&["mercount".to_string(), "-m".to_string(), "21".to_string()]);
        header.size = 1024;

        let mut bytes = Vec::new();
        let written = header.write_to(&mut bytes).unwrap();
        assert_eq!(written as usize, bytes.len());
        assert_eq!(bytes.len() % ALIGNMENT, 0);

        bytes.extend_from_slice(b"payload");
        let mut cursor = Cursor::new(bytes);
        let (back, offset) = FileHeader::read_from(&mut cursor, Path::new("mem"))?;
        assert_eq!(offset, written);
        assert_eq!(back, header);

        let mut rest = String::new();
        cursor.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "payload");
        Ok(())
    }

    #[test]
    fn test_garbage_header_is_format_error() {
        let mut cursor = Cursor::new(b"not a header at all".to_vec());
        match FileHeader::read_from(&mut cursor, Path::new("bad")) {
            Err(MerError::Format { .. }) => {}
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_length_beyond_input_is_truncation() {
        let mut bytes = b"999999999".to_vec();
        bytes.extend_from_slice(b"{\"format\":");
        let mut cursor = Cursor::new(bytes);
        match FileHeader::read_from(&mut cursor, Path::new("short")) {
            Err(MerError::TruncatedFile { expected, actual, .. }) => {
                assert_eq!(expected, 9 + 999_999_999);
                assert_eq!(actual, 9 + 10);
            }
            other => panic!("expected truncated file, got {:?}", other),
        }
    }

    #[test]
    fn test_matrices_round_trip() {
        let mut rng = fastrand::Rng::with_seed(5);
        let pair = HashPair::random(10, &mut rng);
        let mut header = FileHeader::new(Format::BloomCounter, 10, 1, false);
        assert!(header.matrices().is_none());
        header.set_matrices(&pair);
        assert_eq!(header.matrices(), Some(pair));
    }
}
