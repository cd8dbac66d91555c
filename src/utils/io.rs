use crate::error::{MerError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Open a file for reading
pub fn open_file_for_reading(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| MerError::io(path, "open", e))?;
    Ok(BufReader::new(file))
}

/// Open a file for writing, creating its parent directory if needed
pub fn open_file_for_writing(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MerError::io(parent, "create directory", e))?;
        }
    }

    let file = File::create(path).map_err(|e| MerError::io(path, "create", e))?;
    Ok(BufWriter::new(file))
}

/// Non-empty lines of a file with `#` comments removed.
pub fn read_command_lines(path: &Path) -> Result<Vec<String>> {
    let reader = open_file_for_reading(path)?;
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| MerError::io(path, "read", e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(trimmed.to_string());
    }
    Ok(lines)
}

/// Path of the `index`-th intermediate file for `output`: `<output>_<index>`.
pub fn numbered_path(output: &Path, index: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!("_{}", index));
    PathBuf::from(name)
}

/// Remove a file, logging instead of failing if it cannot be removed.
pub fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("Could not remove '{}': {}", path.display(), e);
    }
}
