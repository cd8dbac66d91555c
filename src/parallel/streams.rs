//! Sharing input streams between workers.
//!
//! Pending sources wait on two queues, one of files and one of generator
//! commands. A fixed number of stream slots is open at a time, the first
//! `concurrent_files` for files and the rest for generators. Each slot sits
//! behind its own mutex so two workers never parse the same stream at once,
//! while workers on different slots proceed independently.

use super::generator::GeneratorManager;
use crate::error::Result;
use crate::fasta::SequenceReader;
use crossbeam_channel::{unbounded, Receiver};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Bases handed to a worker per batch.
pub const DEFAULT_BATCH_BASES: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    Command(String),
}

pub struct StreamManager {
    files: Receiver<InputSource>,
    commands: Receiver<InputSource>,
    slots: Vec<Mutex<Option<SequenceReader>>>,
    nb_file_slots: usize,
    generators: Option<Arc<GeneratorManager>>,
    batch_bases: usize,
    sequences: AtomicU64,
    bases: AtomicU64,
}

impl StreamManager {
    /// Files only.
    pub fn from_files(files: &[PathBuf], concurrent_files: usize) -> Self {
        Self::new(files, concurrent_files, None, 0)
    }

    pub fn new(
        files: &[PathBuf],
        concurrent_files: usize,
        generators: Option<Arc<GeneratorManager>>,
        concurrent_generators: usize,
    ) -> Self {
        let (file_tx, file_rx) = unbounded();
        for path in files {
            // The receiver is alive, sending cannot fail
            let _ = file_tx.send(InputSource::File(path.clone()));
        }

        let (command_tx, command_rx) = unbounded();
        let nb_commands = generators.as_ref().map_or(0, |g| g.commands().len());
        if let Some(manager) = &generators {
            for command in manager.commands() {
                let _ = command_tx.send(InputSource::Command(command.clone()));
            }
        }

        let nb_file_slots = concurrent_files.max(1).min(files.len());
        let nb_command_slots = concurrent_generators.max(1).min(nb_commands);
        let slots = (0..nb_file_slots + nb_command_slots)
            .map(|_| Mutex::new(None))
            .collect();

        Self {
            files: file_rx,
            commands: command_rx,
            slots,
            nb_file_slots,
            generators,
            batch_bases: DEFAULT_BATCH_BASES,
            sequences: AtomicU64::new(0),
            bases: AtomicU64::new(0),
        }
    }

    pub fn with_batch_bases(mut self, batch_bases: usize) -> Self {
        self.batch_bases = batch_bases.max(1);
        self
    }

    pub fn nb_slots(&self) -> usize {
        self.slots.len()
    }

    /// Sequences and bases read from closed streams.
    pub fn totals(&self) -> (u64, u64) {
        (self.sequences.load(Ordering::Relaxed), self.bases.load(Ordering::Relaxed))
    }

    fn open_next(&self, slot: usize) -> Result<Option<SequenceReader>> {
        let queue = if slot < self.nb_file_slots {
            &self.files
        } else {
            &self.commands
        };
        let source = match queue.try_recv() {
            Ok(source) => source,
            Err(_) => return Ok(None),
        };
        let reader = match source {
            InputSource::File(path) => {
                info!("Reading '{}'", path.display());
                SequenceReader::open(&path)?
            }
            InputSource::Command(command) => {
                let manager = match &self.generators {
                    Some(manager) => manager,
                    None => return Ok(None),
                };
                info!("Running generator: {}", command);
                let stream = manager.spawn(&command)?;
                SequenceReader::new(Box::new(stream), &command)?
            }
        };
        Ok(Some(reader))
    }

    fn close(&self, reader: SequenceReader) {
        let (sequences, bases) = reader.totals();
        debug!(
            "Finished '{}': {} sequences, {} bases",
            reader.source(),
            sequences,
            bases
        );
        self.sequences.fetch_add(sequences, Ordering::Relaxed);
        self.bases.fetch_add(bases, Ordering::Relaxed);
    }

    /// Appends the next batch of sequences to `batch`, visiting slots
    /// round-robin from `*cursor`. Returns `false` once every source is
    /// exhausted and nothing was appended.
    pub fn next_batch(&self, cursor: &mut usize, batch: &mut Vec<Vec<u8>>) -> Result<bool> {
        let nb_slots = self.slots.len();
        if nb_slots == 0 {
            return Ok(false);
        }
        let start = *cursor % nb_slots;
        for step in 0..nb_slots {
            let idx = (start + step) % nb_slots;
            let mut slot = self.slots[idx].lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if slot.is_none() {
                    *slot = self.open_next(idx)?;
                }
                let reader = match slot.as_mut() {
                    Some(reader) => reader,
                    None => break,
                };
                let more = match reader.read_batch(self.batch_bases, batch) {
                    Ok(more) => more,
                    Err(e) => {
                        *slot = None;
                        return Err(e);
                    }
                };
                if !more {
                    if let Some(finished) = slot.take() {
                        self.close(finished);
                    }
                }
                if !batch.is_empty() {
                    *cursor = idx + 1;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
