//! Wall-clock phase timing for the `--timing` report.

use crate::error::{MerError, Result};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Accumulates named phase durations in the order they were recorded.
#[derive(Debug)]
pub struct PhaseTimer {
    current: Instant,
    phases: Vec<(&'static str, Duration)>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self {
            current: Instant::now(),
            phases: Vec::new(),
        }
    }

    /// Closes the running phase under `name` and starts the next one.
    pub fn lap(&mut self, name: &'static str) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.current);
        self.current = now;
        self.phases.push((name, elapsed));
        elapsed
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    pub fn get(&self, name: &str) -> Option<Duration> {
        self.phases.iter().find(|(n, _)| *n == name).map(|(_, d)| *d)
    }

    /// One line per phase, name padded to 9 columns, seconds with 6 decimals.
    pub fn write_report<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for (name, duration) in &self.phases {
            writeln!(out, "{:<9}{:.6}", name, duration.as_secs_f64())?;
        }
        Ok(())
    }

    pub fn write_report_file(&self, path: &Path) -> Result<()> {
        let mut writer = super::io::open_file_for_writing(path)?;
        self.write_report(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| MerError::io(path, "write timing report", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lines() {
        let mut timer = PhaseTimer::new();
        timer.lap("Init");
        timer.lap("Counting");
        timer.lap("Writing");

        let mut out = Vec::new();
        timer.write_report(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let names: Vec<&str> = text
            .lines()
            .map(|l| l.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(names, vec!["Init", "Counting", "Writing"]);
        assert!(text.starts_with("Init     "));
        assert!(timer.get("Counting").is_some());
        assert!(timer.get("Merging").is_none());
    }
}
