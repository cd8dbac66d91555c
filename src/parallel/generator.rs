//! Generator commands: shell commands whose standard output is a sequence
//! stream.
//!
//! Commands are listed one per line in a file (`#` starts a comment). Each is
//! spawned through the configured shell when the stream manager needs a new
//! stream. A stream that reaches end of file reaps its child and records a
//! non-zero exit; a stream dropped early kills and reaps its child.

use crate::error::{MerError, Result};
use log::{debug, error, warn};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

pub const DEFAULT_SHELL: &str = "/bin/sh";

type FailureLog = Arc<Mutex<Vec<(String, String)>>>;

#[derive(Debug)]
pub struct GeneratorManager {
    commands: Vec<String>,
    shell: PathBuf,
    failures: FailureLog,
}

impl GeneratorManager {
    pub fn new(commands: Vec<String>, shell: Option<&Path>) -> Self {
        Self {
            commands,
            shell: shell.map_or_else(|| PathBuf::from(DEFAULT_SHELL), Path::to_path_buf),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reads the command list from `path`.
    pub fn from_file(path: &Path, shell: Option<&Path>) -> Result<Self> {
        let commands = crate::utils::io::read_command_lines(path)?;
        if commands.is_empty() {
            warn!("Generator file '{}' lists no commands", path.display());
        }
        Ok(Self::new(commands, shell))
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Starts one command and returns its output stream.
    pub fn spawn(&self, command: &str) -> Result<GeneratorStream> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| MerError::io(&self.shell, "spawn generator", e))?;
        let stdout = child.stdout.take().ok_or_else(|| MerError::Subprocess {
            command: command.to_string(),
            status: "no standard output".to_string(),
        })?;
        debug!("Started generator (pid {}): {}", child.id(), command);
        Ok(GeneratorStream {
            command: command.to_string(),
            child,
            stdout,
            failures: Arc::clone(&self.failures),
            finished: false,
        })
    }

    /// Reports the first failed command, if any. Call after every stream
    /// was read to its end.
    pub fn wait(&self) -> Result<()> {
        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        for (command, status) in failures.iter().skip(1) {
            error!("Generator command '{}' failed: {}", command, status);
        }
        match failures.first() {
            Some((command, status)) => Err(MerError::Subprocess {
                command: command.clone(),
                status: status.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Standard output of a running generator command.
pub struct GeneratorStream {
    command: String,
    child: Child,
    stdout: ChildStdout,
    failures: FailureLog,
    finished: bool,
}

impl GeneratorStream {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if !status.success() {
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((self.command.clone(), status.to_string()));
        }
    }
}

impl Read for GeneratorStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() && !self.finished {
            self.finished = true;
            let status = self.child.wait()?;
            debug!("Generator exited ({}): {}", status, self.command);
            self.record_exit(status);
        }
        Ok(n)
    }
}

impl Drop for GeneratorStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
