//! Sandboxed execution of model-generated scripts.
//!
//! Each script is written to an auto-deleting temporary file and run
//! under an interpreter subprocess with a wall-clock limit. The temp
//! file is removed on every path (success, failure, timeout, panic)
//! because cleanup rides on the `NamedTempFile` drop guard, and the
//! child is spawned with `kill_on_drop` so a timed-out process does
//! not outlive the runner.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// What happened when a script ran.
#[derive(Debug)]
pub enum ScriptOutcome {
    /// The process ran to completion (any exit code).
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The wall-clock limit elapsed; the process was killed.
    TimedOut { limit_secs: u64 },
}

/// Runs model-generated scripts in subprocesses.
pub struct ScriptRunner {
    interpreter: String,
    timeout: Duration,
    /// Override the temp directory (used by tests).
    temp_dir: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            temp_dir: None,
        }
    }

    /// Place script files in a specific directory instead of the system
    /// temp dir.
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Write `code` to a temp file and execute it. I/O failures in the
    /// runner itself (cannot write the file, cannot spawn the
    /// interpreter) come back as `Err`; script failures and timeouts
    /// are ordinary `Ok(ScriptOutcome)` values.
    pub async fn run(&self, code: &str) -> std::io::Result<ScriptOutcome> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tabforge_script_").suffix(".py");
        let mut script = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let path = script.path().to_path_buf();
        debug!(path = %path.display(), interpreter = %self.interpreter, "Running script");

        let child = Command::new(&self.interpreter)
            .arg(&path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let outcome = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                ScriptOutcome::Completed {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            Err(_) => {
                warn!(
                    limit_secs = self.timeout.as_secs(),
                    "Script timed out, killing process"
                );
                ScriptOutcome::TimedOut {
                    limit_secs: self.timeout.as_secs(),
                }
            }
        };

        // `script` drops here, deleting the temp file.
        Ok(outcome)
    }
}
