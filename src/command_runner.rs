//! Command execution
//!
//! Every external command goes through a [`CommandRunner`]. The production
//! implementation, [`SystemRunner`], is the only place distupgrade spawns
//! processes:
//!
//! - each child runs in its own process group with a parent-death signal
//! - its PID is tracked in [`ChildRegistry`] for signal cleanup
//! - stdout and stderr are captured and appended to the run log; lines of
//!   mutating commands are also echoed to the console as they arrive
//! - in dry-run mode mutating commands are logged and skipped
//!
//! Phases only ever see the trait, so tests drive whole upgrade flows with a
//! scripted runner and never touch the real package manager.

use crate::command_traits::PackageCommand;
use crate::error::{Result, UpgradeError};
use crate::logging::COMMAND_TARGET;
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Drain `reader` line by line, echoing each line when `echo` is set.
fn collect_lines<R: Read + Send + 'static>(reader: R, echo: bool) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut collected = String::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if echo {
                        info!(target: COMMAND_TARGET, "{}", line.trim_end());
                    }
                    collected.push_str(&line);
                }
            }
        }
        collected
    })
}

fn join_lines(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Output from one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by a signal).
    pub exit_code: Option<i32>,
    pub success: bool,
    /// True when the command was skipped because of dry-run mode.
    pub dry_run: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
            ..Self::default()
        }
    }

    /// Placeholder result for a command skipped in dry-run mode.
    pub fn skipped(display: &str) -> Self {
        Self {
            stdout: format!("[DRY RUN] Skipped: {}\n", display),
            exit_code: Some(0),
            success: true,
            dry_run: true,
            ..Self::default()
        }
    }

    /// stdout followed by stderr; apt writes its "E:" lines to stderr while
    /// dpkg's unpack errors land in stdout, so matching needs both.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// True if the process was killed by a signal rather than exiting.
    pub fn was_signaled(&self) -> bool {
        !self.success && self.exit_code.is_none()
    }

    /// Return an error if the command did not succeed.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self.exit_code.unwrap_or(-1);
        Err(UpgradeError::command(format!(
            "{} failed (exit code {}): {}",
            context,
            code,
            self.stderr.trim()
        )))
    }
}

/// Executes typed external commands.
pub trait CommandRunner {
    /// Run `cmd` to completion and capture its output.
    ///
    /// A non-zero exit is reported through `CommandOutput::success`, not as
    /// an error. `Err` means the command could not be run at all.
    fn run(&self, cmd: &dyn PackageCommand) -> Result<CommandOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    dry_run: bool,
    log_file: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            log_file: None,
        }
    }

    /// Append every command line and its captured output to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn append_to_log(&self, display: &str, output: &CommandOutput) {
        let Some(path) = &self.log_file else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                writeln!(file, "$ {}", display)?;
                if !output.stdout.is_empty() {
                    file.write_all(output.stdout.as_bytes())?;
                }
                if !output.stderr.is_empty() {
                    file.write_all(output.stderr.as_bytes())?;
                }
                writeln!(file, "[exit: {:?}]", output.exit_code)
            });
        if let Err(e) = result {
            warn!("Could not append command output to {}: {}", path.display(), e);
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &dyn PackageCommand) -> Result<CommandOutput> {
        let cmd_display = cmd.display();

        if self.dry_run && cmd.is_mutating() {
            info!("[DRY RUN] would run: {}", cmd_display);
            let output = CommandOutput::skipped(&cmd_display);
            self.append_to_log(&cmd_display, &output);
            return Ok(output);
        }

        info!("Running: {}", cmd_display);

        let mut command = Command::new(cmd.program());
        command
            .args(cmd.to_cli_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        for (key, value) in cmd.get_env_vars() {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| UpgradeError::command(format!("failed to spawn {}: {}", cmd_display, e)))?;
        let pid = child.id();

        let registry = ChildRegistry::global();
        if let Ok(mut guard) = registry.lock() {
            guard.register(pid);
        }

        // Both pipes are drained concurrently so a chatty child never blocks
        let echo = cmd.is_mutating();
        let stdout = child.stdout.take().map(|s| collect_lines(s, echo));
        let stderr = child.stderr.take().map(|s| collect_lines(s, echo));
        let waited = child.wait();

        if let Ok(mut guard) = registry.lock() {
            guard.unregister(pid);
        }

        let stdout = join_lines(stdout);
        let stderr = join_lines(stderr);
        let status = waited
            .map_err(|e| UpgradeError::command(format!("failed waiting for {}: {}", cmd_display, e)))?;

        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            success: status.success(),
            dry_run: false,
        };

        if output.success {
            debug!("{} succeeded", cmd_display);
        } else {
            warn!("{} exited with {:?}", cmd_display, output.exit_code);
        }
        self.append_to_log(&cmd_display, &output);

        Ok(output)
    }
}
