//! Diagnostics logging setup.
//!
//! Two `tracing-subscriber` fmt layers share one `EnvFilter` (default `info`,
//! `RUST_LOG` overrides): a compact stderr layer with `file:line`, and, once
//! the run log path is known, a plain-text layer with timestamps appended to
//! that file. Operator status lines from [`crate::report::Reporter`] are
//! tracing events too, under [`OPERATOR_TARGET`]: the file layer records them
//! so the run log is a full transcript, the stderr layer drops them because
//! the operator already saw them on the console. Live output of package
//! commands goes the other way under [`COMMAND_TARGET`]: shown on stderr,
//! kept out of the file, which receives each command's output as one block.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Target of events that mirror console status lines.
pub const OPERATOR_TARGET: &str = "operator";

/// Target of lines streamed from running package commands.
pub const COMMAND_TARGET: &str = "command";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn without_target(target: &str) -> EnvFilter {
    let filter = env_filter();
    match format!("{}=off", target).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Install the global subscriber.
///
/// With `log_file`, the file (and its parent directory) is created if
/// needed. Returns an error if the file cannot be opened; the caller can
/// fall back to stderr-only logging.
pub fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .without_time()
        .with_filter(without_target(OPERATOR_TARGET));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(without_target(COMMAND_TARGET)),
            )
        }
        None => None,
    };

    // try_init: tests and repeated calls must not panic on an existing subscriber
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(())
}
