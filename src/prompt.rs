//! Operator confirmation prompts.
//!
//! Upgrade phases ask yes/no questions through [`Prompter`] so the same flow
//! runs interactively, unattended (`--yes`) or from a scripted test.

use std::io::{self, BufRead, Write};
use tracing::info;

pub trait Prompter {
    /// Ask a yes/no question. `default` is used for an empty answer.
    fn confirm(&self, question: &str, default: bool) -> bool;
}

/// Reads answers from stdin.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        print!("{} {} ", question, hint);
        let _ = io::stdout().flush();

        let mut response = String::new();
        if io::stdin().lock().read_line(&mut response).is_err() {
            return false;
        }
        let answer = parse_answer(&response, default);
        info!("Prompt '{}' answered {}", question, if answer { "yes" } else { "no" });
        answer
    }
}

/// Answers yes to everything (`--yes`).
#[derive(Debug, Default)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, question: &str, _default: bool) -> bool {
        info!("Prompt '{}' auto-confirmed", question);
        true
    }
}

/// Interpret a typed answer. EOF (empty read) and unknown text count as no,
/// a bare newline takes the default.
pub fn parse_answer(response: &str, default: bool) -> bool {
    if response.is_empty() {
        return false;
    }
    match response.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}
