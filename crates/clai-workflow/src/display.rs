//! Terminal progress rendering for a run.
//!
//! Rich mode rewrites the current line in place and uses status icons;
//! plain mode prints one bracketed line per event so output stays
//! greppable in logs and CI.

use crate::events::RunEvent;
use crate::runner::{RunStatus, StepStatus};
use colored::Colorize;
use crossbeam_channel::Receiver;
use std::env;
use std::io::{self, IsTerminal, Write};

const CLEAR_LINE: &str = "\r\x1b[K";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Rich,
    Plain,
}

/// Rich rendering needs a real terminal that has not opted out of
/// decoration.
pub fn detect_mode() -> DisplayMode {
    let tty = io::stdout().is_terminal();
    let term_ok = env::var("TERM").map(|t| t != "dumb").unwrap_or(true);
    let no_color = env::var_os("NO_COLOR").is_some();
    if tty && term_ok && !no_color {
        DisplayMode::Rich
    } else {
        DisplayMode::Plain
    }
}

pub struct Display {
    mode: DisplayMode,
}

impl Display {
    pub fn new(mode: DisplayMode) -> Self {
        Self { mode }
    }

    pub fn auto() -> Self {
        Self::new(detect_mode())
    }

    /// Drain the event channel until the runner side hangs up.
    pub fn consume(&mut self, events: Receiver<RunEvent>) {
        for event in events {
            self.handle(&event);
        }
    }

    pub fn handle(&mut self, event: &RunEvent) {
        match self.mode {
            DisplayMode::Rich => self.render_rich(event),
            DisplayMode::Plain => self.render_plain(event),
        }
    }

    fn render_rich(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStart { workflow, run_id, matrix_key, .. } => {
                if matrix_key.is_empty() {
                    println!("{} {} ({})", "▶".bold(), workflow.bold(), run_id);
                } else {
                    println!("{} {} [{}] ({})", "▶".bold(), workflow.bold(), matrix_key, run_id);
                }
            }
            RunEvent::StepStart { name, .. } => {
                print!("{}{} {}", CLEAR_LINE, "⏳".yellow(), name);
                let _ = io::stdout().flush();
            }
            RunEvent::StepEnd { name, status, exit_code, duration_ms, stdout_tail, stderr_tail, .. } => {
                println!(
                    "{}{} {} ({} ms)",
                    CLEAR_LINE,
                    step_icon(*status),
                    name,
                    duration_ms
                );
                if *status == StepStatus::Failed {
                    let code = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "?".into());
                    println!("  {} exit code {}", "FAILED".red().bold(), code);
                    print_tail(stderr_tail, stdout_tail);
                }
            }
            RunEvent::Analysis { decision, reasoning, .. } => {
                let summary = reasoning.lines().next().unwrap_or("");
                println!("  {} {}: {}", "analysis".cyan(), decision.as_str(), summary);
            }
            RunEvent::HumanDecision { action, .. } => {
                println!("  {} {}", "review".cyan(), action.as_str());
            }
            RunEvent::RunEnd { status, duration_ms, .. } => {
                println!("{} in {} ms", run_status_label(*status), duration_ms);
            }
        }
    }

    fn render_plain(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStart { workflow, run_id, matrix_key, total_steps } => {
                println!(
                    "[run_start] {} run={} matrix={} steps={}",
                    workflow, run_id, matrix_key, total_steps
                );
            }
            RunEvent::StepStart { step_id, .. } => {
                println!("[step_start] {}", step_id);
            }
            RunEvent::StepEnd { step_id, status, exit_code, duration_ms, stdout_tail, stderr_tail, .. } => {
                let code = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "[step_end] {} status={} exit={} duration_ms={}",
                    step_id,
                    status.as_str(),
                    code,
                    duration_ms
                );
                if *status == StepStatus::Failed {
                    print_tail(stderr_tail, stdout_tail);
                }
            }
            RunEvent::Analysis { step_id, decision, .. } => {
                println!("[analysis] {} decision={}", step_id, decision.as_str());
            }
            RunEvent::HumanDecision { step_id, action, .. } => {
                println!("[human_decision] {} action={}", step_id, action.as_str());
            }
            RunEvent::RunEnd { status, duration_ms, .. } => {
                println!("[run_end] status={} duration_ms={}", status.as_str(), duration_ms);
            }
        }
    }
}

/// Stderr preferred over stdout; empty tails produce no block.
fn print_tail(stderr_tail: &str, stdout_tail: &str) {
    let tail = if !stderr_tail.trim().is_empty() {
        stderr_tail
    } else {
        stdout_tail
    };
    for line in tail.trim().lines() {
        println!("  | {}", line);
    }
}

fn step_icon(status: StepStatus) -> colored::ColoredString {
    match status {
        StepStatus::Passed => "✔".green(),
        StepStatus::Failed => "✖".red(),
        StepStatus::Skipped => "↷".yellow(),
        StepStatus::Cancelled => "⊘".yellow(),
    }
}

fn run_status_label(status: RunStatus) -> colored::ColoredString {
    match status {
        RunStatus::Passed => "passed".green().bold(),
        RunStatus::Failed => "failed".red().bold(),
        RunStatus::Cancelled => "cancelled".yellow().bold(),
    }
}
