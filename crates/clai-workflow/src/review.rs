//! Interactive review of analysis results that need a human.
//!
//! The runner re-prompts after `inspect`, `command` and `question`
//! actions; only `approve` and `reject` settle a review. Every action is
//! recorded in the run artifact by the caller.

use crate::analyzer::{AnalysisResult, Decision};
use crate::cancel::CancelToken;
use anyhow::{bail, Result};
use colored::Colorize;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
    Inspect,
    Command,
    Question,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Inspect => "inspect",
            ReviewAction::Command => "command",
            ReviewAction::Question => "question",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    /// Typed text for `command` and `question` actions.
    pub input: Option<String>,
}

impl ReviewDecision {
    pub fn approve() -> Self {
        Self { action: ReviewAction::Approve, input: None }
    }

    pub fn reject() -> Self {
        Self { action: ReviewAction::Reject, input: None }
    }

    pub fn with_input(action: ReviewAction, input: impl Into<String>) -> Self {
        Self { action, input: Some(input.into()) }
    }
}

pub struct ReviewRequest<'a> {
    pub step_name: &'a str,
    pub analysis: &'a AnalysisResult,
    /// Full masked step output, shown on `inspect`.
    pub output: &'a str,
}

pub trait ReviewHandler: Send {
    fn prompt_review(
        &mut self,
        cancel: &CancelToken,
        request: &ReviewRequest<'_>,
    ) -> Result<ReviewDecision>;
}

/// Sentinel: a review was required but the session has no terminal.
/// Callers treat it as `reject`.
#[derive(Debug)]
pub struct NonInteractiveError;

impl fmt::Display for NonInteractiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "human review required but session is non-interactive")
    }
}

impl std::error::Error for NonInteractiveError {}

/// Sentinel: a scripted review ran out of queued decisions.
#[derive(Debug)]
pub struct ScriptedExhaustedError;

impl fmt::Display for ScriptedExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scripted review has no decisions left")
    }
}

impl std::error::Error for ScriptedExhaustedError {}

/// Terminal-based review. Presents the analysis block once per step and
/// a menu line per prompt.
pub struct TerminalReview {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
    last_step: Option<String>,
}

impl TerminalReview {
    pub fn stdio() -> Self {
        Self::with_streams(Box::new(BufReader::new(io::stdin())), Box::new(io::stdout()))
    }

    pub fn with_streams(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self { input, output, last_step: None }
    }

    fn print_review_block(&mut self, request: &ReviewRequest<'_>) -> Result<()> {
        let icon = match request.analysis.decision {
            Decision::Proceed => "✔".green(),
            Decision::Halt => "✖".red(),
            Decision::NeedsHuman => "⚠".yellow(),
        };
        writeln!(
            self.output,
            "\n{} review required: {} ({})",
            icon,
            request.step_name.bold(),
            request.analysis.decision.as_str()
        )?;
        for line in request.analysis.reasoning.lines() {
            writeln!(self.output, "  {}", line)?;
        }
        for (flag, value) in &request.analysis.flags {
            writeln!(self.output, "  {} {}={}", "flag".dimmed(), flag, value)?;
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("review input closed");
        }
        Ok(line.trim().to_string())
    }
}

impl ReviewHandler for TerminalReview {
    fn prompt_review(
        &mut self,
        cancel: &CancelToken,
        request: &ReviewRequest<'_>,
    ) -> Result<ReviewDecision> {
        if self.last_step.as_deref() != Some(request.step_name) {
            self.print_review_block(request)?;
            self.last_step = Some(request.step_name.to_string());
        }

        loop {
            if cancel.is_cancelled() {
                bail!("run cancelled during review");
            }

            write!(
                self.output,
                "[a]pprove  [r]eject  [i]nspect  [c]ommand  [q]uestion > "
            )?;
            self.output.flush()?;

            match self.read_line()?.to_ascii_lowercase().as_str() {
                "a" | "approve" => return Ok(ReviewDecision::approve()),
                "r" | "reject" => return Ok(ReviewDecision::reject()),
                "i" | "inspect" => {
                    writeln!(self.output, "--- step output (masked) ---")?;
                    writeln!(self.output, "{}", request.output)?;
                    writeln!(self.output, "--- end ---")?;
                }
                "c" | "command" => {
                    write!(self.output, "command: ")?;
                    self.output.flush()?;
                    let input = self.read_line()?;
                    return Ok(ReviewDecision::with_input(ReviewAction::Command, input));
                }
                "q" | "question" => {
                    write!(self.output, "question: ")?;
                    self.output.flush()?;
                    let input = self.read_line()?;
                    return Ok(ReviewDecision::with_input(ReviewAction::Question, input));
                }
                other => {
                    writeln!(self.output, "unknown choice '{}'", other)?;
                }
            }
        }
    }
}

/// Review handler for sessions without a terminal. Always refuses.
pub struct NonInteractiveReview;

impl ReviewHandler for NonInteractiveReview {
    fn prompt_review(
        &mut self,
        _cancel: &CancelToken,
        _request: &ReviewRequest<'_>,
    ) -> Result<ReviewDecision> {
        Err(anyhow::Error::new(NonInteractiveError))
    }
}

/// Replays a fixed decision sequence.
pub struct ScriptedReview {
    decisions: VecDeque<ReviewDecision>,
}

impl ScriptedReview {
    pub fn new(decisions: impl IntoIterator<Item = ReviewDecision>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
        }
    }
}

impl ReviewHandler for ScriptedReview {
    fn prompt_review(
        &mut self,
        _cancel: &CancelToken,
        _request: &ReviewRequest<'_>,
    ) -> Result<ReviewDecision> {
        self.decisions
            .pop_front()
            .ok_or_else(|| anyhow::Error::new(ScriptedExhaustedError))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request<'a>(analysis: &'a AnalysisResult) -> ReviewRequest<'a> {
        ReviewRequest {
            step_name: "deploy",
            analysis,
            output: "stdout:\ndeployed",
        }
    }

    fn terminal(input: &str) -> TerminalReview {
        TerminalReview::with_streams(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(io::sink()),
        )
    }

    #[test]
    fn approve_and_reject_settle_the_review() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();

        let decision = terminal("a\n")
            .prompt_review(&cancel, &request(&analysis))
            .unwrap();
        assert_eq!(decision.action, ReviewAction::Approve);

        let decision = terminal("reject\n")
            .prompt_review(&cancel, &request(&analysis))
            .unwrap();
        assert_eq!(decision.action, ReviewAction::Reject);
    }

    #[test]
    fn inspect_reprompts_within_the_same_call() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        let decision = terminal("i\nx\na\n")
            .prompt_review(&cancel, &request(&analysis))
            .unwrap();
        assert_eq!(decision.action, ReviewAction::Approve);
    }

    #[test]
    fn command_returns_the_typed_input() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        let decision = terminal("c\nkubectl get pods\n")
            .prompt_review(&cancel, &request(&analysis))
            .unwrap();
        assert_eq!(decision.action, ReviewAction::Command);
        assert_eq!(decision.input.as_deref(), Some("kubectl get pods"));
    }

    #[test]
    fn question_returns_the_typed_input() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        let decision = terminal("q\nwhy is latency up?\n")
            .prompt_review(&cancel, &request(&analysis))
            .unwrap();
        assert_eq!(decision.action, ReviewAction::Question);
        assert_eq!(decision.input.as_deref(), Some("why is latency up?"));
    }

    #[test]
    fn eof_is_an_error() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        assert!(terminal("").prompt_review(&cancel, &request(&analysis)).is_err());
    }

    #[test]
    fn cancellation_aborts_the_review() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(terminal("a\n").prompt_review(&cancel, &request(&analysis)).is_err());
    }

    #[test]
    fn non_interactive_returns_the_sentinel() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        let err = NonInteractiveReview
            .prompt_review(&cancel, &request(&analysis))
            .unwrap_err();
        assert!(err.downcast_ref::<NonInteractiveError>().is_some());
    }

    #[test]
    fn scripted_replays_then_exhausts() {
        let analysis = AnalysisResult::needs_human("looks odd");
        let cancel = CancelToken::new();
        let mut scripted = ScriptedReview::new([
            ReviewDecision::with_input(ReviewAction::Question, "safe?"),
            ReviewDecision::approve(),
        ]);

        let first = scripted.prompt_review(&cancel, &request(&analysis)).unwrap();
        assert_eq!(first.action, ReviewAction::Question);
        let second = scripted.prompt_review(&cancel, &request(&analysis)).unwrap();
        assert_eq!(second.action, ReviewAction::Approve);

        let err = scripted.prompt_review(&cancel, &request(&analysis)).unwrap_err();
        assert!(err.downcast_ref::<ScriptedExhaustedError>().is_some());
    }
}
