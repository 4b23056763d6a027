//! Run events streamed from the runner to observers.
//!
//! The display renders these; the artifact writer records the same
//! moments as JSONL. Events are purely observational and never affect
//! execution.

use crate::analyzer::Decision;
use crate::review::ReviewAction;
use crate::runner::{RunStatus, StepStatus};

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStart {
        run_id: String,
        workflow: String,
        matrix_key: String,
        total_steps: usize,
    },
    StepStart {
        run_id: String,
        step_id: String,
        name: String,
    },
    StepEnd {
        run_id: String,
        step_id: String,
        name: String,
        status: StepStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
        /// Masked tails for failure diagnostics.
        stdout_tail: String,
        stderr_tail: String,
    },
    Analysis {
        run_id: String,
        step_id: String,
        decision: Decision,
        reasoning: String,
    },
    HumanDecision {
        run_id: String,
        step_id: String,
        action: ReviewAction,
        input: Option<String>,
    },
    RunEnd {
        run_id: String,
        status: RunStatus,
        duration_ms: u64,
    },
}
