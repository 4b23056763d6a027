//! Local workflow execution engine.
//!
//! Parses a declarative YAML workflow, validates it, then executes its
//! steps in order: bounded output capture, `${{ ... }}` interpolation
//! from prior step outputs, secret masking, optional LLM analysis gated
//! by per-step risk levels, human-in-the-loop review, and a JSONL
//! artifact log per run.

pub mod analyzer;
pub mod artifact;
pub mod cancel;
pub mod capture;
pub mod display;
pub mod driver;
pub mod events;
pub mod expressions;
pub mod gate;
pub mod mask;
pub mod outputs;
pub mod process;
pub mod review;
pub mod runner;
pub mod schema;
pub mod shell;
pub mod transport;
pub mod validate;

pub use analyzer::{AnalysisResult, Analyzer, Decision};
pub use cancel::CancelToken;
pub use driver::{DriverOptions, WorkflowDriver, WorkflowResult};
pub use events::RunEvent;
pub use review::{
    NonInteractiveReview, ReviewAction, ReviewDecision, ReviewHandler, ScriptedReview,
    TerminalReview,
};
pub use runner::{RunResult, RunStatus, StepResult, StepStatus};
pub use schema::{parse_workflow_file, parse_workflow_str, WorkflowDef};
pub use transport::{AnalysisTransport, DirectLlm};
pub use validate::{validate, ValidationError};
