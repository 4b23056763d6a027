//! Sequential execution of a job's steps for one matrix entry.
//!
//! The runner owns the capture buffers, the temp output file and the
//! child process of the step in flight. Step failures never propagate as
//! errors; every step always gets a result row and the run log always
//! sees a `run_end`.

use crate::analyzer::AnalysisResult;
use crate::artifact::ArtifactWriter;
use crate::cancel::CancelToken;
use crate::capture::{CaptureBuffer, DEFAULT_CAPACITY};
use crate::events::RunEvent;
use crate::expressions::{self, ResolveContext};
use crate::gate::{self, GateAction};
use crate::mask::SecretMasker;
use crate::outputs;
use crate::process::{self, ProcessHandle, WaitOutcome, DEFAULT_GRACE};
use crate::review::{NonInteractiveError, ReviewAction, ReviewHandler, ReviewRequest};
use crate::schema::StepDef;
use crate::shell;
use crate::transport::{AnalysisTransport, AnalyzeRequest};
use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub matrix_key: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Masked, bounded tails.
    pub stdout_tail: Vec<u8>,
    pub stderr_tail: Vec<u8>,
    pub outputs: HashMap<String, String>,
}

#[derive(Debug)]
pub struct RunResult {
    pub run_id: String,
    pub workflow_name: String,
    pub matrix_key: String,
    pub status: RunStatus,
    pub duration: Duration,
    pub steps: Vec<StepResult>,
}

pub struct RunnerConfig {
    pub workdir: PathBuf,
    /// Workflow and job env, already merged (job wins).
    pub base_env: HashMap<String, String>,
    pub matrix: BTreeMap<String, String>,
    pub grace: Duration,
    pub capture_limit: usize,
}

impl RunnerConfig {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            base_env: HashMap::new(),
            matrix: BTreeMap::new(),
            grace: DEFAULT_GRACE,
            capture_limit: DEFAULT_CAPACITY,
        }
    }
}

/// Canonical `k=v,k=v` rendering of a matrix entry, empty for
/// non-matrix runs.
pub fn matrix_key(matrix: &BTreeMap<String, String>) -> String {
    matrix
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

enum StepFlow {
    Continue,
    Halt,
    ReviewAborted,
}

pub struct Runner<'a> {
    steps: &'a [StepDef],
    config: &'a RunnerConfig,
    masker: &'a SecretMasker,
    transport: Option<&'a AnalysisTransport>,
    review: Option<&'a mut dyn ReviewHandler>,
    artifact: Option<&'a mut ArtifactWriter>,
    events: Option<&'a Sender<RunEvent>>,
}

impl<'a> Runner<'a> {
    pub fn new(steps: &'a [StepDef], config: &'a RunnerConfig, masker: &'a SecretMasker) -> Self {
        Self {
            steps,
            config,
            masker,
            transport: None,
            review: None,
            artifact: None,
            events: None,
        }
    }

    pub fn with_transport(mut self, transport: &'a AnalysisTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_review(mut self, review: &'a mut dyn ReviewHandler) -> Self {
        self.review = Some(review);
        self
    }

    pub fn with_artifact(mut self, artifact: &'a mut ArtifactWriter) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_events(mut self, events: &'a Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Execute all steps in order. Never fails; operational problems
    /// land in step statuses.
    pub fn run(&mut self, cancel: &CancelToken, run_id: &str, workflow_name: &str) -> RunResult {
        let steps = self.steps;
        let run_started = Instant::now();
        let key = matrix_key(&self.config.matrix);

        self.emit(RunEvent::RunStart {
            run_id: run_id.to_string(),
            workflow: workflow_name.to_string(),
            matrix_key: key.clone(),
            total_steps: steps.len(),
        });
        self.record(
            "run_start",
            json!({
                "run_id": run_id,
                "workflow": workflow_name,
                "matrix_key": key,
                "total_steps": steps.len(),
            }),
        );

        let mut ctx = ResolveContext::new();
        ctx.matrix = self.config.matrix.clone();

        let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
        let mut failed = false;
        let mut halted = false;
        let mut cancel_marked = false;
        let mut review_aborted = false;

        for step in steps {
            if failed || halted {
                results.push(self.skip_step(run_id, step, &key, StepStatus::Skipped));
                continue;
            }
            if cancel.is_cancelled() || review_aborted {
                let status = if cancel_marked || review_aborted {
                    StepStatus::Skipped
                } else {
                    cancel_marked = true;
                    StepStatus::Cancelled
                };
                results.push(self.skip_step(run_id, step, &key, status));
                continue;
            }

            let result = self.execute_step(cancel, run_id, step, &key, &ctx);
            ctx.add_step_outputs(&step.id, result.outputs.clone());

            match result.status {
                StepStatus::Failed => failed = true,
                StepStatus::Cancelled => cancel_marked = true,
                StepStatus::Passed if step.analyze => {
                    match self.analyze_step(cancel, run_id, step, &key, &result) {
                        StepFlow::Continue => {}
                        StepFlow::Halt => halted = true,
                        StepFlow::ReviewAborted => review_aborted = true,
                    }
                }
                _ => {}
            }
            results.push(result);
        }

        let status = rollup(&results, halted, review_aborted);
        let duration = run_started.elapsed();

        self.emit(RunEvent::RunEnd {
            run_id: run_id.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
        });
        self.record(
            "run_end",
            json!({
                "run_id": run_id,
                "status": status.as_str(),
                "duration_ms": duration.as_millis() as u64,
            }),
        );

        RunResult {
            run_id: run_id.to_string(),
            workflow_name: workflow_name.to_string(),
            matrix_key: key,
            status,
            duration,
            steps: results,
        }
    }

    fn skip_step(
        &mut self,
        run_id: &str,
        step: &StepDef,
        matrix_key: &str,
        status: StepStatus,
    ) -> StepResult {
        self.emit(RunEvent::StepEnd {
            run_id: run_id.to_string(),
            step_id: step.id.clone(),
            name: step.display_name().to_string(),
            status,
            exit_code: None,
            duration_ms: 0,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        });
        self.record(
            "step_end",
            json!({
                "step_id": step.id,
                "status": status.as_str(),
                "exit_code": null,
                "duration_ms": 0,
            }),
        );
        StepResult {
            step_id: step.id.clone(),
            matrix_key: matrix_key.to_string(),
            status,
            exit_code: None,
            duration: Duration::ZERO,
            stdout_tail: Vec::new(),
            stderr_tail: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    fn execute_step(
        &mut self,
        cancel: &CancelToken,
        run_id: &str,
        step: &StepDef,
        matrix_key: &str,
        ctx: &ResolveContext,
    ) -> StepResult {
        let started = Instant::now();

        self.emit(RunEvent::StepStart {
            run_id: run_id.to_string(),
            step_id: step.id.clone(),
            name: step.display_name().to_string(),
        });
        self.record("step_start", json!({"step_id": step.id, "name": step.display_name()}));

        let execution = execute_subprocess(self.config, cancel, step, ctx);
        let (status, exit_code, stdout, stderr, outputs) = match execution {
            Ok(outcome) => outcome,
            Err(e) => {
                // Resolution and spawn problems materialize as a failed
                // step with the message in the stderr tail.
                (
                    StepStatus::Failed,
                    None,
                    Vec::new(),
                    format!("{:#}", e).into_bytes(),
                    HashMap::new(),
                )
            }
        };

        let stdout_tail = self.masker.mask_bytes(&stdout);
        let stderr_tail = self.masker.mask_bytes(&stderr);
        let duration = started.elapsed();

        if let Some(artifact) = self.artifact.as_deref_mut() {
            artifact.write_step_streams(&step.id, &stdout_tail, &stderr_tail);
        }
        self.record(
            "step_end",
            json!({
                "step_id": step.id,
                "status": status.as_str(),
                "exit_code": exit_code,
                "duration_ms": duration.as_millis() as u64,
                "outputs": outputs,
            }),
        );
        self.emit(RunEvent::StepEnd {
            run_id: run_id.to_string(),
            step_id: step.id.clone(),
            name: step.display_name().to_string(),
            status,
            exit_code,
            duration_ms: duration.as_millis() as u64,
            stdout_tail: String::from_utf8_lossy(&stdout_tail).into_owned(),
            stderr_tail: String::from_utf8_lossy(&stderr_tail).into_owned(),
        });

        StepResult {
            step_id: step.id.clone(),
            matrix_key: matrix_key.to_string(),
            status,
            exit_code,
            duration,
            stdout_tail,
            stderr_tail,
            outputs,
        }
    }

    fn analyze_step(
        &mut self,
        cancel: &CancelToken,
        run_id: &str,
        step: &StepDef,
        matrix_key: &str,
        result: &StepResult,
    ) -> StepFlow {
        let Some(transport) = self.transport else {
            return StepFlow::Continue;
        };

        let scrubbed =
            transport.analyzer().build_analysis_context(&result.stdout_tail, &result.stderr_tail);
        let request = AnalyzeRequest {
            run_id,
            step_id: &step.id,
            step_name: step.display_name(),
            matrix_key,
            risk_level: step.risk_level,
            scrubbed_output: &scrubbed,
            analysis_prompt: step.analysis_prompt.as_deref(),
        };
        let analysis = transport.analyze(cancel, &request);

        self.emit(RunEvent::Analysis {
            run_id: run_id.to_string(),
            step_id: step.id.clone(),
            decision: analysis.decision,
            reasoning: analysis.reasoning.clone(),
        });
        self.record(
            "analysis",
            json!({
                "step_id": step.id,
                "decision": analysis.decision.as_str(),
                "reasoning": analysis.reasoning,
                "flags": analysis.flags,
            }),
        );

        match gate::decide(step.risk_level, analysis.decision) {
            GateAction::Continue => StepFlow::Continue,
            GateAction::Halt => StepFlow::Halt,
            GateAction::PromptHuman => self.prompt_human(cancel, run_id, step, &analysis, &scrubbed),
        }
    }

    fn prompt_human(
        &mut self,
        cancel: &CancelToken,
        run_id: &str,
        step: &StepDef,
        analysis: &AnalysisResult,
        output: &str,
    ) -> StepFlow {
        loop {
            let decision = match &mut self.review {
                Some(review) => {
                    let request = ReviewRequest {
                        step_name: step.display_name(),
                        analysis,
                        output,
                    };
                    review.prompt_review(cancel, &request)
                }
                None => Err(anyhow::Error::new(NonInteractiveError)),
            };

            match decision {
                Ok(decision) => {
                    self.emit(RunEvent::HumanDecision {
                        run_id: run_id.to_string(),
                        step_id: step.id.clone(),
                        action: decision.action,
                        input: decision.input.clone(),
                    });
                    self.record(
                        "human_decision",
                        json!({
                            "step_id": step.id,
                            "action": decision.action.as_str(),
                            "input": decision.input,
                        }),
                    );
                    match decision.action {
                        ReviewAction::Approve => return StepFlow::Continue,
                        ReviewAction::Reject => return StepFlow::Halt,
                        // Investigation actions re-prompt; command input
                        // is recorded only, question input is recorded
                        // for the per-step transcript.
                        ReviewAction::Inspect | ReviewAction::Command | ReviewAction::Question => {}
                    }
                }
                Err(e) => {
                    if e.downcast_ref::<NonInteractiveError>().is_some() {
                        self.record(
                            "human_decision",
                            json!({
                                "step_id": step.id,
                                "action": ReviewAction::Reject.as_str(),
                                "input": null,
                                "non_interactive": true,
                            }),
                        );
                        return StepFlow::Halt;
                    }
                    tracing::warn!(error = %e, "review aborted");
                    return StepFlow::ReviewAborted;
                }
            }
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = self.events {
            let _ = events.send(event);
        }
    }

    fn record(&mut self, event_type: &str, data: serde_json::Value) {
        if let Some(artifact) = self.artifact.as_deref_mut() {
            artifact.write_event(event_type, data);
        }
    }
}

type Execution = (StepStatus, Option<i32>, Vec<u8>, Vec<u8>, HashMap<String, String>);

fn execute_subprocess(
    config: &RunnerConfig,
    cancel: &CancelToken,
    step: &StepDef,
    ctx: &ResolveContext,
) -> Result<Execution> {
    // Effective env: workflow/job base, then matrix values, then the
    // step's own entries.
    let mut effective_env = config.base_env.clone();
    for (k, v) in &config.matrix {
        effective_env.insert(k.clone(), v.clone());
    }

    let mut resolve_ctx = ResolveContext {
        env: effective_env.clone(),
        matrix: config.matrix.clone(),
        steps: ctx.steps.clone(),
    };
    for (k, v) in &step.env {
        let resolved = expressions::resolve(v, &resolve_ctx)
            .with_context(|| format!("resolving env '{}'", k))?;
        effective_env.insert(k.clone(), resolved);
    }
    resolve_ctx.env = effective_env.clone();

    let run = expressions::resolve(&step.run, &resolve_ctx).context("resolving run command")?;

    let output_file = tempfile::NamedTempFile::new().context("creating step output file")?;
    let command = shell::build_command(
        &run,
        &step.shell_mode(),
        &effective_env,
        &config.workdir,
        output_file.path(),
    )?;

    let stdout_buffer = CaptureBuffer::new(config.capture_limit);
    let stderr_buffer = CaptureBuffer::new(config.capture_limit);

    let mut handle = ProcessHandle::new();
    handle.start(command)?;

    let readers = [
        spawn_capture(handle.take_stdout(), stdout_buffer.clone()),
        spawn_capture(handle.take_stderr(), stderr_buffer.clone()),
    ];

    let outcome = handle.wait(cancel, config.grace)?;

    // Pipe readers finish once the process group is gone.
    for reader in readers.into_iter().flatten() {
        let _ = reader.join();
    }

    let (status, exit_status) = match outcome {
        WaitOutcome::Exited(status) if status.success() => (StepStatus::Passed, status),
        WaitOutcome::Exited(status) => (StepStatus::Failed, status),
        WaitOutcome::Cancelled(status) => (StepStatus::Cancelled, status),
    };

    let outputs = outputs::parse_output_file(output_file.path())?;

    Ok((
        status,
        process::exit_code(&exit_status),
        stdout_buffer.bytes(),
        stderr_buffer.bytes(),
        outputs,
    ))
}

fn spawn_capture<R: Read + Send + 'static>(
    stream: Option<R>,
    mut buffer: CaptureBuffer,
) -> Option<JoinHandle<()>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let _ = std::io::copy(&mut stream, &mut buffer);
        })
    })
}

/// Cancelled beats failed beats passed; a halted run reports failed even
/// when every executed step passed.
fn rollup(steps: &[StepResult], halted: bool, review_aborted: bool) -> RunStatus {
    if review_aborted || steps.iter().any(|s| s.status == StepStatus::Cancelled) {
        RunStatus::Cancelled
    } else if halted || steps.iter().any(|s| s.status == StepStatus::Failed) {
        RunStatus::Failed
    } else {
        RunStatus::Passed
    }
}
