//! Top-level run orchestration: matrix expansion, per-entry runners,
//! fail-fast sequencing and tool preflight.

use crate::artifact::ArtifactWriter;
use crate::cancel::CancelToken;
use crate::events::RunEvent;
use crate::mask::SecretMasker;
use crate::review::ReviewHandler;
use crate::runner::{RunResult, RunStatus, Runner, RunnerConfig};
use crate::schema::{JobDef, WorkflowDef};
use crate::transport::AnalysisTransport;
use crate::validate;
use anyhow::{bail, Result};
use crossbeam_channel::Sender;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct DriverOptions {
    pub workdir: PathBuf,
    /// Where JSONL run logs land; `None` disables artifacts.
    pub log_dir: Option<PathBuf>,
    pub grace: Duration,
    pub capture_limit: usize,
    pub write_step_files: bool,
}

impl DriverOptions {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            log_dir: None,
            grace: crate::process::DEFAULT_GRACE,
            capture_limit: crate::capture::DEFAULT_CAPACITY,
            write_step_files: true,
        }
    }
}

#[derive(Debug)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub status: RunStatus,
    pub runs: Vec<RunResult>,
}

pub struct WorkflowDriver<'a> {
    workflow: &'a WorkflowDef,
    options: DriverOptions,
    transport: Option<&'a AnalysisTransport>,
    review: Option<&'a mut dyn ReviewHandler>,
    events: Option<&'a Sender<RunEvent>>,
}

impl<'a> WorkflowDriver<'a> {
    pub fn new(workflow: &'a WorkflowDef, options: DriverOptions) -> Self {
        Self {
            workflow,
            options,
            transport: None,
            review: None,
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

    pub fn with_events(mut self, events: &'a Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the workflow: one run per matrix entry, sequential,
    /// fail-fast. User-input problems fail before any step executes;
    /// everything after that lands in run results.
    pub fn execute(&mut self, cancel: &CancelToken) -> Result<WorkflowResult> {
        let errors = validate::validate(self.workflow);
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            bail!("workflow failed validation:\n  {}", joined.join("\n  "));
        }

        for tool in &self.workflow.requires {
            if !tool_on_path(tool) {
                bail!("required tool '{}' not found on PATH", tool);
            }
        }

        // Single-job policy is enforced by validation.
        let job = self
            .workflow
            .jobs
            .values()
            .next()
            .expect("validated workflow has a job");

        let mut base_env = self.workflow.env.clone();
        base_env.extend(job.env.clone());

        let masker = SecretMasker::from_secrets(&self.workflow.secrets);
        let mut review = self.review.take();

        let mut runs: Vec<RunResult> = Vec::new();
        for entry in expand_matrix(job) {
            let run_id = generate_run_id();
            let config = RunnerConfig {
                workdir: self.options.workdir.clone(),
                base_env: base_env.clone(),
                matrix: entry,
                grace: self.options.grace,
                capture_limit: self.options.capture_limit,
            };

            let mut artifact = match &self.options.log_dir {
                Some(dir) => {
                    match ArtifactWriter::create(dir, &run_id, self.options.write_step_files) {
                        Ok(writer) => Some(writer),
                        Err(e) => {
                            tracing::warn!(error = %e, "cannot create run artifact, continuing without");
                            None
                        }
                    }
                }
                None => None,
            };

            let mut runner = Runner::new(&job.steps, &config, &masker);
            if let Some(transport) = self.transport {
                runner = runner.with_transport(transport);
            }
            if let Some(review) = review.as_deref_mut() {
                runner = runner.with_review(review);
            }
            if let Some(artifact) = artifact.as_mut() {
                runner = runner.with_artifact(artifact);
            }
            if let Some(events) = self.events {
                runner = runner.with_events(events);
            }

            let result = runner.run(cancel, &run_id, &self.workflow.name);
            let status = result.status;
            runs.push(result);

            // Fail-fast across matrix entries.
            if status != RunStatus::Passed {
                break;
            }
        }

        self.review = review;

        Ok(WorkflowResult {
            workflow_name: self.workflow.name.clone(),
            status: aggregate(&runs),
            runs,
        })
    }
}

fn aggregate(runs: &[RunResult]) -> RunStatus {
    if runs.iter().any(|r| r.status == RunStatus::Cancelled) {
        RunStatus::Cancelled
    } else if runs.iter().any(|r| r.status == RunStatus::Failed) {
        RunStatus::Failed
    } else {
        RunStatus::Passed
    }
}

/// Each include entry becomes one run; no matrix means a single run
/// with no matrix variables.
fn expand_matrix(job: &JobDef) -> Vec<BTreeMap<String, String>> {
    match job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
        Some(matrix) if !matrix.include.is_empty() => matrix.include.clone(),
        _ => vec![BTreeMap::new()],
    }
}

fn generate_run_id() -> String {
    let random_part: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("run-{}", random_part.to_lowercase())
}

fn tool_on_path(tool: &str) -> bool {
    let tool_path = Path::new(tool);
    if tool_path.components().count() > 1 {
        return tool_path.is_file();
    }
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(tool);
        if candidate.is_file() {
            return true;
        }
        #[cfg(windows)]
        {
            if dir.join(format!("{}.exe", tool)).is_file() {
                return true;
            }
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_workflow_str;

    #[test]
    fn run_ids_are_short_and_lowercase() {
        let id = generate_run_id();
        assert!(id.starts_with("run-"));
        assert_eq!(id.len(), "run-".len() + 6);
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn no_matrix_expands_to_one_empty_entry() {
        let workflow = parse_workflow_str(
            "name: t\njobs:\n  main:\n    steps:\n      - id: a\n        run: echo hi\n",
        )
        .unwrap();
        let entries = expand_matrix(&workflow.jobs["main"]);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_empty());
    }

    #[test]
    fn include_entries_expand_in_order() {
        let workflow = parse_workflow_str(
            r#"
name: t
jobs:
  main:
    strategy:
      matrix:
        include:
          - os: linux
          - os: darwin
    steps:
      - id: a
        run: echo hi
"#,
        )
        .unwrap();
        let entries = expand_matrix(&workflow.jobs["main"]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["os"], "linux");
        assert_eq!(entries[1]["os"], "darwin");
    }

    #[cfg(unix)]
    #[test]
    fn common_tools_are_found_on_path() {
        assert!(tool_on_path("sh"));
        assert!(!tool_on_path("definitely-not-a-real-tool-x9"));
    }
}
