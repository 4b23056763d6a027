//! Schema and parser for clai workflow documents.
//!
//! A workflow file declares jobs, steps, matrix expansions, secrets and
//! per-step risk posture. Parsing is schema-strict: unknown fields are
//! rejected at every level so a typo never silently changes a run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// The root document structure for a workflow file.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDef {
    /// Workflow display name.
    pub name: String,

    /// Workflow-level environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Secrets to resolve and mask from all captured output.
    #[serde(default)]
    pub secrets: Vec<SecretDef>,

    /// External tools that must be on PATH before the run starts.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Map of job definitions (job-id -> Job).
    pub jobs: HashMap<String, JobDef>,
}

/// A job is an ordered sequence of steps sharing env and matrix expansion.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct JobDef {
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Job-level environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Matrix expansion strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    /// Job ids that must complete before this job starts. Validated for
    /// existence and acyclicity; execution order is reserved for a later
    /// version.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Sequential steps to execute.
    pub steps: Vec<StepDef>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Strategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixDef>,
}

/// Explicit include-list matrix. Every entry must carry the identical
/// key set; the first entry defines the baseline.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MatrixDef {
    #[serde(default)]
    pub include: Vec<BTreeMap<String, String>>,
}

/// A single step within a job.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StepDef {
    /// Unique step identifier within the job.
    pub id: String,

    /// Human-readable step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Command text to execute.
    pub run: String,

    /// Shell selection: absent, a boolean, or a shell name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellField>,

    /// Environment variables for this step.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Submit this step's output to the analyzer after it exits.
    #[serde(default)]
    pub analyze: bool,

    /// Custom analysis prompt; required when `analyze` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_prompt: Option<String>,

    /// Risk posture controlling the human-in-the-loop gate.
    #[serde(default)]
    pub risk_level: RiskLevel,
}

/// The `shell` scalar may be boolean-like (`true`/`false`) or a string.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ShellField {
    Flag(bool),
    Name(String),
}

/// Normalized shell selection consumed by the shell adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMode {
    /// No explicit selection; the platform picks argv or its default shell.
    Default,
    /// Run through the platform default shell.
    PlatformShell,
    /// No shell: POSIX-tokenize the command into argv.
    Argv,
    /// Run through the named shell.
    Named(String),
}

const KNOWN_SHELLS: &[&str] = &["sh", "bash", "zsh", "fish", "pwsh", "cmd"];

impl StepDef {
    /// Derive the normalized shell mode from the raw `shell` field.
    /// Empty or unrecognized values fall back to the platform default.
    pub fn shell_mode(&self) -> ShellMode {
        match &self.shell {
            None => ShellMode::Default,
            Some(ShellField::Flag(true)) => ShellMode::PlatformShell,
            Some(ShellField::Flag(false)) => ShellMode::Argv,
            Some(ShellField::Name(name)) => match name.as_str() {
                "" => ShellMode::Default,
                "true" => ShellMode::PlatformShell,
                "false" => ShellMode::Argv,
                s if KNOWN_SHELLS.contains(&s) => ShellMode::Named(s.to_string()),
                _ => ShellMode::Default,
            },
        }
    }

    /// Display name for events and review blocks: `name` if set, else `id`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Where a secret's value comes from. Only `env` is honored in v0; the
/// other sources are accepted so documents stay forward-compatible.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    #[default]
    Env,
    File,
    Interactive,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SecretDef {
    /// Environment variable name holding the secret value.
    pub name: String,

    #[serde(default)]
    pub from: SecretSource,

    /// Source path for `from: file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Per-step risk classification gating the analysis decision.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Parse a workflow document from YAML text.
pub fn parse_workflow_str(content: &str) -> anyhow::Result<WorkflowDef> {
    let workflow: WorkflowDef = serde_yaml::from_str(content)?;
    Ok(workflow)
}

/// Parse a workflow document from a file on disk.
pub fn parse_workflow_file(path: &Path) -> anyhow::Result<WorkflowDef> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read workflow file {}: {}", path.display(), e))?;
    parse_workflow_str(&content)
}
