//! Structural validation for parsed workflow documents.
//!
//! Validation collects every problem it finds instead of stopping at the
//! first one, so an author can fix a document in one pass. Each error
//! carries the field path it refers to.

use crate::schema::{JobDef, WorkflowDef};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate a workflow document. Returns every error found; an empty
/// vector means the document is runnable.
pub fn validate(workflow: &WorkflowDef) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "workflow name must not be empty"));
    }

    for (i, secret) in workflow.secrets.iter().enumerate() {
        if secret.name.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("secrets[{}].name", i),
                "secret name must not be empty",
            ));
        }
    }

    for (i, tool) in workflow.requires.iter().enumerate() {
        if tool.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("requires[{}]", i),
                "required tool name must not be empty",
            ));
        }
    }

    if workflow.jobs.is_empty() {
        errors.push(ValidationError::new("jobs", "workflow must define at least one job"));
    } else if workflow.jobs.len() > 1 {
        // Single-job restriction is engine policy, not a schema constraint.
        errors.push(ValidationError::new(
            "jobs",
            format!(
                "multi-job workflows are not supported yet ({} jobs defined)",
                workflow.jobs.len()
            ),
        ));
    }

    let mut job_ids: Vec<&String> = workflow.jobs.keys().collect();
    job_ids.sort();

    for job_id in &job_ids {
        let job = &workflow.jobs[*job_id];
        validate_job(job_id, job, &mut errors);

        for (i, dep) in job.needs.iter().enumerate() {
            if !workflow.jobs.contains_key(dep) {
                errors.push(ValidationError::new(
                    format!("jobs.{}.needs[{}]", job_id, i),
                    format!("references undefined job '{}'", dep),
                ));
            }
        }
    }

    if let Some(cycle) = detect_cycle(&workflow.jobs) {
        errors.push(ValidationError::new(
            "jobs",
            format!("dependency cycle detected: {}", cycle.join(" -> ")),
        ));
    }

    errors
}

fn validate_job(job_id: &str, job: &JobDef, errors: &mut Vec<ValidationError>) {
    if job.steps.is_empty() {
        errors.push(ValidationError::new(
            format!("jobs.{}.steps", job_id),
            "job must have at least one step",
        ));
    }

    let mut seen_ids = HashSet::new();
    for (i, step) in job.steps.iter().enumerate() {
        let path = format!("jobs.{}.steps[{}]", job_id, i);

        if step.id.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.id", path), "step id must not be empty"));
        } else if !seen_ids.insert(step.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", path),
                format!("duplicate step id '{}'", step.id),
            ));
        }

        if step.run.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.run", path),
                "step command must not be empty",
            ));
        }

        if step.analyze && step.analysis_prompt.as_deref().map_or(true, |p| p.trim().is_empty()) {
            errors.push(ValidationError::new(
                format!("{}.analysis_prompt", path),
                "analysis_prompt is required when analyze is set",
            ));
        }
    }

    if let Some(matrix) = job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
        // The first include entry defines the baseline key set.
        if let Some(first) = matrix.include.first() {
            let baseline: HashSet<&String> = first.keys().collect();
            for (i, entry) in matrix.include.iter().enumerate().skip(1) {
                let keys: HashSet<&String> = entry.keys().collect();
                if keys != baseline {
                    errors.push(ValidationError::new(
                        format!("jobs.{}.strategy.matrix.include[{}]", job_id, i),
                        "matrix include entries must all have the identical key set",
                    ));
                }
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS coloring over the job graph. Returns the first cycle found as a
/// path `a -> b -> ... -> a`, reconstructed from the visitation stack.
fn detect_cycle(jobs: &HashMap<String, JobDef>) -> Option<Vec<String>> {
    let mut colors: HashMap<&str, Color> =
        jobs.keys().map(|id| (id.as_str(), Color::White)).collect();

    let mut roots: Vec<&String> = jobs.keys().collect();
    roots.sort();

    let mut stack = Vec::new();
    for root in roots {
        if colors[root.as_str()] == Color::White {
            if let Some(cycle) = visit(root, jobs, &mut colors, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    job_id: &'a str,
    jobs: &'a HashMap<String, JobDef>,
    colors: &mut HashMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    colors.insert(job_id, Color::Gray);
    stack.push(job_id);

    if let Some(job) = jobs.get(job_id) {
        for dep in &job.needs {
            let Some(dep_id) = jobs.keys().find(|k| *k == dep) else {
                // Dangling references are reported separately.
                continue;
            };
            match colors[dep_id.as_str()] {
                Color::Gray => {
                    let start = stack.iter().position(|s| *s == dep_id.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep_id.clone());
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = visit(dep_id, jobs, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
    }

    stack.pop();
    colors.insert(job_id, Color::Black);
    None
}
