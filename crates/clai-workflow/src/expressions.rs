//! Expression resolver for `${{ ... }}` interpolation.
//!
//! Strictly pure name resolution over three scopes:
//! - `env.<KEY>`
//! - `matrix.<KEY>`
//! - `steps.<ID>.outputs.<KEY>`
//!
//! No operators, functions or logic. Anything unresolvable is an error
//! naming the offending path.

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Scoped lookup tables accumulated over a run.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Effective environment for the current step.
    pub env: HashMap<String, String>,

    /// Matrix variables for the current run.
    pub matrix: BTreeMap<String, String>,

    /// Outputs exported by earlier steps (step id -> key -> value).
    pub steps: HashMap<String, HashMap<String, String>>,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step_outputs(&mut self, step_id: &str, outputs: HashMap<String, String>) {
        self.steps.insert(step_id.to_string(), outputs);
    }
}

fn expr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("expression pattern"))
}

/// Substitute every `${{ ... }}` occurrence in `input` using `ctx`.
pub fn resolve(input: &str, ctx: &ResolveContext) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut last_end = 0;

    for cap in expr_pattern().captures_iter(input) {
        let full = cap.get(0).expect("match");
        let body = cap.get(1).expect("capture").as_str();

        if body.contains("${{") {
            bail!("nested expression delimiter in '{}'", full.as_str());
        }

        let expr = body.trim();
        if expr.is_empty() {
            bail!("empty expression");
        }

        output.push_str(&input[last_end..full.start()]);
        output.push_str(&lookup(expr, ctx)?);
        last_end = full.end();
    }
    output.push_str(&input[last_end..]);

    // Anything the pattern did not consume is an unmatched delimiter, and
    // substituted values must not smuggle new expressions in.
    if output.contains("${{") {
        bail!("unmatched expression delimiter in '{}'", input);
    }

    Ok(output)
}

fn lookup<'a>(expr: &str, ctx: &'a ResolveContext) -> Result<&'a str> {
    let parts: Vec<&str> = expr.split('.').collect();

    match parts.as_slice() {
        ["env", key] => ctx
            .env
            .get(*key)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unresolved reference 'env.{}'", key)),
        ["matrix", key] => ctx
            .matrix
            .get(*key)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unresolved reference 'matrix.{}'", key)),
        ["steps", step_id, "outputs", key] => ctx
            .steps
            .get(*step_id)
            .and_then(|outputs| outputs.get(*key))
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unresolved reference 'steps.{}.outputs.{}'", step_id, key)),
        ["env" | "matrix" | "steps", ..] => {
            bail!("malformed expression '{}'", expr)
        }
        _ => bail!(
            "unknown namespace in '{}' (expected env, matrix or steps)",
            expr
        ),
    }
}
